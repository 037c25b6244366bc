use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::connection::IrcTransport;
use super::lookup::StreamLookup;
use super::types::StreamStatus;

pub const GREETING_RESPONSES: &[&str] = &[
    "Hi",
    "Hello",
    "Hiya",
    "Hey",
    "Yo",
    "What's up",
    "How's it going",
    "Greetings",
    "Sup",
    "What's good",
    "Hey there",
    "Howdy",
    "Good to see you",
    "vvhat's up",
    "Henlo",
    "Hovvdy",
];

pub const FAREWELL_RESPONSES: &[&str] = &[
    "Bye",
    "Goodnight",
    "Good night",
    "Goodbye",
    "Good bye",
    "See you",
    "See ya",
    "So long",
    "Farewell",
    "Later",
    "Seeya",
    "Ciao",
    "Au revoir",
    "Bon voyage",
    "Peace",
    "In a while crocodile",
    "See you later alligator",
    "Later alligator",
    "Have a good one",
    "l8r",
    "Later skater",
    "Catch you on the flip side",
    "Sayonara",
    "Auf weidersehen",
];

/// Viewers who gifted the bot owner a sub.
pub const SUB_GIFTERS: &[&str] = &[
    "technotoast",
    "kelleymcches",
    "wincerind",
    "hetero_corgi",
    "spoonlessalakazam",
];

const FAVORITE_CHATTER: &str = "evanito";

pub const WELLNESS_MESSAGE: &str =
    "MrDestructoid Chat, remember to get up and stretch to prevent Gamer Death!";

pub const MIN_REMINDER_GAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ChannelTimings {
    pub greeting_cooldown: Duration,
    pub farewell_cooldown: Duration,
    pub wellness_cooldown: Duration,
    pub registration_cooldown: Duration,
    pub reminder_period: Duration,
    pub offline_poll: Duration,
    pub lookup_backoff: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            greeting_cooldown: Duration::from_secs(10),
            farewell_cooldown: Duration::from_secs(10),
            wellness_cooldown: Duration::from_secs(60),
            registration_cooldown: Duration::from_secs(1),
            reminder_period: Duration::from_secs(3 * 60 * 60),
            offline_poll: Duration::from_secs(5 * 60),
            lookup_backoff: Duration::from_secs(60),
        }
    }
}

/// A ready flag that closes when fired and reopens on its own after
/// `duration`.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    ready: Arc<AtomicBool>,
    duration: Duration,
}

impl CooldownGate {
    pub fn new(duration: Duration) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            duration,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Returns `true` for exactly one caller per cooldown window.
    pub fn try_fire(&self) -> bool {
        if self
            .ready
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let ready = Arc::clone(&self.ready);
        let duration = self.duration;
        tokio::spawn(async move {
            sleep(duration).await;
            ready.store(true, Ordering::SeqCst);
        });
        true
    }
}

struct ReminderHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ChannelState {
    name: String,
    transport: IrcTransport,
    lookup: Arc<dyn StreamLookup>,
    greeting_gate: CooldownGate,
    farewell_gate: CooldownGate,
    wellness_gate: CooldownGate,
    registration_gate: CooldownGate,
    reminder_period: Duration,
    offline_poll: Duration,
    lookup_backoff: Duration,
    reminder: Mutex<Option<ReminderHandle>>,
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("name", &self.name)
            .field("reminder_period", &self.reminder_period)
            .finish_non_exhaustive()
    }
}

impl ChannelState {
    pub fn new(
        name: impl Into<String>,
        transport: IrcTransport,
        lookup: Arc<dyn StreamLookup>,
        timings: &ChannelTimings,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            lookup,
            greeting_gate: CooldownGate::new(timings.greeting_cooldown),
            farewell_gate: CooldownGate::new(timings.farewell_cooldown),
            wellness_gate: CooldownGate::new(timings.wellness_cooldown),
            registration_gate: CooldownGate::new(timings.registration_cooldown),
            reminder_period: timings.reminder_period,
            offline_poll: timings.offline_poll,
            lookup_backoff: timings.lookup_backoff,
            reminder: Mutex::new(None),
        }
    }

    pub fn send_greeting(&self, user: &str) {
        if !self.fire(&self.greeting_gate, "greeting") {
            return;
        }
        self.chat(&greeting_text(pick(GREETING_RESPONSES), user));
    }

    pub fn send_farewell(&self, user: &str) {
        if !self.fire(&self.farewell_gate, "farewell") {
            return;
        }
        self.chat(&format!("{} {} etalWave", pick(FAREWELL_RESPONSES), user));
    }

    pub fn send_wellness_reminder(&self) {
        if !self.fire(&self.wellness_gate, "wellness") {
            return;
        }
        self.chat(WELLNESS_MESSAGE);
    }

    pub fn send_registration_confirmed(&self, user: &str) {
        self.send_registration_reply(format!("I joined your chat, {}!", user));
    }

    pub fn send_registration_revoked(&self, user: &str) {
        self.send_registration_reply(format!("I left your chat, {}!", user));
    }

    pub fn send_already_registered_error(&self, user: &str) {
        self.send_registration_reply(format!("I'm already in your chat, {}!", user));
    }

    pub fn send_already_unregistered_error(&self, user: &str) {
        self.send_registration_reply(format!("I've already left your chat, {}!", user));
    }

    fn send_registration_reply(&self, text: String) {
        if self.fire(&self.registration_gate, "registration") {
            self.chat(&text);
        }
    }

    fn fire(&self, gate: &CooldownGate, kind: &str) -> bool {
        let fired = gate.try_fire();
        if !fired {
            tracing::debug!(channel.name = %self.name, kind, "[CHANNEL] On cooldown, skipping reply");
        }
        fired
    }

    fn chat(&self, text: &str) {
        if let Err(e) = self.transport.chat(&self.name, text) {
            tracing::debug!(channel.name = %self.name, error = %e, "[CHANNEL] Reply not queued");
        }
    }

    /// Spawns the reminder loop unless one is already running.
    pub async fn start_reminder_loop(self: &Arc<Self>) {
        let mut slot = self.reminder.lock().await;
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(self).run_reminder_loop(stop_rx));
        *slot = Some(ReminderHandle { stop_tx, task });
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop_reminder_loop(&self) {
        let handle = self.reminder.lock().await.take();
        let Some(ReminderHandle { stop_tx, task }) = handle else {
            return;
        };
        let _ = stop_tx.send(());
        if let Err(e) = task.await {
            tracing::error!(channel.name = %self.name, error = ?e, "[CHANNEL] Reminder loop panicked");
        }
    }

    pub async fn is_reminder_running(&self) -> bool {
        self.reminder
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    async fn run_reminder_loop(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        tracing::info!(channel.name = %self.name, "[CHANNEL] Reminder loop started");

        loop {
            let status = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                status = self.lookup.uptime(&self.name) => status,
            };

            let wait = match status {
                Err(e) => {
                    tracing::warn!(
                        channel.name = %self.name,
                        error = %e,
                        "[CHANNEL] Uptime lookup failed, backing off"
                    );
                    self.lookup_backoff
                }
                Ok(StreamStatus::Offline) => self.offline_poll,
                Ok(StreamStatus::Live { uptime }) => {
                    let wait = time_until_next_reminder(uptime, self.reminder_period);
                    tracing::debug!(channel.name = %self.name, ?uptime, ?wait, "[CHANNEL] Live, waiting for next reminder");

                    tokio::select! {
                        biased;
                        _ = &mut stop_rx => break,
                        _ = sleep(wait) => {}
                    }

                    let status = tokio::select! {
                        biased;
                        _ = &mut stop_rx => break,
                        status = self.lookup.uptime(&self.name) => status,
                    };
                    self.send_scheduled_reminder(status);
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = sleep(wait) => {}
            }
        }

        tracing::info!(channel.name = %self.name, "[CHANNEL] Reminder loop stopped");
    }

    fn send_scheduled_reminder(&self, status: super::error::Result<StreamStatus>) {
        match status {
            Ok(StreamStatus::Live { .. }) if self.transport.is_connected() => {
                tracing::info!(channel.name = %self.name, "[CHANNEL] Sending scheduled reminder");
                self.chat(&format!(
                    "MrDestructoid {} alert! It's been 3 hours and its time to prevent Gamer Death!",
                    self.name
                ));
            }
            Ok(StreamStatus::Live { .. }) => {
                tracing::debug!(channel.name = %self.name, "[CHANNEL] Not connected, skipping reminder")
            }
            Ok(StreamStatus::Offline) => {
                tracing::debug!(channel.name = %self.name, "[CHANNEL] Stream ended, skipping reminder")
            }
            Err(e) => {
                tracing::warn!(channel.name = %self.name, error = %e, "[CHANNEL] Uptime re-check failed, skipping reminder")
            }
        }
    }
}

/// Time left until uptime reaches the next multiple of `period`.
///
/// A boundary closer than [`MIN_REMINDER_GAP`] is the one just served by a
/// timer that woke slightly early, so the one after it is used instead.
pub fn time_until_next_reminder(uptime: Duration, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1);
    let elapsed_ms = uptime.as_millis() % period_ms;
    let remaining = Duration::from_millis((period_ms - elapsed_ms) as u64);
    if remaining < MIN_REMINDER_GAP.min(period / 2) {
        remaining + period
    } else {
        remaining
    }
}

fn greeting_text(phrase: &str, user: &str) -> String {
    let mut text = format!("{} {} etalWave", phrase, user);
    if user == FAVORITE_CHATTER {
        text.push_str(" You are my favorite chatter :)");
    }
    if SUB_GIFTERS.contains(&user) {
        text.push_str(" Thank you for the sub btw! :)");
    }
    text
}

fn pick(phrases: &'static [&'static str]) -> &'static str {
    phrases.choose(&mut rand::thread_rng()).copied().unwrap_or("Hi")
}
