use std::sync::Arc;

use regex::Regex;

use crate::store::ChannelStore;
use crate::twitch::{ChannelRegistry, ChatLogEntry, IrcMessage, StreamLookup};

const GREETING_PHRASES: &[&str] = &[
    "hi",
    "hiya",
    "hello",
    "hey",
    "yo",
    "sup",
    "howdy",
    "hovvdy",
    "greetings",
    "what's good",
    "whats good",
    "vvhat's good",
    "vvhats good",
    "what's up",
    "whats up",
    "vvhat's up",
    "vvhats up",
    "konichiwa",
    "hewwo",
    "etalWave",
    "vvhats crackalackin",
    "whats crackalackin",
    "henlo",
    "good morning",
    "good evening",
    "good afternoon",
];

const FAREWELL_PHRASES: &[&str] = &[
    "bye",
    "goodnight",
    "good night",
    "goodbye",
    "good bye",
    "see you",
    "see ya",
    "so long",
    "farewell",
    "later",
    "seeya",
    "ciao",
    "au revoir",
    "bon voyage",
    "peace",
    "in a while crocodile",
    "see you later alligator",
    "later alligator",
    "have a good one",
    "igottago",
    "l8r",
    "later skater",
    "catch you on the flip side",
    "bye-bye",
    "sayonara",
];

/// Senders that are the server itself rather than a viewer.
const SYSTEM_IDENTITIES: &[&str] = &["tmi.twitch.tv", "tmi"];

const CMD_JOIN: &str = "!join";
const CMD_LEAVE: &str = "!leave";
const CMD_GAMERDEATH: &str = "!gamerdeath";

/// Routes parsed chat lines to registry changes and channel replies.
pub struct Dispatcher {
    bot_nick: String,
    registry: Arc<ChannelRegistry>,
    store: Arc<dyn ChannelStore>,
    lookup: Arc<dyn StreamLookup>,
    greeting: Regex,
    farewell: Regex,
}

impl Dispatcher {
    pub fn new(
        bot_nick: &str,
        alias: &str,
        registry: Arc<ChannelRegistry>,
        store: Arc<dyn ChannelStore>,
        lookup: Arc<dyn StreamLookup>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            bot_nick: bot_nick.to_lowercase(),
            greeting: addressed_pattern(GREETING_PHRASES, bot_nick, alias)?,
            farewell: addressed_pattern(FAREWELL_PHRASES, bot_nick, alias)?,
            registry,
            store,
            lookup,
        })
    }

    pub async fn dispatch(&self, event: &IrcMessage) {
        if !event.is_privmsg() {
            return;
        }
        let sender = event.sender.to_lowercase();
        if sender == self.bot_nick || SYSTEM_IDENTITIES.contains(&sender.as_str()) {
            return;
        }

        self.log_message(event);

        let channel = event.channel_name();
        let text = clean_command_text(&event.message);
        if channel == self.bot_nick {
            match text {
                CMD_JOIN => self.handle_join(&event.sender).await,
                CMD_LEAVE => self.handle_leave(&event.sender).await,
                _ => {}
            }
            return;
        }

        let Ok(state) = self.registry.get(&channel).await else {
            tracing::trace!(channel.name = %channel, "[DISPATCH] Message from unregistered channel");
            return;
        };

        if self.greeting.is_match(text) {
            state.send_greeting(&event.sender);
        } else if self.farewell.is_match(text) {
            state.send_farewell(&event.sender);
        } else if text == CMD_GAMERDEATH {
            state.send_wellness_reminder();
        }
    }

    async fn handle_join(&self, user: &str) {
        let home = match self.registry.get(&self.bot_nick).await {
            Ok(home) => home,
            Err(e) => {
                tracing::error!(error = %e, "[DISPATCH] Home channel missing, ignoring !join");
                return;
            }
        };

        let channel = user.to_lowercase();
        if self.registry.is_registered(&channel).await {
            home.send_already_registered_error(user);
            return;
        }

        let channel_id = match self.lookup.resolve_channel_id(&channel).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(channel.name = %channel, error = %e, "[DISPATCH] Could not resolve channel id, not joining");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let stored_name = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = store.add_channel(&stored_name, &channel_id).await {
                tracing::error!(channel.name = %stored_name, error = %e, "[STORE] Failed to save channel");
            }
        });

        self.registry.register(&channel).await;
        home.send_registration_confirmed(user);
    }

    async fn handle_leave(&self, user: &str) {
        let home = match self.registry.get(&self.bot_nick).await {
            Ok(home) => home,
            Err(e) => {
                tracing::error!(error = %e, "[DISPATCH] Home channel missing, ignoring !leave");
                return;
            }
        };

        let channel = user.to_lowercase();
        if channel == self.bot_nick {
            tracing::warn!("[DISPATCH] Refusing to leave the home channel");
            return;
        }
        if !self.registry.is_registered(&channel).await {
            home.send_already_unregistered_error(user);
            return;
        }

        let store = Arc::clone(&self.store);
        let stored_name = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = store.remove_channel(&stored_name).await {
                tracing::error!(channel.name = %stored_name, error = %e, "[STORE] Failed to remove channel");
            }
        });

        self.registry.unregister(&channel).await;
        home.send_registration_revoked(user);
    }

    fn log_message(&self, event: &IrcMessage) {
        let entry = ChatLogEntry::from_message(event);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.append_log(&entry).await {
                tracing::warn!(channel.name = %entry.channel, error = %e, "[STORE] Failed to append chat log");
            }
        });
    }
}

fn addressed_pattern(phrases: &[&str], bot_nick: &str, alias: &str) -> Result<Regex, regex::Error> {
    let alternatives: Vec<String> = phrases.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!(
        "(?i)({}) (@*{}|{})",
        alternatives.join("|"),
        regex::escape(bot_nick),
        regex::escape(alias)
    ))
}

/// Chat clients pad repeated messages with invisible characters so Twitch
/// accepts them; those must not defeat exact command matches.
fn clean_command_text(text: &str) -> &str {
    text.trim_end_matches(|c: char| c.is_whitespace() || c.is_control() || is_invisible(c))
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{034F}'
            | '\u{200B}'..='\u{200D}'
            | '\u{2060}'
            | '\u{FE0E}'
            | '\u{FE0F}'
            | '\u{FEFF}'
            | '\u{E0000}'..='\u{E007F}'
    )
}
