use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::channel::{ChannelState, ChannelTimings};
use super::connection::IrcTransport;
use super::error::{Result as TwitchResult, TwitchError};
use super::lookup::StreamLookup;

/// Every channel the bot currently sits in, keyed by bare lower-case name.
///
/// Each mutation holds the write lock from the membership check to the final
/// insert or remove, so two concurrent `register` calls for the same channel
/// produce a single JOIN and a single reminder loop.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,
    transport: IrcTransport,
    lookup: Arc<dyn StreamLookup>,
    timings: ChannelTimings,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("transport", &self.transport)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl ChannelRegistry {
    pub fn new(
        transport: IrcTransport,
        lookup: Arc<dyn StreamLookup>,
        timings: ChannelTimings,
    ) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            transport,
            lookup,
            timings,
        }
    }

    /// Returns `false` when the channel was already registered.
    pub async fn register(&self, channel: &str) -> bool {
        let name = normalize(channel);
        let mut channels = self.channels.write().await;
        if channels.contains_key(&name) {
            return false;
        }

        let state = Arc::new(ChannelState::new(
            name.clone(),
            self.transport.clone(),
            Arc::clone(&self.lookup),
            &self.timings,
        ));
        if let Err(e) = self.transport.join(&name).await {
            // Still in the rejoin list, so the next welcome retries it.
            tracing::warn!(channel.name = %name, error = %e, "[REGISTRY] JOIN not queued");
        }
        state.start_reminder_loop().await;
        channels.insert(name.clone(), state);

        tracing::info!(channel.name = %name, total = channels.len(), "[REGISTRY] Channel registered");
        true
    }

    /// Returns `false` when the channel was not registered.
    pub async fn unregister(&self, channel: &str) -> bool {
        let name = normalize(channel);
        let mut channels = self.channels.write().await;
        let Some(state) = channels.get(&name).cloned() else {
            return false;
        };

        state.stop_reminder_loop().await;
        if let Err(e) = self.transport.part(&name).await {
            tracing::warn!(channel.name = %name, error = %e, "[REGISTRY] PART not queued");
        }
        channels.remove(&name);

        tracing::info!(channel.name = %name, total = channels.len(), "[REGISTRY] Channel unregistered");
        true
    }

    pub async fn get(&self, channel: &str) -> TwitchResult<Arc<ChannelState>> {
        let name = normalize(channel);
        self.channels
            .read()
            .await
            .get(&name)
            .cloned()
            .ok_or(TwitchError::ChannelNotRegistered(name))
    }

    pub async fn is_registered(&self, channel: &str) -> bool {
        self.channels.read().await.contains_key(&normalize(channel))
    }

    /// Sorted channel names.
    pub async fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every reminder loop and empties the registry. Channels stay in
    /// the transport's rejoin list.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<ChannelState>)> =
            self.channels.write().await.drain().collect();
        tracing::info!(count = drained.len(), "[REGISTRY] Stopping all reminder loops");
        for (_, state) in drained {
            state.stop_reminder_loop().await;
        }
    }
}

fn normalize(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::twitch::connection::TransportOptions;
    use crate::twitch::lookup::mock::ScriptedLookup;
    use crate::twitch::types::StreamStatus;
    use tokio::time::sleep;

    fn registry_with(lookup: ScriptedLookup) -> (ChannelRegistry, IrcTransport) {
        let transport = IrcTransport::new("127.0.0.1:1", TransportOptions::default());
        transport.set_connected_for_test(true);
        let registry = ChannelRegistry::new(
            transport.clone(),
            Arc::new(lookup),
            ChannelTimings::default(),
        );
        (registry, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_is_idempotent() {
        let (registry, transport) = registry_with(ScriptedLookup::offline());

        assert!(registry.register("#Streamer").await);
        assert!(!registry.register("streamer").await);
        assert!(registry.is_registered("STREAMER").await);
        assert_eq!(registry.channels().await, vec!["streamer"]);
        assert_eq!(transport.drain_queue_for_test(), vec!["JOIN #streamer"]);

        let state = registry.get("streamer").await.unwrap();
        assert!(state.is_reminder_running().await);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_is_idempotent() {
        let (registry, transport) = registry_with(ScriptedLookup::offline());
        assert!(!registry.unregister("nobody").await);

        registry.register("streamer").await;
        let state = registry.get("streamer").await.unwrap();
        assert!(registry.unregister("streamer").await);
        assert!(!registry.unregister("streamer").await);

        assert!(!registry.is_registered("streamer").await);
        assert!(!state.is_reminder_running().await);
        assert_eq!(
            transport.drain_queue_for_test(),
            vec!["JOIN #streamer", "PART #streamer"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_registers_join_once() {
        let (registry, transport) = registry_with(ScriptedLookup::offline());
        let registry = Arc::new(registry);

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.register("streamer").await })
            })
            .collect();
        let mut created = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(transport.drain_queue_for_test(), vec!["JOIN #streamer"]);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_unknown_channel_errors() {
        let (registry, _) = registry_with(ScriptedLookup::offline());
        assert!(matches!(
            registry.get("missing").await,
            Err(TwitchError::ChannelNotRegistered(name)) if name == "missing"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_mid_sleep_stops_loop_without_reminder() {
        let (registry, transport) = registry_with(ScriptedLookup::new(vec![Some(
            StreamStatus::Live {
                uptime: Duration::from_secs(10_795),
            },
        )]));
        registry.register("streamer").await;
        let state = registry.get("streamer").await.unwrap();

        sleep(Duration::from_secs(2)).await;
        assert!(registry.unregister("streamer").await);
        assert!(!state.is_reminder_running().await);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(
            transport.drain_queue_for_test(),
            vec!["JOIN #streamer", "PART #streamer"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_loop() {
        let (registry, _) = registry_with(ScriptedLookup::offline());
        registry.register("one").await;
        registry.register("two").await;
        let one = registry.get("one").await.unwrap();
        let two = registry.get("two").await.unwrap();

        registry.shutdown().await;
        assert!(registry.channels().await.is_empty());
        assert!(!one.is_reminder_running().await);
        assert!(!two.is_reminder_running().await);
    }
}
