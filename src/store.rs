// src/store.rs

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::twitch::{ChannelRecord, ChatLogEntry};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Persistence for the registered channel list and the chat log.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list_registered_channels(&self) -> Result<Vec<ChannelRecord>, StoreError>;

    /// Upserts by channel name.
    async fn add_channel(&self, name: &str, id: &str) -> Result<(), StoreError>;

    async fn remove_channel(&self, name: &str) -> Result<(), StoreError>;

    async fn append_log(&self, entry: &ChatLogEntry) -> Result<(), StoreError>;
}

pub fn build_store(config: &StoreConfig) -> Arc<dyn ChannelStore> {
    match config.backend {
        StoreBackend::File => {
            tracing::info!(
                channels = %config.channels_path,
                logs = %config.logs_path,
                "[STORE] Using JSON file store"
            );
            Arc::new(JsonFileStore::new(&config.channels_path, &config.logs_path))
        }
        StoreBackend::Memory => {
            tracing::warn!("[STORE] Using in-memory store, nothing will survive a restart");
            Arc::new(MemoryStore::default())
        }
    }
}

/// Channels live in a JSON array file; chat logs are appended as JSON lines.
#[derive(Debug)]
pub struct JsonFileStore {
    channels_path: PathBuf,
    logs_path: PathBuf,
    channels_lock: Mutex<()>,
    logs_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(channels_path: impl Into<PathBuf>, logs_path: impl Into<PathBuf>) -> Self {
        Self {
            channels_path: channels_path.into(),
            logs_path: logs_path.into(),
            channels_lock: Mutex::new(()),
            logs_lock: Mutex::new(()),
        }
    }

    async fn read_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        let content = match fs::read_to_string(&self.channels_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.channels_path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| StoreError::Serde {
            path: self.channels_path.display().to_string(),
            source: e,
        })
    }

    /// Writes to a sibling temp file first so a crash never leaves a torn list.
    async fn write_channels(&self, channels: &[ChannelRecord]) -> Result<(), StoreError> {
        ensure_parent(&self.channels_path).await?;
        let json = serde_json::to_string_pretty(channels).map_err(|e| StoreError::Serde {
            path: self.channels_path.display().to_string(),
            source: e,
        })?;
        let tmp_path = self.channels_path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .await
            .map_err(|e| io_error(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.channels_path)
            .await
            .map_err(|e| io_error(&self.channels_path, e))
    }
}

#[async_trait]
impl ChannelStore for JsonFileStore {
    async fn list_registered_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        let _guard = self.channels_lock.lock().await;
        self.read_channels().await
    }

    async fn add_channel(&self, name: &str, id: &str) -> Result<(), StoreError> {
        let _guard = self.channels_lock.lock().await;
        let mut channels = self.read_channels().await?;
        upsert(&mut channels, name, id);
        self.write_channels(&channels).await?;
        tracing::debug!(channel.name = name, "[STORE] Channel saved");
        Ok(())
    }

    async fn remove_channel(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.channels_lock.lock().await;
        let mut channels = self.read_channels().await?;
        let before = channels.len();
        channels.retain(|c| !c.name.eq_ignore_ascii_case(name));
        if channels.len() != before {
            self.write_channels(&channels).await?;
            tracing::debug!(channel.name = name, "[STORE] Channel removed");
        }
        Ok(())
    }

    async fn append_log(&self, entry: &ChatLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry).map_err(|e| StoreError::Serde {
            path: self.logs_path.display().to_string(),
            source: e,
        })?;
        line.push('\n');

        let _guard = self.logs_lock.lock().await;
        ensure_parent(&self.logs_path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.logs_path)
            .await
            .map_err(|e| io_error(&self.logs_path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_error(&self.logs_path, e))?;
        file.flush().await.map_err(|e| io_error(&self.logs_path, e))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: Mutex<Vec<ChannelRecord>>,
    logs: Mutex<Vec<ChatLogEntry>>,
}

impl MemoryStore {
    pub async fn logs(&self) -> Vec<ChatLogEntry> {
        self.logs.lock().await.clone()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn list_registered_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        Ok(self.channels.lock().await.clone())
    }

    async fn add_channel(&self, name: &str, id: &str) -> Result<(), StoreError> {
        upsert(&mut *self.channels.lock().await, name, id);
        Ok(())
    }

    async fn remove_channel(&self, name: &str) -> Result<(), StoreError> {
        self.channels
            .lock()
            .await
            .retain(|c| !c.name.eq_ignore_ascii_case(name));
        Ok(())
    }

    async fn append_log(&self, entry: &ChatLogEntry) -> Result<(), StoreError> {
        self.logs.lock().await.push(entry.clone());
        Ok(())
    }
}

fn upsert(channels: &mut Vec<ChannelRecord>, name: &str, id: &str) {
    let name = name.to_lowercase();
    match channels.iter_mut().find(|c| c.name == name) {
        Some(existing) => existing.id = id.to_string(),
        None => channels.push(ChannelRecord {
            name,
            id: id.to_string(),
        }),
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e)),
        _ => Ok(()),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(user: &str, message: &str) -> ChatLogEntry {
        ChatLogEntry {
            timestamp: Utc::now(),
            channel: "streamer".to_string(),
            username: user.to_string(),
            message: message.to_string(),
            user_id: Some("42".to_string()),
            display_name: None,
            message_id: None,
        }
    }

    #[tokio::test]
    async fn test_missing_channel_file_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("channels.json"), dir.path().join("log.jsonl"));
        assert!(store.list_registered_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove_channels_persist() {
        let dir = tempfile::tempdir().unwrap();
        let channels_path = dir.path().join("data").join("channels.json");
        let store = JsonFileStore::new(&channels_path, dir.path().join("log.jsonl"));

        store.add_channel("Alpha", "1").await.unwrap();
        store.add_channel("beta", "2").await.unwrap();
        store.add_channel("alpha", "11").await.unwrap();

        let reopened = JsonFileStore::new(&channels_path, dir.path().join("log.jsonl"));
        assert_eq!(
            reopened.list_registered_channels().await.unwrap(),
            vec![
                ChannelRecord {
                    name: "alpha".to_string(),
                    id: "11".to_string()
                },
                ChannelRecord {
                    name: "beta".to_string(),
                    id: "2".to_string()
                },
            ]
        );

        reopened.remove_channel("ALPHA").await.unwrap();
        reopened.remove_channel("never-added").await.unwrap();
        let names: Vec<String> = store
            .list_registered_channels()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["beta"]);
    }

    #[tokio::test]
    async fn test_corrupt_channel_file_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let channels_path = dir.path().join("channels.json");
        std::fs::write(&channels_path, "{not json").unwrap();
        let store = JsonFileStore::new(&channels_path, dir.path().join("log.jsonl"));
        assert!(matches!(
            store.list_registered_channels().await,
            Err(StoreError::Serde { .. })
        ));
    }

    #[tokio::test]
    async fn test_logs_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logs_path = dir.path().join("logs").join("chat.jsonl");
        let store = JsonFileStore::new(dir.path().join("channels.json"), &logs_path);

        store.append_log(&entry("one", "first")).await.unwrap();
        store.append_log(&entry("two", "second")).await.unwrap();

        let content = std::fs::read_to_string(&logs_path).unwrap();
        let lines: Vec<ChatLogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].username, "one");
        assert_eq!(lines[1].message, "second");
        assert_eq!(lines[1].user_id.as_deref(), Some("42"));
        assert!(!content.lines().next().unwrap().contains("display_name"));
    }

    #[tokio::test]
    async fn test_memory_store_upserts_and_logs() {
        let store = MemoryStore::default();
        store.add_channel("Alpha", "1").await.unwrap();
        store.add_channel("alpha", "2").await.unwrap();
        assert_eq!(store.list_registered_channels().await.unwrap().len(), 1);
        store.remove_channel("alpha").await.unwrap();
        assert!(store.list_registered_channels().await.unwrap().is_empty());

        store.append_log(&entry("viewer", "hi")).await.unwrap();
        assert_eq!(store.logs().await.len(), 1);
    }
}
