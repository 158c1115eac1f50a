//! Host-control surfaces consumed by the core.
//!
//! The concrete bindings (tab capture, the player element, extension
//! storage) live outside the core; these traits are the seams.

use async_trait::async_trait;

use crate::error::AudioError;

/// Read access to the video player's clock.
///
/// Asynchronous because the player may live in a different execution
/// context than the caller and be reachable only over an RPC boundary.
#[async_trait]
pub trait VideoClock: Send + Sync {
    /// Current playback time in seconds.
    async fn current_time(&self) -> f64;
}

/// A tab-scoped audio capture handle.
///
/// `start` registers a callback invoked from the capture thread with blocks
/// of interleaved f32 samples at the source's native rate. The callback
/// must never block; it is expected to hand samples to a non-blocking
/// queue and return.
///
/// Capturing a tab suppresses its local playback, so the host
/// implementation is responsible for mirroring the stream to an output
/// sink of its own; the core only consumes the capture side.
pub trait AudioSource: Send {
    /// Native sample rate of the capture graph (typically 48000).
    fn sample_rate(&self) -> u32;

    /// Number of interleaved channels per block.
    fn channels(&self) -> u16;

    /// Begin capture. Calling `start` twice is an error.
    fn start(&mut self, on_block: Box<dyn FnMut(&[f32]) + Send>) -> Result<(), AudioError>;

    /// Stop capture and release the underlying graph. After `stop`
    /// returns, the callback will not be invoked again.
    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Async key/value storage over string keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// In-memory `KvStore`, used by tests and the demo binary.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKvStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
