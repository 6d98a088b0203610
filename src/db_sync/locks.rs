use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory in-process locks keyed by destination (`host:port/database`).
///
/// Two operations writing the same database run one after the other; other
/// destinations are unaffected.
#[derive(Clone, Default)]
pub struct DestinationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, destination: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.inner.lock().await;
            guard
                .entry(destination.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        if let Ok(held) = lock.clone().try_lock_owned() {
            return held;
        }
        log::info!("Waiting for another operation on {} to finish", destination);
        lock.lock_owned().await
    }
}
