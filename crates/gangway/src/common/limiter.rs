use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many sessions may be open concurrently against any single
/// remote host, so that many parallel submission flows do not overwhelm one
/// login node with connections.
pub struct HostLimiter {
    max_per_host: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(max_per_host: usize) -> Self {
        assert!(max_per_host > 0);
        Self {
            max_per_host,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until a session slot for `host` is free. The permit is released
    /// on drop, on every exit path of the holding flow.
    pub async fn acquire(&self, host: &str) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut map = self.semaphores.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
                .clone()
        };
        semaphore
            .acquire_owned()
            .await
            .expect("host semaphore closed")
    }
}

#[cfg(test)]
mod tests {
    use super::HostLimiter;

    #[tokio::test]
    async fn hosts_are_limited_independently() {
        let limiter = HostLimiter::new(1);
        let _a = limiter.acquire("a.example.org").await;
        // A different host must not be blocked by host a's permit.
        let _b = limiter.acquire("b.example.org").await;
    }

    #[tokio::test]
    async fn permit_release_unblocks_waiter() {
        let limiter = HostLimiter::new(1);
        let first = limiter.acquire("cluster.example.org").await;
        drop(first);
        let _second = limiter.acquire("cluster.example.org").await;
    }
}
