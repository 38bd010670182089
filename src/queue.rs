use crate::backend::BackendClient;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{DrainReport, QueuedRequest, ReplayOutcome, ReplayPolicy};
use crate::store::{ClientStore, QUEUE_CAPACITY};
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_REPLAY_ATTEMPTS: u32 = 3;

/// Owns the in-memory queue of offline writes and replays it when
/// connectivity returns. Requests are drained strictly in FIFO order, one
/// at a time: concurrent replay could reorder writes against the backend.
pub struct QueueManager {
    store: ClientStore,
    backend: BackendClient,
    monitor: Arc<ConnectivityMonitor>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    draining: AtomicBool,
}

impl QueueManager {
    /// Restores any queue persisted by a previous session.
    pub fn new(
        store: ClientStore,
        backend: BackendClient,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let persisted = store.load_requests()?;
        if !persisted.is_empty() {
            tracing::info!(count = persisted.len(), "restored offline queue from storage");
        }
        Ok(Self {
            store,
            backend,
            monitor,
            queue: Mutex::new(VecDeque::from(persisted)),
            draining: AtomicBool::new(false),
        })
    }

    /// Appends a request and returns its id so callers can reference it in
    /// user-facing messaging. When the monitor reports online the queue is
    /// drained immediately.
    pub async fn queue_request(
        &self,
        url: &str,
        method: &str,
        headers: BTreeMap<String, String>,
        body: Option<String>,
    ) -> Result<String> {
        let request = QueuedRequest::new(url, method, headers, body);
        let id = request.id.clone();
        {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| anyhow!("queue lock poisoned"))?;
            if queue.len() >= QUEUE_CAPACITY {
                if let Some(evicted) = queue.pop_front() {
                    tracing::warn!(
                        request_id = %evicted.id,
                        url = %evicted.url,
                        "offline queue full, evicting oldest request"
                    );
                }
            }
            queue.push_back(request.clone());
        }
        if let Err(error) = self.store.append_request(&request) {
            tracing::warn!(
                error = %error,
                request_id = %id,
                "failed to persist queued request, queue continues in memory only"
            );
        }
        if self.monitor.is_online() {
            if let Err(error) = self.process_queue().await {
                tracing::error!(error = %error, "immediate drain after enqueue failed");
            }
        }
        Ok(id)
    }

    /// Drains the current queue once. A drain already in flight makes this
    /// a no-op so a reconnect signal cannot interleave two bursts.
    pub async fn process_queue(&self) -> Result<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("drain already in flight, skipping");
            return Ok(DrainReport::default());
        }
        let result = self.drain_snapshot().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_snapshot(&self) -> Result<DrainReport> {
        let snapshot: Vec<QueuedRequest> = {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| anyhow!("queue lock poisoned"))?;
            queue.drain(..).collect()
        };
        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return Ok(report);
        }

        let policy = match self.store.get_replay_policy() {
            Ok(policy) => policy,
            Err(error) => {
                tracing::warn!(error = %error, "falling back to default replay policy");
                ReplayPolicy::default()
            }
        };

        tracing::debug!(count = snapshot.len(), "draining offline queue");

        for (index, mut request) in snapshot.into_iter().enumerate() {
            if index > 0 && policy.replay_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(policy.replay_delay_ms)).await;
            }
            report.attempted += 1;
            let attempt = request.retries + 1;
            tracing::info!(
                request_id = %request.id,
                url = %request.url,
                attempt,
                "replaying queued request"
            );

            match self.backend.replay(&request).await {
                Ok(()) => {
                    report.delivered += 1;
                    // removal persisted only after confirmed delivery
                    if let Err(error) = self.store.delete_request(&request.id) {
                        tracing::warn!(
                            error = %error,
                            request_id = %request.id,
                            "failed to remove delivered request from storage"
                        );
                    }
                    self.record_history(&request, ReplayOutcome::Delivered, attempt, None);
                }
                Err(error) => {
                    request.retries += 1;
                    if request.retries < MAX_REPLAY_ATTEMPTS {
                        report.retrying += 1;
                        tracing::warn!(
                            request_id = %request.id,
                            error = %error,
                            retries = request.retries,
                            "replay failed, keeping request for a future drain"
                        );
                        if let Err(storage_error) = self.store.bump_retries(&request.id) {
                            tracing::warn!(
                                error = %storage_error,
                                request_id = %request.id,
                                "failed to persist retry count"
                            );
                        }
                        self.record_history(
                            &request,
                            ReplayOutcome::Retrying,
                            attempt,
                            Some(&error.to_string()),
                        );
                        let mut queue = self
                            .queue
                            .lock()
                            .map_err(|_| anyhow!("queue lock poisoned"))?;
                        queue.push_back(request);
                    } else {
                        report.dropped += 1;
                        tracing::error!(
                            request_id = %request.id,
                            url = %request.url,
                            error = %error,
                            "dropping queued request after exhausting retries"
                        );
                        if let Err(storage_error) = self.store.delete_request(&request.id) {
                            tracing::warn!(
                                error = %storage_error,
                                request_id = %request.id,
                                "failed to remove dropped request from storage"
                            );
                        }
                        self.record_history(
                            &request,
                            ReplayOutcome::Dropped,
                            attempt,
                            Some(&error.to_string()),
                        );
                    }
                }
            }
        }
        Ok(report)
    }

    fn record_history(
        &self,
        request: &QueuedRequest,
        outcome: ReplayOutcome,
        attempt: u32,
        error_message: Option<&str>,
    ) {
        if let Err(error) = self
            .store
            .record_replay(request, outcome, attempt, error_message)
        {
            tracing::warn!(error = %error, request_id = %request.id, "failed to record replay history");
        }
    }

    /// Current in-memory queue length, for UI badges.
    pub fn queue_size(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Explicit reset; never invoked automatically.
    pub fn clear_queue(&self) -> Result<()> {
        {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| anyhow!("queue lock poisoned"))?;
            queue.clear();
        }
        self.store.clear_requests()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityState;

    fn offline_manager() -> (tempfile::TempDir, QueueManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ClientStore::new(dir.path().join("carivox"));
        store.init().expect("init store");
        let backend = BackendClient::new("http://127.0.0.1:9", 1000).expect("client");
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::Offline));
        let manager = QueueManager::new(store, backend, monitor).expect("manager");
        (dir, manager)
    }

    #[tokio::test]
    async fn offline_enqueues_count_up_to_capacity() {
        let (_dir, manager) = offline_manager();
        for index in 0..QUEUE_CAPACITY + 5 {
            manager
                .queue_request(
                    &format!("http://localhost/api/save-story/{index}"),
                    "POST",
                    BTreeMap::new(),
                    None,
                )
                .await
                .expect("queue request");
        }
        assert_eq!(manager.queue_size(), QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn queue_request_returns_distinct_ids() {
        let (_dir, manager) = offline_manager();
        let first = manager
            .queue_request("http://localhost/api/save-story", "POST", BTreeMap::new(), None)
            .await
            .expect("queue request");
        let second = manager
            .queue_request("http://localhost/api/save-story", "POST", BTreeMap::new(), None)
            .await
            .expect("queue request");
        assert_ne!(first, second);
        assert_eq!(manager.queue_size(), 2);
    }

    #[tokio::test]
    async fn clear_queue_twice_leaves_empty_queue_and_storage() {
        let (_dir, manager) = offline_manager();
        manager
            .queue_request("http://localhost/api/save-story", "POST", BTreeMap::new(), None)
            .await
            .expect("queue request");
        manager.clear_queue().expect("clear");
        assert_eq!(manager.queue_size(), 0);
        manager.clear_queue().expect("clear again");
        assert_eq!(manager.queue_size(), 0);
    }

    #[tokio::test]
    async fn draining_an_empty_queue_is_a_no_op() {
        let (_dir, manager) = offline_manager();
        let report = manager.process_queue().await.expect("drain");
        assert_eq!(report, DrainReport::default());
    }
}
