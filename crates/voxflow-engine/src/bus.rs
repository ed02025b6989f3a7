//! Job status fan-out
//!
//! Every transition goes to an in-process broadcast channel and, when a
//! redis connection is available, to the `job_updates` pub/sub channel for
//! out-of-process subscribers. Publishing is observability, not
//! correctness: the bus degrades to in-process-only silently when redis is
//! down and never fails the job.

use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use voxflow_types::JobEvent;

/// Logical channel name carrying job status payloads.
pub const JOB_UPDATES_CHANNEL: &str = "job_updates";

/// Per-subscriber ring capacity; the oldest event drops on overflow.
const SUBSCRIBER_CAPACITY: usize = 256;

/// In-process broadcast bridged to network pub/sub.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    redis: Option<ConnectionManager>,
}

impl EventBus {
    /// Build the bus, attempting one redis connection when a URL is given.
    /// Connection failure downgrades to in-process-only with a warning.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let redis = match redis_url {
            Some(url) => match Self::try_connect(url).await {
                Ok(manager) => {
                    info!(url, "connected to redis for status publishing");
                    Some(manager)
                }
                Err(e) => {
                    warn!(url, error = %e, "redis unavailable, status events stay in-process");
                    None
                }
            },
            None => None,
        };
        Self { tx, redis }
    }

    async fn try_connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    }

    /// An in-process-only bus, used by tests and one-shot runs.
    #[must_use]
    pub fn in_process() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self { tx, redis: None }
    }

    /// Subscribe to the event stream. Slow consumers lose the oldest
    /// events rather than blocking the runner.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Publish one event to both transports.
    pub async fn publish(&self, event: JobEvent) {
        // No receivers is normal when nothing is streaming.
        let _ = self.tx.send(event.clone());

        let Some(manager) = &self.redis else {
            return;
        };
        let payload = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize job event");
                return;
            }
        };
        let mut connection = manager.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("PUBLISH")
            .arg(JOB_UPDATES_CHANNEL)
            .arg(&payload)
            .query_async(&mut connection)
            .await;
        match result {
            Ok(()) => debug!(job_id = %event.job_id, "published job event to redis"),
            Err(e) => warn!(error = %e, "failed to publish job event"),
        }
    }
}
