use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Result, StratumError};
use crate::services::database::DatabaseService;

/// One user as returned by the pool user API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub puname: String,
    pub puid: i32,
}

/// A worker identity awaiting persistence.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub user_id: i32,
    pub worker_id: i64,
    pub name: String,
    pub agent: String,
    attempts: u8,
}

const MAX_WORKER_NAME: usize = 20;
const MAX_AGENT: usize = 30;
const MAX_UPSERT_ATTEMPTS: u8 = 3;
const DRAIN_BATCH: usize = 64;

/// Maps authenticating user names to pool user ids and persists worker
/// identities off the session hot path.
///
/// The name cache refreshes incrementally: each poll asks the user API for
/// entries past the highest id seen so far. Worker records go through a
/// bounded in-memory queue drained by a dedicated writer task, so a slow
/// database never blocks authorization.
pub struct Registry {
    api_url: String,
    refresh_interval: Duration,
    client: reqwest::Client,
    names: DashMap<String, i32>,
    last_max_user_id: AtomicI32,
    queue: Mutex<VecDeque<WorkerRecord>>,
    queue_capacity: usize,
    database: Arc<DatabaseService>,
    running: AtomicBool,
}

impl Registry {
    pub fn new(config: &Config, database: Arc<DatabaseService>) -> Self {
        Self {
            api_url: config.user_api.url.clone(),
            refresh_interval: config.user_api.refresh_interval,
            client: reqwest::Client::new(),
            names: DashMap::new(),
            last_max_user_id: AtomicI32::new(0),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: config.limiter.worker_queue,
            database,
            running: AtomicBool::new(true),
        }
    }

    /// Pure lookup over the cached mapping. A miss is the session layer's
    /// problem; it may reject authorization or retry later.
    pub fn get_user_id(&self, name: &str) -> Option<i32> {
        self.names.get(name).map(|id| *id)
    }

    pub fn user_count(&self) -> usize {
        self.names.len()
    }

    /// Queue a worker identity for persistence. On overflow the oldest
    /// pending record is dropped with a warning.
    pub fn add_worker(&self, user_id: i32, worker_id: i64, name: &str, agent: &str) {
        let record = WorkerRecord {
            user_id,
            worker_id,
            name: truncate(name, MAX_WORKER_NAME),
            agent: truncate(agent, MAX_AGENT),
            attempts: 0,
        };

        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.queue_capacity {
            queue.pop_front();
            metrics::counter!("worker_queue_dropped_total").increment(1);
            tracing::warn!("worker queue full, dropped oldest pending record");
        }
        queue.push_back(record);
    }

    pub fn pending_workers(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Merge one API page into the cache and advance the cursor.
    pub fn merge_users(&self, users: Vec<ApiUser>) -> usize {
        let mut merged = 0;
        for user in users {
            let max = self.last_max_user_id.load(Ordering::Acquire);
            if user.puid > max {
                self.last_max_user_id.store(user.puid, Ordering::Release);
            }
            self.names.insert(user.puname.to_lowercase(), user.puid);
            merged += 1;
        }
        merged
    }

    /// Fetch one page past the current cursor. Network or decode failures
    /// leave the cache untouched; the next tick retries.
    pub async fn refresh_once(&self) -> Result<usize> {
        let since = self.last_max_user_id.load(Ordering::Acquire);
        let url = format!("{}?last_id={}", self.api_url, since);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| StratumError::UserApi {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StratumError::UserApi {
                message: format!("{} returned {}", url, response.status()),
            });
        }

        let users: Vec<ApiUser> =
            response
                .json()
                .await
                .map_err(|e| StratumError::UserApi {
                    message: format!("malformed user list: {e}"),
                })?;

        Ok(self.merge_users(users))
    }

    /// Drain a batch from the worker queue into the database. Records
    /// failing the upsert are re-queued with bounded retry.
    pub async fn drain_once(&self) {
        let batch: Vec<WorkerRecord> = {
            let mut queue = self.queue.lock().unwrap();
            let take = queue.len().min(DRAIN_BATCH);
            queue.drain(..take).collect()
        };

        for mut record in batch {
            let result = ingot_model::entities::workers::Model::upsert(
                &self.database.connection,
                record.user_id,
                record.worker_id,
                &record.name,
                &record.agent,
            )
            .await;

            if let Err(e) = result {
                record.attempts += 1;
                if record.attempts >= MAX_UPSERT_ATTEMPTS {
                    tracing::error!(
                        "giving up on worker record {}/{}: {}",
                        record.user_id,
                        record.worker_id,
                        e
                    );
                } else {
                    tracing::warn!("worker upsert failed, re-queueing: {}", e);
                    self.queue.lock().unwrap().push_back(record);
                }
            } else {
                metrics::counter!("worker_persisted_total").increment(1);
            }
        }
    }

    /// Spawn the refresh loop and the worker writer.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::Release);

        let refresh = tokio::spawn({
            let registry = Arc::clone(&self);
            async move {
                let mut ticker = tokio::time::interval(registry.refresh_interval);
                while registry.is_running() {
                    ticker.tick().await;
                    match registry.refresh_once().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!("merged {} users from api", n),
                        Err(e) => tracing::warn!("user refresh failed: {}", e),
                    }
                }
            }
        });

        let writer = tokio::spawn({
            let registry = Arc::clone(&self);
            async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(500));
                while registry.is_running() {
                    ticker.tick().await;
                    registry.drain_once().await;
                }
            }
        });

        vec![refresh, writer]
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
