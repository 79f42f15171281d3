use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::job::{ExtendedJob, StratumJob};
use crate::services::kafka::JobConsumer;
use crate::utils::time;

/// A job ready for fan-out, paired with the clean_jobs flag the broadcast
/// should carry.
#[derive(Debug, Clone)]
pub struct Notification {
    pub exjob: Arc<ExtendedJob>,
    pub clean: bool,
}

/// Holds the currently-mineable job set.
///
/// Ingests templates from the job topic, retires jobs when the chain tip
/// moves, evicts expired templates and drives the idle re-notify cadence.
/// All map state sits under one lock so a clean transition is atomic with
/// respect to `get_latest`.
#[derive(Debug)]
pub struct Repository {
    inner: Mutex<Inner>,
    notify_tx: broadcast::Sender<Notification>,
    job_lifetime: Duration,
    notify_interval: Duration,
    running: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    jobs: BTreeMap<u64, Arc<ExtendedJob>>,
    latest_prev_hash: Option<[u8; 32]>,
    last_notify: Option<Instant>,
}

impl Repository {
    pub fn new(config: &Config) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner {
                jobs: BTreeMap::new(),
                latest_prev_hash: None,
                last_notify: None,
            }),
            notify_tx,
            job_lifetime: config.limiter.job_lifetime,
            notify_interval: config.limiter.notify_interval,
            running: AtomicBool::new(true),
        }
    }

    /// Receiver for job fan-out; the connection server drains this.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    /// Ingest one decoded template. Computes the clean flag from the
    /// observed chain tip, retires the previous tip's jobs when it moved,
    /// stores the enriched job and queues the broadcast.
    pub fn insert_template(&self, job: StratumJob) -> Arc<ExtendedJob> {
        let prev_hash = job.prev_hash_bytes();
        let job_id = job.job_id;

        let exjob = {
            let mut inner = self.inner.lock().unwrap();

            let is_clean = inner.latest_prev_hash != Some(prev_hash);
            if is_clean {
                for existing in inner.jobs.values() {
                    existing.mark_stale();
                }
                inner.latest_prev_hash = Some(prev_hash);
            }

            let exjob = Arc::new(ExtendedJob::new(job, is_clean));
            inner.jobs.insert(job_id, exjob.clone());
            inner.last_notify = Some(Instant::now());
            exjob
        };

        metrics::counter!("job_received_total").increment(1);
        if exjob.is_clean() {
            metrics::counter!("job_chain_tip_total").increment(1);
        }
        tracing::info!(
            "new job {} height {} clean {}",
            exjob.job_id(),
            exjob.job().height,
            exjob.is_clean()
        );

        let _ = self.notify_tx.send(Notification {
            clean: exjob.is_clean(),
            exjob: exjob.clone(),
        });
        exjob
    }

    /// Share-validation lookup.
    pub fn get(&self, job_id: u64) -> Option<Arc<ExtendedJob>> {
        self.inner.lock().unwrap().jobs.get(&job_id).cloned()
    }

    /// Most recently accepted job that is still mineable.
    pub fn get_latest(&self) -> Option<Arc<ExtendedJob>> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .values()
            .rev()
            .find(|job| !job.is_stale())
            .cloned()
    }

    /// Bulk MINING -> STALE transition, used on chain reorganization.
    pub fn mark_all_stale(&self) {
        let inner = self.inner.lock().unwrap();
        for job in inner.jobs.values() {
            job.mark_stale();
        }
    }

    pub fn job_count(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    /// One cadence pass: evict expired templates, then re-broadcast the
    /// latest job (clean_jobs=false) if the notify interval has lapsed.
    /// Keeps idle miners synchronized across NATs that drop quiet flows.
    pub fn tick(&self) {
        let now = time::unix_timestamp();
        let lifetime = self.job_lifetime.as_secs();

        let refresh = {
            let mut inner = self.inner.lock().unwrap();

            let before = inner.jobs.len();
            inner
                .jobs
                .retain(|_, job| now.saturating_sub(job.job().n_time as u64) <= lifetime);
            let evicted = before - inner.jobs.len();
            if evicted > 0 {
                metrics::counter!("job_expired_total").increment(evicted as u64);
                tracing::debug!("evicted {} expired jobs", evicted);
            }

            let due = inner
                .last_notify
                .map(|at| at.elapsed() >= self.notify_interval)
                .unwrap_or(false);
            if due {
                inner.last_notify = Some(Instant::now());
            }
            due
        };

        if refresh {
            if let Some(exjob) = self.get_latest() {
                metrics::counter!("job_refresh_total").increment(1);
                let _ = self.notify_tx.send(Notification {
                    exjob,
                    clean: false,
                });
            }
        }
    }

    /// Spawn the ingest task and the cadence task.
    pub fn start(self: Arc<Self>, consumer: JobConsumer) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::Release);

        let ingest = tokio::spawn({
            let repo = Arc::clone(&self);
            async move {
                while repo.is_running() {
                    match consumer.recv().await {
                        Ok(payload) => match StratumJob::decode(&payload) {
                            Ok(job) => {
                                repo.insert_template(job);
                            }
                            Err(e) => {
                                tracing::warn!("discarding undecodable job message: {}", e);
                            }
                        },
                        Err(e) => {
                            tracing::error!("job consumer error: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        let cadence = tokio::spawn({
            let repo = Arc::clone(&self);
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                while repo.is_running() {
                    ticker.tick().await;
                    repo.tick();
                }
            }
        });

        vec![ingest, cadence]
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
