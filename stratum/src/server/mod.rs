mod connection;

pub use connection::{Connection, OUTBOX_CAPACITY};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use primitive_types::U256;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Result, StratumError};
use crate::job::{self, Notification};
use crate::services::kafka::ShareSink;
use crate::session::{Allocator, SessionId};
use crate::share::{FoundBlock, Share, ShareResult};
use crate::user;
use crate::utils::{hash, time};

/// Line-protocol collaborator driven by the connection server.
///
/// The server owns sockets, buffers and the connection table; the session
/// owns the Stratum state machine. Implementations respond through the
/// connection's outbox.
pub trait Session: Send + Sync {
    /// One complete line received from the peer.
    fn on_read(&self, line: &str);
    /// The connection is gone; release session state.
    fn on_disconnect(&self);
    /// Unauthorized sessions are skipped by job fan-out.
    fn is_authorized(&self) -> bool;
}

/// Builds a session for each accepted connection.
pub trait SessionFactory: Send + Sync {
    fn on_connect(&self, conn: Arc<Connection>) -> Arc<dyn Session>;
}

/// A parsed `mining.submit` tuple.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: u64,
    pub extranonce2_hex: String,
    pub ntime: u32,
    pub nonce: u32,
}

/// Identity and difficulty attached to a submission by the authorized
/// session. The target is the session's difficulty expressed as the bound
/// the share hash must meet.
#[derive(Debug, Clone)]
pub struct Submitter {
    pub user_id: i32,
    pub worker_id: i64,
    pub full_name: String,
    pub difficulty: u64,
    pub target: U256,
}

struct Entry {
    conn: Arc<Connection>,
    session: Arc<dyn Session>,
}

/// The connection server: listener, connection table, notify fan-out and
/// the share pipeline.
pub struct Server {
    config: Arc<Config>,
    allocator: Allocator,
    repository: Arc<job::Repository>,
    registry: Arc<user::Registry>,
    connections: DashMap<SessionId, Entry>,
    sink: Arc<dyn ShareSink>,
    simulator: bool,
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<job::Repository>,
        registry: Arc<user::Registry>,
        sink: Arc<dyn ShareSink>,
    ) -> Self {
        let simulator = config.server.simulator;
        if simulator {
            tracing::warn!("simulator mode enabled: every well-formed share will be accepted");
        }
        Self {
            allocator: Allocator::new(config.server.id),
            config,
            repository,
            registry,
            connections: DashMap::new(),
            sink,
            simulator,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn repository(&self) -> &Arc<job::Repository> {
        &self.repository
    }

    pub fn registry(&self) -> &Arc<user::Registry> {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Bind the configured listen address. Failure here is fatal for
    /// startup; the caller exits non-zero.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.server.bind_address)
            .await
            .map_err(|e| StratumError::Connection {
                message: format!(
                    "cannot bind {}: {}",
                    self.config.server.bind_address, e
                ),
                remote_addr: None,
            })?;

        tracing::info!(
            "stratum server {} listening on {}",
            self.config.server.id,
            listener.local_addr()?
        );
        Ok(listener)
    }

    /// Run the accept loop. Job notifications are fanned out from a
    /// dedicated task for as long as the server runs.
    pub async fn run(self: Arc<Self>, listener: TcpListener, factory: Arc<dyn SessionFactory>) {
        let _fanout: JoinHandle<()> = tokio::spawn({
            let server = Arc::clone(&self);
            let mut rx = self.repository.subscribe();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(notification) => server.send_notify_all(&notification),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("fan-out lagged, skipped {} notifications", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let session_id = match self.allocator.allocate() {
                        Ok(id) => id,
                        Err(_) => {
                            // no response: the id space is the scarce
                            // resource, not this socket
                            tracing::error!("session ids exhausted, dropping {}", addr);
                            metrics::counter!("session_id_exhausted_total").increment(1);
                            drop(socket);
                            continue;
                        }
                    };

                    tracing::info!("miner connected from {} as {}", addr, session_id);
                    metrics::counter!("connections_accepted_total").increment(1);

                    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
                    let conn = Arc::new(Connection::new(session_id, addr, tx));
                    let session = factory.on_connect(conn.clone());
                    self.connections.insert(
                        session_id,
                        Entry {
                            conn: conn.clone(),
                            session: session.clone(),
                        },
                    );

                    tokio::spawn({
                        let server = Arc::clone(&self);
                        async move {
                            connection_loop(socket, conn.clone(), session.clone(), rx).await;
                            server.remove_connection(&conn, session.as_ref());
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                }
            }
        }
    }

    fn remove_connection(&self, conn: &Arc<Connection>, session: &dyn Session) {
        self.connections.remove(&conn.session_id());
        self.allocator.free(conn.session_id());
        session.on_disconnect();
        metrics::counter!("connections_closed_total").increment(1);
        tracing::info!(
            "miner {} disconnected after {:.0?}",
            conn.session_id(),
            conn.age()
        );
    }

    /// Fan one job out to every authorized session. Best effort: a slow
    /// peer is closed, never waited on.
    pub fn send_notify_all(&self, notification: &Notification) {
        let mut sent = 0usize;
        for entry in self.connections.iter() {
            if !entry.session.is_authorized() {
                continue;
            }
            let line = notification.exjob.notify_line(
                &entry.conn.session_id().extranonce1_hex(),
                notification.clean,
            );
            if entry.conn.send(line) {
                sent += 1;
            } else {
                tracing::warn!(
                    "closing slow connection {}",
                    entry.conn.session_id()
                );
                entry.conn.close();
            }
        }
        metrics::counter!("notify_sent_total").increment(sent as u64);
        tracing::debug!(
            "job {} notified to {} sessions",
            notification.exjob.job_id(),
            sent
        );
    }

    /// Send the current difficulty and latest job to one freshly
    /// authorized session.
    pub fn greet_authorized(&self, conn: &Connection, difficulty: u64) {
        let set_difficulty = format!(
            "{{\"id\":null,\"method\":\"mining.set_difficulty\",\"params\":[{difficulty}]}}\n"
        );
        conn.send(set_difficulty);
        if let Some(exjob) = self.repository.get_latest() {
            conn.send(exjob.notify_line(&conn.session_id().extranonce1_hex(), true));
        }
    }

    /// Validate one submission and emit the outcome.
    ///
    /// Classification order: job lookup, time windows, staleness, coinbase
    /// assembly, duplicate filter, hash, target comparison. Every
    /// classification except a malformed extranonce2 is written to the
    /// share topic; solving shares additionally carry header and coinbase
    /// bytes to the solved topic.
    pub fn submit_share(
        &self,
        conn: &Connection,
        submitter: &Submitter,
        submission: &Submission,
    ) -> ShareResult {
        metrics::counter!("shares_submitted_total").increment(1);

        let now = time::unix_timestamp() as u32;
        let mut share = Share {
            job_id: submission.job_id,
            worker_id: submitter.worker_id,
            user_id: submitter.user_id,
            session_id: conn.session_id().as_u32(),
            ip: conn.ip_u32(),
            share_diff: submitter.difficulty,
            ntime: submission.ntime,
            nonce: submission.nonce,
            extranonce2: 0,
            height: 0,
            result: ShareResult::Accepted,
            timestamp: now,
        };

        let exjob = match self.repository.get(submission.job_id) {
            Some(exjob) => exjob,
            None => {
                return self.finish(&mut share, ShareResult::JobNotFound, None);
            }
        };
        share.height = exjob.job().height;

        let window = self.config.limiter.share_time_window.as_secs() as u32;
        let job_time = exjob.job().n_time;
        if submission.ntime < job_time {
            return self.finish(&mut share, ShareResult::TimeTooOld, None);
        }
        if submission.ntime > job_time.saturating_add(window)
            || submission.ntime > now.saturating_add(window)
        {
            return self.finish(&mut share, ShareResult::TimeTooNew, None);
        }
        if now.saturating_sub(submission.ntime) > window {
            return self.finish(&mut share, ShareResult::TimeTooOld, None);
        }

        share.extranonce2 =
            u64::from_str_radix(&submission.extranonce2_hex, 16).unwrap_or_default();

        // stale jobs skip assembly entirely; the share is still logged for
        // accounting and anti-cheat telemetry
        if exjob.is_stale() {
            return self.finish(&mut share, ShareResult::StaleShare, None);
        }

        let coinbase = match exjob.coinbase(conn.extranonce1(), &submission.extranonce2_hex) {
            Ok(coinbase) => coinbase,
            Err(_) => {
                // nothing logged: the tuple cannot be represented
                metrics::counter!("shares_malformed_total").increment(1);
                return ShareResult::MalformedExtranonce2;
            }
        };

        if !conn.record_submission(
            submission.job_id,
            share.extranonce2,
            submission.ntime,
            submission.nonce,
        ) {
            return self.finish(&mut share, ShareResult::DuplicateShare, None);
        }

        let header = exjob.header(&coinbase, submission.ntime, submission.nonce);
        let digest = hash::dsha256(&header);
        let value = hash::hash_to_u256(&digest);

        if self.simulator {
            return self.finish(&mut share, ShareResult::Accepted, None);
        }

        let worker_target = submitter.target.min(exjob.min_target());
        if value > worker_target {
            return self.finish(&mut share, ShareResult::LowDifficulty, None);
        }

        if value <= exjob.network_target() {
            let block = FoundBlock {
                job_id: submission.job_id,
                worker_id: submitter.worker_id,
                user_id: submitter.user_id,
                height: share.height,
                header,
                coinbase,
                worker_full_name: submitter.full_name.clone(),
            };
            tracing::info!(
                "block solved at height {} by {} (difficulty {})",
                share.height,
                submitter.full_name,
                hash::difficulty_of_hash(value)
            );
            return self.finish(&mut share, ShareResult::SolvedBlock, Some(block));
        }

        self.finish(&mut share, ShareResult::Accepted, None)
    }

    fn finish(
        &self,
        share: &mut Share,
        result: ShareResult,
        block: Option<FoundBlock>,
    ) -> ShareResult {
        share.result = result;

        if result.is_accepted() {
            metrics::counter!("shares_accepted_total").increment(1);
        } else {
            metrics::counter!("shares_rejected_total", "reason" => result.reject_reason())
                .increment(1);
        }

        if result.is_logged() {
            self.sink.share_log(share);
        }
        if let Some(block) = block {
            metrics::counter!("blocks_found_total").increment(1);
            self.sink.solved_share(&block, share);
        }

        result
    }

    /// Flush producers and close every connection.
    pub fn stop(&self) {
        self.repository.stop();
        self.registry.stop();
        for entry in self.connections.iter() {
            entry.conn.close();
        }
        self.sink.flush(Duration::from_secs(5));
    }
}

/// Per-connection I/O loop: reads lines into the session, drains the
/// outbox onto the socket, exits on EOF, error or close.
async fn connection_loop(
    socket: TcpStream,
    conn: Arc<Connection>,
    session: Arc<dyn Session>,
    mut outbox: mpsc::Receiver<String>,
) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            // next_line is cancellation safe: partial reads survive the
            // other branches firing
            read = lines.next_line() => {
                match read {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            session.on_read(trimmed);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("read error on {}: {}", conn.session_id(), e);
                        break;
                    }
                }
            }
            queued = outbox.recv() => {
                match queued {
                    Some(message) => {
                        if write_half.write_all(message.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = conn.closed_wait() => break,
        }
    }

    conn.close();
}
