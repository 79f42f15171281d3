use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::{mpsc, Notify};

use crate::session::SessionId;
use crate::share::DuplicateFilter;

/// Lines queued per connection before the peer is considered too slow and
/// the connection is closed.
pub const OUTBOX_CAPACITY: usize = 256;

/// Server-side handle for one miner connection.
///
/// The socket itself lives in the connection task; everything shared with
/// the broadcast path and the share pipeline sits here. Writes go through
/// a bounded outbox so one slow peer never blocks fan-out: when the outbox
/// is full the connection is torn down instead.
#[derive(Debug)]
pub struct Connection {
    session_id: SessionId,
    remote_addr: SocketAddr,
    outbox: mpsc::Sender<String>,
    shutdown: Notify,
    closed: AtomicBool,
    duplicates: Mutex<DuplicateFilter>,
    created_at: Instant,
}

impl Connection {
    pub fn new(session_id: SessionId, remote_addr: SocketAddr, outbox: mpsc::Sender<String>) -> Self {
        Self {
            session_id,
            remote_addr,
            outbox,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            duplicates: Mutex::new(DuplicateFilter::default()),
            created_at: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The session's extranonce1 is its session id.
    pub fn extranonce1(&self) -> u32 {
        self.session_id.as_u32()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Peer IPv4 address as a big-endian integer for the share record;
    /// zero for IPv6 peers.
    pub fn ip_u32(&self) -> u32 {
        match self.remote_addr.ip() {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => 0,
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Enqueue one protocol line. Returns false when the peer is closed or
    /// its outbox has hit the high-water mark; the caller tears the
    /// connection down in that case.
    pub fn send(&self, line: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbox.try_send(line).is_ok()
    }

    /// Ask the connection task to stop. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn closed_wait(&self) {
        self.shutdown.notified().await;
    }

    /// Record a submission tuple; false means it was already seen on this
    /// connection.
    pub fn record_submission(
        &self,
        job_id: u64,
        extranonce2: u64,
        ntime: u32,
        nonce: u32,
    ) -> bool {
        self.duplicates
            .lock()
            .unwrap()
            .insert(job_id, extranonce2, ntime, nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(capacity: usize) -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(
            SessionId::new(1, 7),
            "127.0.0.1:9999".parse().unwrap(),
            tx,
        );
        (conn, rx)
    }

    #[tokio::test]
    async fn send_enqueues_until_high_water_mark() {
        let (conn, mut rx) = connection(2);
        assert!(conn.send("a".into()));
        assert!(conn.send("b".into()));
        // outbox full: peer is too slow
        assert!(!conn.send("c".into()));
        assert_eq!(rx.recv().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn closed_connection_refuses_writes() {
        let (conn, _rx) = connection(8);
        conn.close();
        assert!(conn.is_closed());
        assert!(!conn.send("a".into()));
        // close is idempotent
        conn.close();
    }

    #[test]
    fn ip_is_encoded_big_endian() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(
            SessionId::new(1, 0),
            "127.0.0.1:3333".parse().unwrap(),
            tx,
        );
        assert_eq!(conn.ip_u32(), 0x7f000001);
    }

    #[test]
    fn duplicate_tracking_is_per_connection() {
        let (a, _rxa) = connection(1);
        let (b, _rxb) = connection(1);
        assert!(a.record_submission(1, 2, 3, 4));
        assert!(!a.record_submission(1, 2, 3, 4));
        assert!(b.record_submission(1, 2, 3, 4));
    }
}
