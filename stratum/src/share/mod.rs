use std::collections::{HashSet, VecDeque};

/// Classification of one submitted share.
///
/// The numeric codes are stable: they are written into the `ShareLog`
/// record and reused by the session layer for Stratum JSON-RPC error
/// tuples, so renumbering breaks downstream accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareResult {
    Accepted,
    SolvedBlock,
    /// Met the target but the job was already retired; logged with this
    /// flag for accounting and anti-cheat telemetry.
    StaleShare,
    JobNotFound,
    DuplicateShare,
    LowDifficulty,
    TimeTooOld,
    TimeTooNew,
    MalformedExtranonce2,
}

impl ShareResult {
    pub fn as_code(&self) -> u32 {
        match self {
            ShareResult::Accepted => 1,
            ShareResult::SolvedBlock => 2,
            ShareResult::StaleShare => 5,
            ShareResult::JobNotFound => 21,
            ShareResult::DuplicateShare => 22,
            ShareResult::LowDifficulty => 23,
            ShareResult::TimeTooOld => 31,
            ShareResult::TimeTooNew => 32,
            ShareResult::MalformedExtranonce2 => 33,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ShareResult::Accepted | ShareResult::SolvedBlock)
    }

    /// Whether a record for this classification is written to `ShareLog`.
    /// Malformed submissions carry no decodable tuple, so nothing is
    /// logged for them.
    pub fn is_logged(&self) -> bool {
        !matches!(self, ShareResult::MalformedExtranonce2)
    }

    pub fn reject_reason(&self) -> &'static str {
        match self {
            ShareResult::Accepted => "accepted",
            ShareResult::SolvedBlock => "solved block",
            ShareResult::StaleShare => "stale share",
            ShareResult::JobNotFound => "job not found",
            ShareResult::DuplicateShare => "duplicate share",
            ShareResult::LowDifficulty => "low difficulty",
            ShareResult::TimeTooOld => "time too old",
            ShareResult::TimeTooNew => "time too new",
            ShareResult::MalformedExtranonce2 => "malformed extranonce2",
        }
    }
}

/// One share as written to the `ShareLog` topic. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub job_id: u64,
    pub worker_id: i64,
    pub user_id: i32,
    pub session_id: u32,
    pub ip: u32,
    pub share_diff: u64,
    pub ntime: u32,
    pub nonce: u32,
    pub extranonce2: u64,
    pub height: i32,
    pub result: ShareResult,
    pub timestamp: u32,
}

/// Size of the packed share record.
pub const SHARE_RECORD_SIZE: usize = 64;

impl Share {
    /// Fixed-layout little-endian encoding, tightly packed.
    pub fn to_bytes(&self) -> [u8; SHARE_RECORD_SIZE] {
        let mut out = [0u8; SHARE_RECORD_SIZE];
        out[0..8].copy_from_slice(&self.job_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.worker_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.user_id.to_le_bytes());
        out[20..24].copy_from_slice(&self.session_id.to_le_bytes());
        out[24..28].copy_from_slice(&self.ip.to_le_bytes());
        out[28..36].copy_from_slice(&self.share_diff.to_le_bytes());
        out[36..40].copy_from_slice(&self.ntime.to_le_bytes());
        out[40..44].copy_from_slice(&self.nonce.to_le_bytes());
        out[44..52].copy_from_slice(&self.extranonce2.to_le_bytes());
        out[52..56].copy_from_slice(&self.height.to_le_bytes());
        out[56..60].copy_from_slice(&self.result.as_code().to_le_bytes());
        out[60..64].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }
}

/// A block-solving share, carrying everything a downstream block submitter
/// needs to assemble and broadcast the block.
#[derive(Debug, Clone)]
pub struct FoundBlock {
    pub job_id: u64,
    pub worker_id: i64,
    pub user_id: i32,
    pub height: i32,
    pub header: [u8; 80],
    pub coinbase: Vec<u8>,
    pub worker_full_name: String,
}

impl FoundBlock {
    /// `SolvedShare` payload: the share record, the 80-byte header, then
    /// the coinbase transaction bytes.
    pub fn to_bytes(&self, share: &Share) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_RECORD_SIZE + 80 + self.coinbase.len());
        out.extend_from_slice(&share.to_bytes());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.coinbase);
        out
    }
}

/// Recently-seen submission tuples for one session.
///
/// A hit short-circuits validation before any hashing happens. Bounded;
/// the oldest tuple falls out once capacity is reached.
#[derive(Debug)]
pub struct DuplicateFilter {
    seen: HashSet<(u64, u64, u32, u32)>,
    order: VecDeque<(u64, u64, u32, u32)>,
    capacity: usize,
}

impl DuplicateFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a tuple; returns false when it was already present.
    pub fn insert(&mut self, job_id: u64, extranonce2: u64, ntime: u32, nonce: u32) -> bool {
        let key = (job_id, extranonce2, ntime, nonce);
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_share() -> Share {
        Share {
            job_id: 0x0102030405060708,
            worker_id: -2,
            user_id: 42,
            session_id: 0x01000000,
            ip: 0x7f000001,
            share_diff: 65536,
            ntime: 1_600_000_000,
            nonce: 0xdeadbeef,
            extranonce2: 0xcafe,
            height: 840000,
            result: ShareResult::Accepted,
            timestamp: 1_600_000_100,
        }
    }

    #[test]
    fn record_layout_is_little_endian_and_packed() {
        let bytes = sample_share().to_bytes();
        assert_eq!(bytes.len(), SHARE_RECORD_SIZE);
        assert_eq!(&bytes[0..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &(-2i64).to_le_bytes());
        assert_eq!(&bytes[16..20], &42i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x01000000u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &0x7f000001u32.to_le_bytes());
        assert_eq!(&bytes[28..36], &65536u64.to_le_bytes());
        assert_eq!(&bytes[56..60], &1u32.to_le_bytes());
        assert_eq!(&bytes[60..64], &1_600_000_100u32.to_le_bytes());
    }

    #[test]
    fn solved_payload_appends_header_and_coinbase() {
        let share = Share {
            result: ShareResult::SolvedBlock,
            ..sample_share()
        };
        let block = FoundBlock {
            job_id: share.job_id,
            worker_id: share.worker_id,
            user_id: share.user_id,
            height: share.height,
            header: [0xab; 80],
            coinbase: vec![1, 2, 3],
            worker_full_name: "alice.rig0".to_string(),
        };
        let payload = block.to_bytes(&share);
        assert_eq!(payload.len(), SHARE_RECORD_SIZE + 80 + 3);
        assert_eq!(&payload[..SHARE_RECORD_SIZE], &share.to_bytes());
        assert_eq!(&payload[SHARE_RECORD_SIZE..SHARE_RECORD_SIZE + 80], &[0xab; 80]);
        assert_eq!(&payload[SHARE_RECORD_SIZE + 80..], &[1, 2, 3]);
    }

    #[test]
    fn result_codes_are_stable() {
        assert_eq!(ShareResult::Accepted.as_code(), 1);
        assert_eq!(ShareResult::SolvedBlock.as_code(), 2);
        assert_eq!(ShareResult::StaleShare.as_code(), 5);
        assert_eq!(ShareResult::JobNotFound.as_code(), 21);
        assert_eq!(ShareResult::DuplicateShare.as_code(), 22);
        assert_eq!(ShareResult::LowDifficulty.as_code(), 23);
        assert_eq!(ShareResult::TimeTooOld.as_code(), 31);
        assert_eq!(ShareResult::TimeTooNew.as_code(), 32);
        assert_eq!(ShareResult::MalformedExtranonce2.as_code(), 33);
    }

    #[test]
    fn malformed_shares_are_never_logged() {
        assert!(!ShareResult::MalformedExtranonce2.is_logged());
        assert!(ShareResult::StaleShare.is_logged());
        assert!(ShareResult::DuplicateShare.is_logged());
    }

    #[test]
    fn duplicate_filter_detects_repeats() {
        let mut filter = DuplicateFilter::new(8);
        assert!(filter.insert(1, 2, 3, 4));
        assert!(!filter.insert(1, 2, 3, 4));
        assert!(filter.insert(1, 2, 3, 5));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn duplicate_filter_evicts_oldest() {
        let mut filter = DuplicateFilter::new(2);
        assert!(filter.insert(1, 0, 0, 0));
        assert!(filter.insert(2, 0, 0, 0));
        assert!(filter.insert(3, 0, 0, 0));
        // tuple 1 has been evicted and may be seen again
        assert!(filter.insert(1, 0, 0, 0));
        assert_eq!(filter.len(), 2);
    }
}
