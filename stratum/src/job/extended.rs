use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use primitive_types::U256;

use crate::error::{Result, StratumError};
use crate::job::StratumJob;
use crate::utils::hash;

/// Bytes of extranonce2 a miner may roll per job. Together with the 4-byte
/// session extranonce1 this fills the 8-byte extranonce slot in the
/// coinbase input script.
pub const EXTRANONCE2_SIZE: usize = 4;

/// A mining template enriched with everything the server derives once per
/// job instead of once per session: the split `mining.notify` fragments,
/// decoded coinbase halves, the nBits-derived network target and the
/// staleness flag.
///
/// Broadcast to a session is `notify1 + extranonce1_hex + notify2`; the
/// miner's extranonce2 slots in right after the session prefix, so `notify2`
/// is the suffix beyond the whole extranonce region.
#[derive(Debug)]
pub struct ExtendedJob {
    job: StratumJob,
    is_clean: bool,
    stale: AtomicBool,

    coinbase1_bin: Vec<u8>,
    coinbase2_bin: Vec<u8>,
    merkle_branch: Vec<[u8; 32]>,
    prev_hash: [u8; 32],
    network_target: U256,
    min_target: U256,

    notify1: String,
    notify2: String,
    notify2_clean: String,
}

impl ExtendedJob {
    pub fn new(job: StratumJob, is_clean: bool) -> Self {
        let coinbase1_bin = hex::decode(&job.coinbase1).unwrap_or_default();
        let coinbase2_bin = hex::decode(&job.coinbase2).unwrap_or_default();
        let merkle_branch = job.merkle_branch_bytes();
        let prev_hash = job.prev_hash_bytes();
        let network_target = hash::target_from_nbits(job.n_bits);
        let min_target = job.min_target_u256().unwrap_or(U256::MAX);

        let notify1 = Self::make_notify1(&job);
        let notify2 = Self::make_notify2(&job, false);
        let notify2_clean = Self::make_notify2(&job, true);

        Self {
            job,
            is_clean,
            stale: AtomicBool::new(false),
            coinbase1_bin,
            coinbase2_bin,
            merkle_branch,
            prev_hash,
            network_target,
            min_target,
            notify1,
            notify2,
            notify2_clean,
        }
    }

    pub fn job(&self) -> &StratumJob {
        &self.job
    }

    pub fn job_id(&self) -> u64 {
        self.job.job_id
    }

    pub fn is_clean(&self) -> bool {
        self.is_clean
    }

    pub fn network_target(&self) -> U256 {
        self.network_target
    }

    /// Easiest target shares may be checked against for this job.
    pub fn min_target(&self) -> U256 {
        self.min_target
    }

    /// Stale jobs keep validating shares (flagged for accounting) but are
    /// never re-broadcast. MINING -> STALE only; idempotent.
    pub fn mark_stale(&self) {
        self.stale.swap(true, Ordering::AcqRel);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Compose the per-session notify line. `clean` instructs miners to
    /// drop outstanding work; cadence re-broadcasts always pass `false`.
    pub fn notify_line(&self, extranonce1_hex: &str, clean: bool) -> String {
        let tail = if clean {
            &self.notify2_clean
        } else {
            &self.notify2
        };
        let mut line =
            String::with_capacity(self.notify1.len() + extranonce1_hex.len() + tail.len());
        line.push_str(&self.notify1);
        line.push_str(extranonce1_hex);
        line.push_str(tail);
        line
    }

    /// Materialize the coinbase transaction for one submission:
    /// `coinbase1 || be32(extranonce1) || extranonce2 || coinbase2`.
    pub fn coinbase(&self, extranonce1: u32, extranonce2_hex: &str) -> Result<Vec<u8>> {
        if extranonce2_hex.len() != EXTRANONCE2_SIZE * 2 {
            return Err(StratumError::MalformedExtranonce2 {
                value: extranonce2_hex.to_string(),
            });
        }
        let extranonce2 =
            hex::decode(extranonce2_hex).map_err(|_| StratumError::MalformedExtranonce2 {
                value: extranonce2_hex.to_string(),
            })?;

        let mut coinbase = Vec::with_capacity(
            self.coinbase1_bin.len() + 4 + EXTRANONCE2_SIZE + self.coinbase2_bin.len(),
        );
        coinbase.extend_from_slice(&self.coinbase1_bin);
        coinbase.extend_from_slice(&extranonce1.to_be_bytes());
        coinbase.extend_from_slice(&extranonce2);
        coinbase.extend_from_slice(&self.coinbase2_bin);
        Ok(coinbase)
    }

    /// Assemble the 80-byte candidate block header for a submission.
    ///
    /// The merkle root is the double-SHA256 of the coinbase folded with
    /// each branch hash in order; all header integers are little-endian.
    pub fn header(&self, coinbase: &[u8], n_time: u32, nonce: u32) -> [u8; 80] {
        let mut root = hash::dsha256(coinbase);
        for branch in &self.merkle_branch {
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&root);
            concat[32..].copy_from_slice(branch);
            root = hash::dsha256(&concat);
        }

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&self.job.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_hash);
        header[36..68].copy_from_slice(&root);
        header[68..72].copy_from_slice(&n_time.to_le_bytes());
        header[72..76].copy_from_slice(&self.job.n_bits.to_le_bytes());
        header[76..80].copy_from_slice(&nonce.to_le_bytes());
        header
    }

    /// Prefix of the notify payload up to the extranonce position inside
    /// the coinb1 parameter.
    fn make_notify1(job: &StratumJob) -> String {
        format!(
            "{{\"id\":null,\"method\":\"mining.notify\",\"params\":[\"{:x}\",\"{}\",\"{}",
            job.job_id,
            Self::prev_hash_stratum_hex(job),
            job.coinbase1,
        )
    }

    /// Suffix of the notify payload beyond the extranonce position.
    fn make_notify2(job: &StratumJob, clean: bool) -> String {
        let mut branches = String::new();
        for (i, branch) in job.merkle_branch.iter().enumerate() {
            if i > 0 {
                branches.push(',');
            }
            let _ = write!(branches, "\"{branch}\"");
        }
        format!(
            "\",\"{}\",[{}],\"{:08x}\",\"{:08x}\",\"{:08x}\",{}]}}\n",
            job.coinbase2, branches, job.version, job.n_bits, job.n_time, clean,
        )
    }

    /// Previous block hash in the wire encoding miners expect: eight
    /// little-endian u32 words, each rendered big-endian in hex.
    fn prev_hash_stratum_hex(job: &StratumJob) -> String {
        let bytes = job.prev_hash_bytes();
        let mut out = String::with_capacity(64);
        for word in bytes.chunks_exact(4) {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            let _ = write!(out, "{value:08x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash::hash_to_u256;
    use primitive_types::U256;

    fn sample_job() -> StratumJob {
        StratumJob {
            job_id: 0x1a2b,
            height: 840000,
            prev_hash: "0000000000000000000000000000000000000000000000000000000000000001"
                .to_string(),
            coinbase1: "0100000001".to_string(),
            coinbase2: "ffffffff00".to_string(),
            merkle_branch: vec![],
            version: 2,
            n_bits: 0x1d00ffff,
            n_time: 1_600_000_000,
            min_target: None,
        }
    }

    #[test]
    fn notify_line_is_valid_stratum_json() {
        let exjob = ExtendedJob::new(sample_job(), true);
        // extranonce1 followed by the miner's extranonce2 must still parse
        let line = {
            let base = exjob.notify_line("01000000", false);
            let split = base.find("\",\"ffffffff00\"").unwrap();
            let (head, tail) = base.split_at(split);
            format!("{head}00000000{tail}")
        };

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["method"], "mining.notify");
        let params = value["params"].as_array().unwrap();
        assert_eq!(params.len(), 9);
        assert_eq!(params[0], "1a2b");
        // coinb1 carries coinbase1 + extranonce1 + extranonce2
        assert_eq!(params[2], "01000000010100000000000000");
        assert_eq!(params[3], "ffffffff00");
        assert!(params[4].as_array().unwrap().is_empty());
        assert_eq!(params[5], "00000002");
        assert_eq!(params[6], "1d00ffff");
        assert_eq!(params[7], "5f5e1000");
        assert_eq!(params[8], false);
    }

    #[test]
    fn clean_flag_selects_fragment() {
        let exjob = ExtendedJob::new(sample_job(), true);
        assert!(exjob.notify_line("01000000", true).contains("true]}"));
        assert!(exjob.notify_line("01000000", false).contains("false]}"));
    }

    #[test]
    fn prev_hash_wire_encoding_swaps_words() {
        let job = sample_job();
        // BE display ...0001 -> LE bytes start with 01; first LE word is 1
        let encoded = ExtendedJob::prev_hash_stratum_hex(&job);
        assert_eq!(&encoded[..8], "00000001");
        assert_eq!(&encoded[8..], "0".repeat(56));
    }

    #[test]
    fn coinbase_assembly_inserts_both_extranonces() {
        let exjob = ExtendedJob::new(sample_job(), false);
        let coinbase = exjob.coinbase(0x01000000, "deadbeef").unwrap();
        assert_eq!(
            hex::encode(coinbase),
            "010000000101000000deadbeefffffffff00"
        );
    }

    #[test]
    fn coinbase_rejects_malformed_extranonce2() {
        let exjob = ExtendedJob::new(sample_job(), false);
        assert!(matches!(
            exjob.coinbase(1, "abc"),
            Err(StratumError::MalformedExtranonce2 { .. })
        ));
        assert!(matches!(
            exjob.coinbase(1, "abcdefgh"),
            Err(StratumError::MalformedExtranonce2 { .. })
        ));
        assert!(matches!(
            exjob.coinbase(1, "0011223344"),
            Err(StratumError::MalformedExtranonce2 { .. })
        ));
    }

    #[test]
    fn header_packs_fields_little_endian() {
        let exjob = ExtendedJob::new(sample_job(), false);
        let coinbase = exjob.coinbase(0x01000000, "00000000").unwrap();
        let header = exjob.header(&coinbase, 1_600_000_600, 0xcafebabe);

        assert_eq!(&header[0..4], &2i32.to_le_bytes());
        assert_eq!(header[4], 0x01);
        assert_eq!(&header[5..36], &[0u8; 31]);
        // empty branch: merkle root is the coinbase dsha256
        assert_eq!(&header[36..68], &hash::dsha256(&coinbase));
        assert_eq!(&header[68..72], &1_600_000_600u32.to_le_bytes());
        assert_eq!(&header[72..76], &0x1d00ffffu32.to_le_bytes());
        assert_eq!(&header[76..80], &0xcafebabeu32.to_le_bytes());
    }

    #[test]
    fn header_folds_merkle_branch_in_order() {
        let mut job = sample_job();
        job.merkle_branch = vec![
            "00000000000000000000000000000000000000000000000000000000000000aa".to_string(),
            "00000000000000000000000000000000000000000000000000000000000000bb".to_string(),
        ];
        let exjob = ExtendedJob::new(job, false);
        let coinbase = exjob.coinbase(1, "00000000").unwrap();
        let header = exjob.header(&coinbase, 1_600_000_000, 0);

        let mut expect = hash::dsha256(&coinbase);
        for branch in exjob.merkle_branch.iter() {
            let mut concat = Vec::with_capacity(64);
            concat.extend_from_slice(&expect);
            concat.extend_from_slice(branch);
            expect = hash::dsha256(&concat);
        }
        assert_eq!(&header[36..68], &expect);
    }

    #[test]
    fn stale_transition_is_one_way_and_idempotent() {
        let exjob = ExtendedJob::new(sample_job(), false);
        assert!(!exjob.is_stale());
        exjob.mark_stale();
        assert!(exjob.is_stale());
        exjob.mark_stale();
        assert!(exjob.is_stale());
    }

    #[test]
    fn missing_min_target_never_clamps() {
        let exjob = ExtendedJob::new(sample_job(), false);
        assert_eq!(exjob.min_target(), U256::MAX);
    }

    #[test]
    fn network_target_tracks_nbits() {
        let exjob = ExtendedJob::new(sample_job(), false);
        assert_eq!(
            exjob.network_target(),
            crate::utils::hash::target_from_nbits(0x1d00ffff)
        );
        assert!(hash_to_u256(&[0xffu8; 32]) > exjob.network_target());
    }
}
