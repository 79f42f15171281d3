use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};
use crate::utils::hash;

/// A mining template as it arrives on the job topic.
///
/// Templates are produced pre-assembled by the job maker and serialized as
/// self-describing JSON; unknown fields are ignored so producer and server
/// can roll independently. `prev_hash` and `min_target` use the big-endian
/// display encoding, coinbase parts and merkle branch entries are plain hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumJob {
    pub job_id: u64,
    pub height: i32,
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    #[serde(default)]
    pub merkle_branch: Vec<String>,
    pub version: i32,
    pub n_bits: u32,
    pub n_time: u32,
    /// Easiest target a share may be validated against, regardless of the
    /// session's difficulty setting.
    #[serde(default)]
    pub min_target: Option<String>,
}

impl StratumJob {
    /// Decode a template from a bus message payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let job: StratumJob =
            serde_json::from_slice(payload).map_err(|e| StratumError::JobDecode {
                message: e.to_string(),
            })?;
        job.check()?;
        Ok(job)
    }

    fn check(&self) -> Result<()> {
        if hash::hash_from_be_hex(&self.prev_hash).is_none() {
            return Err(StratumError::JobDecode {
                message: format!("bad prev_hash: {}", self.prev_hash),
            });
        }
        if hex::decode(&self.coinbase1).is_err() || hex::decode(&self.coinbase2).is_err() {
            return Err(StratumError::JobDecode {
                message: "bad coinbase hex".to_string(),
            });
        }
        for branch in &self.merkle_branch {
            if hash::hash_from_be_hex(branch).is_none() {
                return Err(StratumError::JobDecode {
                    message: format!("bad merkle branch entry: {branch}"),
                });
            }
        }
        Ok(())
    }

    /// Previous block hash in internal little-endian byte order.
    pub fn prev_hash_bytes(&self) -> [u8; 32] {
        hash::hash_from_be_hex(&self.prev_hash).unwrap_or([0u8; 32])
    }

    /// Merkle branch in internal little-endian byte order.
    pub fn merkle_branch_bytes(&self) -> Vec<[u8; 32]> {
        self.merkle_branch
            .iter()
            .filter_map(|s| hash::hash_from_be_hex(s))
            .collect()
    }

    /// Floor target for share validation, when the template carries one.
    pub fn min_target_u256(&self) -> Option<U256> {
        let raw = self.min_target.as_deref()?;
        let bytes = hex::decode(raw).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        Some(U256::from_big_endian(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "job_id": 6645_u64,
            "height": 840000,
            "prev_hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "coinbase1": "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020011",
            "coinbase2": "ffffffff0100f2052a010000001976a914000000000000000000000000000000000000000088ac00000000",
            "merkle_branch": [],
            "version": 0x20000000,
            "n_bits": 0x1703255cu32,
            "n_time": 1713538800,
        })
    }

    #[test]
    fn decodes_wire_json() {
        let payload = sample_json().to_string();
        let job = StratumJob::decode(payload.as_bytes()).unwrap();
        assert_eq!(job.job_id, 6645);
        assert_eq!(job.height, 840000);
        assert!(job.merkle_branch.is_empty());
        assert!(job.min_target.is_none());
    }

    #[test]
    fn ignores_unknown_fields() {
        let mut value = sample_json();
        value["gbt_hash"] = serde_json::json!("deadbeef");
        let job = StratumJob::decode(value.to_string().as_bytes()).unwrap();
        assert_eq!(job.job_id, 6645);
    }

    #[test]
    fn rejects_garbage_and_bad_hex() {
        assert!(StratumJob::decode(b"not json").is_err());

        let mut value = sample_json();
        value["prev_hash"] = serde_json::json!("xyz");
        assert!(StratumJob::decode(value.to_string().as_bytes()).is_err());

        let mut value = sample_json();
        value["coinbase1"] = serde_json::json!("0g");
        assert!(StratumJob::decode(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn ntime_zero_is_accepted() {
        let mut value = sample_json();
        value["n_time"] = serde_json::json!(0);
        let job = StratumJob::decode(value.to_string().as_bytes()).unwrap();
        assert_eq!(job.n_time, 0);
    }

    #[test]
    fn prev_hash_bytes_are_little_endian() {
        let payload = sample_json().to_string();
        let job = StratumJob::decode(payload.as_bytes()).unwrap();
        let bytes = job.prev_hash_bytes();
        assert_eq!(bytes[31], 0x00);
        assert_eq!(bytes[0], 0x54);
    }
}
