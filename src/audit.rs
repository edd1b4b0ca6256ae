//! Append-only audit trail, one entry per successful transition
use chrono::Utc;

use super::types::{RecordId, Role, TimeStamp};

/// Action name of the synthetic first entry written on creation
pub const CREATE_ACTION: &str = "create";
/// Action name written when a draft is physically removed
pub const DELETE_ACTION: &str = "delete";

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub record_id: RecordId,
    #[n(1)]
    pub sequence: u64, // position in the trail, starting at 1
    #[n(2)]
    pub action: String,
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub role: Role,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>, // issued when the transition is staged
    #[n(6)]
    pub comment: Option<String>,
    #[n(7)]
    pub from_status: Option<String>, // none for the creation entry
    #[n(8)]
    pub to_status: String,
    #[n(9)]
    pub prev_digest: Option<String>, // digest of the previous entry in this trail
}

impl AuditEntry {
    /// Returns the sha256 of the entry and its cbor encoding
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
    pub fn digest(&self) -> anyhow::Result<String> {
        Ok(self.build()?.0)
    }
}

/// Checks the trail is contiguous and every entry still hashes to what its successor recorded.
pub fn verify_chain(entries: &[AuditEntry]) -> anyhow::Result<bool> {
    let mut previous: Option<String> = None;
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && entry.sequence != entries[i - 1].sequence + 1 {
            return Ok(false);
        }
        if entry.prev_digest != previous {
            return Ok(false);
        }
        previous = Some(entry.digest()?);
    }
    Ok(true)
}
