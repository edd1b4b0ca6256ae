//! Human readable document numbers: `<prefix><YYYYMMDD><sequence>`
use chrono::NaiveDate;

use super::error::{Result, WorkflowError};
use super::utils;

pub const MIN_SEQUENCE_WIDTH: usize = 3;

/// One counter per `(prefix, date)`, advanced with compare-and-swap so concurrent
/// callers never share or skip a value.
#[derive(Clone)]
pub struct NumberingService {
    sequences: sled::Tree,
    width: usize,
}

impl NumberingService {
    pub fn new(instance: &sled::Db, width: usize) -> Result<Self> {
        Ok(Self {
            sequences: instance.open_tree("sequences")?,
            width: width.max(MIN_SEQUENCE_WIDTH),
        })
    }

    pub fn next(&self, prefix: &str, date: NaiveDate) -> Result<String> {
        let updated = self
            .sequences
            .update_and_fetch(counter_key(prefix, date), |old| {
                let current = old.and_then(utils::decode_u64).unwrap_or(0);
                Some(current.saturating_add(1).to_be_bytes().to_vec())
            })?;
        let seq = updated
            .as_deref()
            .and_then(utils::decode_u64)
            .ok_or_else(|| WorkflowError::Encoding(format!("corrupt counter for {prefix}")))?;

        Ok(self.format(prefix, date, seq))
    }

    /// Last value handed out for `(prefix, date)`, zero if none
    pub fn current(&self, prefix: &str, date: NaiveDate) -> Result<u64> {
        Ok(self
            .sequences
            .get(counter_key(prefix, date))?
            .as_deref()
            .and_then(utils::decode_u64)
            .unwrap_or(0))
    }

    fn format(&self, prefix: &str, date: NaiveDate, seq: u64) -> String {
        format!(
            "{prefix}{}{seq:0width$}",
            date.format("%Y%m%d"),
            width = self.width
        )
    }
}

fn counter_key(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}:{}", date.format("%Y%m%d"))
}
