pub mod finalise;

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::models::{Artifact, OutputKind, OutputRecord, Status};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no output named {0}")]
    UnknownUid(String),
    #[error("an output named {0} already exists")]
    DuplicateUid(String),
}

/// In-session store of checked outputs, keyed by uid.
///
/// Insertion order is preserved for listing and export; uids are minted
/// from a monotonic counter so removal never recycles a name.
#[derive(Debug, Default)]
pub struct Ledger {
    records: Vec<OutputRecord>,
    next_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, minting its uid. Minting skips names already
    /// taken by caller-chosen or renamed records.
    pub fn add(&mut self, mut record: OutputRecord) -> String {
        let uid = loop {
            let candidate = format!("output_{}", self.next_id);
            self.next_id += 1;
            if !self.records.iter().any(|r| r.uid == candidate) {
                break candidate;
            }
        };
        record.uid = uid.clone();
        info!(uid = %record.uid, status = record.status.as_str(), "recorded output");
        self.records.push(record);
        uid
    }

    /// Append a record under a caller-chosen uid.
    pub fn add_named(
        &mut self,
        uid: impl Into<String>,
        mut record: OutputRecord,
    ) -> Result<String, LedgerError> {
        let uid = uid.into();
        if self.records.iter().any(|r| r.uid == uid) {
            return Err(LedgerError::DuplicateUid(uid));
        }
        record.uid = uid.clone();
        info!(uid = %record.uid, status = record.status.as_str(), "recorded output");
        self.records.push(record);
        Ok(uid)
    }

    /// Register an externally-produced file as a record. Such outputs
    /// cannot be checked automatically and always need human review.
    pub fn custom_output(&mut self, path: PathBuf, comment: impl Into<String>) -> String {
        let comment = comment.into();
        let mut record = OutputRecord::new(
            Status::Review,
            OutputKind::Custom,
            format!("custom: {}", path.display()),
        );
        record.summary = "review".to_string();
        record.artifacts.push(Artifact::File(path));
        if !comment.is_empty() {
            record.comments.push(comment);
        }
        self.add(record)
    }

    pub fn get(&self, uid: &str) -> Result<&OutputRecord, LedgerError> {
        self.records
            .iter()
            .find(|r| r.uid == uid)
            .ok_or_else(|| LedgerError::UnknownUid(uid.to_string()))
    }

    fn get_mut(&mut self, uid: &str) -> Result<&mut OutputRecord, LedgerError> {
        self.records
            .iter_mut()
            .find(|r| r.uid == uid)
            .ok_or_else(|| LedgerError::UnknownUid(uid.to_string()))
    }

    /// Give a record a researcher-chosen name.
    pub fn rename(&mut self, uid: &str, new_uid: &str) -> Result<(), LedgerError> {
        if self.records.iter().any(|r| r.uid == new_uid) {
            return Err(LedgerError::DuplicateUid(new_uid.to_string()));
        }
        let record = self.get_mut(uid)?;
        info!(from = %uid, to = %new_uid, "renamed output");
        record.uid = new_uid.to_string();
        Ok(())
    }

    pub fn remove(&mut self, uid: &str) -> Result<OutputRecord, LedgerError> {
        let pos = self
            .records
            .iter()
            .position(|r| r.uid == uid)
            .ok_or_else(|| LedgerError::UnknownUid(uid.to_string()))?;
        info!(uid = %uid, "removed output");
        Ok(self.records.remove(pos))
    }

    pub fn add_comment(&mut self, uid: &str, comment: impl Into<String>) -> Result<(), LedgerError> {
        self.get_mut(uid)?.comments.push(comment.into());
        Ok(())
    }

    /// Attach the justification that unblocks export of a non-pass
    /// record.
    pub fn add_exception(&mut self, uid: &str, reason: impl Into<String>) -> Result<(), LedgerError> {
        let record = self.get_mut(uid)?;
        record.exception = reason.into();
        info!(uid = %uid, "exception recorded");
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.uid.as_str()).collect()
    }

    pub fn records(&self) -> &[OutputRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputKind, OutputRecord, Status};

    fn record(status: Status) -> OutputRecord {
        OutputRecord::new(status, OutputKind::Table, "crosstab year grant_type")
    }

    #[test]
    fn test_uids_are_minted_in_order() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.add(record(Status::Pass)), "output_0");
        assert_eq!(ledger.add(record(Status::Fail)), "output_1");
        assert_eq!(ledger.keys(), vec!["output_0", "output_1"]);
    }

    #[test]
    fn test_uids_never_recycled_after_remove() {
        let mut ledger = Ledger::new();
        ledger.add(record(Status::Pass));
        ledger.add(record(Status::Pass));
        ledger.remove("output_1").unwrap();
        assert_eq!(ledger.add(record(Status::Pass)), "output_2");
    }

    #[test]
    fn test_add_named() {
        let mut ledger = Ledger::new();
        ledger.add_named("baseline", record(Status::Pass)).unwrap();
        assert!(ledger.get("baseline").is_ok());
        assert!(matches!(
            ledger.add_named("baseline", record(Status::Pass)),
            Err(LedgerError::DuplicateUid(_))
        ));
        // minted uids are unaffected by named entries
        assert_eq!(ledger.add(record(Status::Pass)), "output_0");
    }

    #[test]
    fn test_minting_skips_taken_uids() {
        let mut ledger = Ledger::new();
        ledger.add_named("output_0", record(Status::Pass)).unwrap();
        assert_eq!(ledger.add(record(Status::Pass)), "output_1");

        // renaming onto the minted namespace must not collide either
        ledger.add(record(Status::Pass));
        ledger.rename("output_2", "output_3").unwrap();
        assert_eq!(ledger.add(record(Status::Pass)), "output_4");

        let mut keys = ledger.keys();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), ledger.len());
    }

    #[test]
    fn test_rename() {
        let mut ledger = Ledger::new();
        ledger.add(record(Status::Pass));
        ledger.rename("output_0", "grant_by_year").unwrap();
        assert!(ledger.get("grant_by_year").is_ok());
        assert!(matches!(
            ledger.get("output_0"),
            Err(LedgerError::UnknownUid(_))
        ));
    }

    #[test]
    fn test_rename_rejects_duplicates() {
        let mut ledger = Ledger::new();
        ledger.add(record(Status::Pass));
        ledger.add(record(Status::Pass));
        assert!(matches!(
            ledger.rename("output_1", "output_0"),
            Err(LedgerError::DuplicateUid(_))
        ));
    }

    #[test]
    fn test_comments_and_exception() {
        let mut ledger = Ledger::new();
        ledger.add(record(Status::Fail));
        ledger.add_comment("output_0", "cell counts verified by hand").unwrap();
        ledger
            .add_exception("output_0", "aggregates previously approved")
            .unwrap();
        let record = ledger.get("output_0").unwrap();
        assert_eq!(record.comments.len(), 1);
        assert!(!record.needs_exception());
    }

    #[test]
    fn test_custom_output_needs_review() {
        let mut ledger = Ledger::new();
        let uid = ledger.custom_output("plots/hist.png".into(), "histogram of residuals");
        let record = ledger.get(&uid).unwrap();
        assert_eq!(record.status, Status::Review);
        assert_eq!(record.kind, OutputKind::Custom);
        assert!(record.needs_exception());
    }

    #[test]
    fn test_missing_uid_errors() {
        let mut ledger = Ledger::new();
        assert!(ledger.remove("output_9").is_err());
        assert!(ledger.add_comment("output_9", "x").is_err());
    }
}
