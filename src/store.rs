//! Record store over sled trees
//!
//! Layout:
//! - `records`: `[type tag][uuid]` -> cbor `Record`
//! - `document_numbers`: `[type tag][number]` -> record key, unique per type
//! - `audit`: `[record key][sequence be]` -> cbor `AuditEntry`, plus
//!   `head[record key]` -> last sequence written for that record
//! - `resources`: resource code -> cbor `LinkedResource`
//!
//! Every write goes through one multi-tree transaction, so a record, its audit entry
//! and the stock it moves become visible together or not at all.
use std::collections::BTreeMap;
use std::sync::Arc;

use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult,
};

use super::audit::AuditEntry;
use super::error::{Result, WorkflowError};
use super::record::Record;
use super::resource::LinkedResource;
use super::side_effect::{Dispatcher, StockDelta};
use super::types::{DocumentType, RecordId};
use super::utils;

/// A record write plus everything that must commit with it
#[derive(Debug, Clone)]
pub(crate) struct UnitOfWork {
    pub record: Record,
    pub expected_version: u64, // zero for a record that must not exist yet
    pub audit: Option<AuditEntry>,
    pub stock: Vec<StockDelta>,
    pub fixed_lifecycle: bool, // status and document number must match what is stored
}

impl UnitOfWork {
    pub fn new(record: Record, expected_version: u64) -> Self {
        Self {
            record,
            expected_version,
            audit: None,
            stock: vec![],
            fixed_lifecycle: false,
        }
    }
    pub fn keeping_lifecycle(mut self) -> Self {
        self.fixed_lifecycle = true;
        self
    }
    pub fn audited(mut self, entry: AuditEntry) -> Self {
        self.audit = Some(entry);
        self
    }
    pub fn with_stock(mut self, stock: Vec<StockDelta>) -> Self {
        self.stock = stock;
        self
    }
}

#[derive(Clone)]
pub struct RecordStore {
    instance: Arc<sled::Db>,
    records: sled::Tree,
    numbers: sled::Tree,
    audit: sled::Tree,
    resources: sled::Tree,
}

impl RecordStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            records: instance.open_tree("records")?,
            numbers: instance.open_tree("document_numbers")?,
            audit: instance.open_tree("audit")?,
            resources: instance.open_tree("resources")?,
            instance,
        })
    }

    pub fn instance(&self) -> &Arc<sled::Db> {
        &self.instance
    }

    /// Record of the given type, `RecordNotFound` when absent or of another type
    pub fn get(&self, doc_type: DocumentType, id: &RecordId) -> Result<Record> {
        if id.doc_type() != doc_type {
            return Err(WorkflowError::RecordNotFound(id.to_string()));
        }
        self.get_by_id(id)
    }

    pub fn get_by_id(&self, id: &RecordId) -> Result<Record> {
        self.find(id)?
            .ok_or_else(|| WorkflowError::RecordNotFound(id.to_string()))
    }

    pub fn find(&self, id: &RecordId) -> Result<Option<Record>> {
        match self.records.get(id.key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Records of one type in insertion order. Each call starts a fresh pass.
    pub fn scan(&self, doc_type: DocumentType) -> impl Iterator<Item = Result<Record>> {
        self.records
            .scan_prefix([doc_type.tag()])
            .map(|item| decode(&item?.1))
    }

    /// Rewrites a stored record if its version still equals `expected_version`, bumping it by one.
    /// Status and document number cannot change here and nothing is added to the audit trail.
    /// Creation and transitions go through `DocumentService`.
    pub fn put(&self, record: Record, expected_version: u64) -> Result<Record> {
        if expected_version == 0 {
            return Err(WorkflowError::validation(
                "version",
                "records are created through the document service",
            ));
        }
        self.commit(UnitOfWork::new(record, expected_version).keeping_lifecycle())
    }

    pub fn audit_trail(&self, id: &RecordId) -> Result<Vec<AuditEntry>> {
        self.audit
            .scan_prefix(id.key())
            .map(|item| decode(&item?.1))
            .collect()
    }

    pub fn resource(&self, code: &str) -> Result<Option<LinkedResource>> {
        match self.resources.get(code.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Current values of the given resources; unknown codes are left out
    pub fn resources(&self, codes: &[String]) -> Result<BTreeMap<String, LinkedResource>> {
        let mut found = BTreeMap::new();
        for code in codes {
            if let Some(resource) = self.resource(code)? {
                found.insert(code.clone(), resource);
            }
        }
        Ok(found)
    }

    /// Registers a new ledger line. Existing stock is never overwritten.
    pub fn insert_resource(&self, resource: LinkedResource) -> Result<LinkedResource> {
        let encoded = encode(&resource)?;
        self.resources
            .compare_and_swap(resource.resource_code.as_bytes(), None::<&[u8]>, Some(encoded))?
            .map_err(|_| WorkflowError::validation("resourceCode", "resource already registered"))?;
        Ok(resource)
    }

    pub(crate) fn commit(&self, work: UnitOfWork) -> Result<Record> {
        let result: TransactionResult<Record, WorkflowError> =
            (&self.records, &self.numbers, &self.audit, &self.resources).transaction(
                |(records, numbers, audit, resources)| {
                    let key = work.record.id.key();
                    let stored = match records.get(&key)? {
                        Some(bytes) => Some(decode::<Record>(&bytes).map_err(abort)?),
                        None => None,
                    };
                    if stored.as_ref().map_or(0, |r| r.version) != work.expected_version {
                        return Err(abort(WorkflowError::ConcurrencyConflict {
                            id: work.record.id,
                            expected: work.expected_version,
                        }));
                    }
                    if let (true, Some(stored)) = (work.fixed_lifecycle, &stored) {
                        lifecycle_unchanged(stored, &work.record).map_err(abort)?;
                    }

                    if work.expected_version == 0 {
                        let number_key =
                            number_key(work.record.doc_type(), &work.record.document_number);
                        if numbers.get(&number_key)?.is_some() {
                            return Err(abort(WorkflowError::DuplicateNumber(
                                work.record.document_number.clone(),
                            )));
                        }
                        numbers.insert(number_key, key.clone())?;
                    }

                    if !work.stock.is_empty() {
                        let mut current = BTreeMap::new();
                        for code in Dispatcher.touched(&work.stock) {
                            if let Some(bytes) = resources.get(code.as_bytes())? {
                                current.insert(code, decode(&bytes).map_err(abort)?);
                            }
                        }
                        let updated = Dispatcher.apply(&current, &work.stock).map_err(abort)?;
                        for resource in &updated {
                            resources.insert(
                                resource.resource_code.as_bytes(),
                                encode(resource).map_err(abort)?,
                            )?;
                        }
                    }

                    let mut record = work.record.clone();
                    record.version = work.expected_version + 1;

                    if let Some(entry) = &work.audit {
                        append_entry(audit, &key, entry)?;
                    }

                    records.insert(key, encode(&record).map_err(abort)?)?;
                    Ok(record)
                },
            );

        settle(result)
    }

    /// Physically removes a record, keeping its audit trail and number reservation
    pub(crate) fn remove(&self, id: &RecordId, expected_version: u64, entry: AuditEntry) -> Result<()> {
        let result: TransactionResult<(), WorkflowError> = (&self.records, &self.audit)
            .transaction(|(records, audit)| {
                let key = id.key();
                let stored = records
                    .get(&key)?
                    .ok_or_else(|| abort(WorkflowError::RecordNotFound(id.to_string())))?;
                if decode::<Record>(&stored).map_err(abort)?.version != expected_version {
                    return Err(abort(WorkflowError::ConcurrencyConflict {
                        id: *id,
                        expected: expected_version,
                    }));
                }
                append_entry(audit, &key, &entry)?;
                records.remove(key)?;
                Ok(())
            });

        settle(result)
    }
}

const AUDIT_HEAD: &[u8] = b"head";

// appends after the last entry stored for the record and links to its digest
fn append_entry(
    audit: &sled::transaction::TransactionalTree,
    record_key: &[u8],
    entry: &AuditEntry,
) -> ConflictableTransactionResult<(), WorkflowError> {
    let head_key = [AUDIT_HEAD, record_key].concat();
    let last = match audit.get(&head_key)? {
        Some(bytes) => <[u8; 8]>::try_from(bytes.as_ref())
            .map(u64::from_be_bytes)
            .map_err(|_| abort(WorkflowError::Encoding("malformed audit head".into())))?,
        None => 0,
    };

    let mut entry = entry.clone();
    entry.sequence = last + 1;
    entry.prev_digest = match last {
        0 => None,
        seq => audit
            .get(utils::sequenced_key(record_key, seq))?
            .map(|bytes| sha256::digest(&bytes.to_vec())),
    };
    audit.insert(
        utils::sequenced_key(record_key, entry.sequence),
        encode(&entry).map_err(abort)?,
    )?;
    audit.insert(head_key, entry.sequence.to_be_bytes().to_vec())?;
    Ok(())
}

fn lifecycle_unchanged(stored: &Record, next: &Record) -> Result<()> {
    if stored.status != next.status {
        return Err(WorkflowError::validation(
            "status",
            "status changes only through transitions",
        ));
    }
    if stored.document_number != next.document_number {
        return Err(WorkflowError::validation(
            "documentNumber",
            "document numbers are fixed at creation",
        ));
    }
    Ok(())
}

fn number_key(doc_type: DocumentType, number: &str) -> Vec<u8> {
    let mut key = vec![doc_type.tag()];
    key.extend_from_slice(number.as_bytes());
    key
}

fn abort(err: WorkflowError) -> ConflictableTransactionError<WorkflowError> {
    ConflictableTransactionError::Abort(err)
}

fn settle<T>(result: TransactionResult<T, WorkflowError>) -> Result<T> {
    result.map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => WorkflowError::Storage(err),
    })
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Encoding(e.to_string()))
}

pub(crate) fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T> {
    minicbor::decode(bytes).map_err(|e| WorkflowError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeStamp;

    fn temp_store() -> RecordStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        RecordStore::new(Arc::new(db)).unwrap()
    }

    fn record(number: &str) -> Record {
        Record {
            id: RecordId::generate(DocumentType::ScrapOrder),
            document_number: number.into(),
            status: "pending".into(),
            version: 0,
            fields: BTreeMap::new(),
            line_items: vec![],
            created_by: "user_1".into(),
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    fn create(store: &RecordStore, record: Record) -> Result<Record> {
        store.commit(UnitOfWork::new(record, 0))
    }

    fn entry(record: &Record, action: &str) -> AuditEntry {
        AuditEntry {
            record_id: record.id,
            sequence: 0,
            action: action.into(),
            actor: "user_1".into(),
            role: crate::types::Role::Approver,
            timestamp: TimeStamp::new(),
            comment: None,
            from_status: None,
            to_status: record.status.clone(),
            prev_digest: None,
        }
    }

    #[test]
    fn put_bumps_version_and_checks_expected() {
        let store = temp_store();
        let created = create(&store, record("SC20240130001")).unwrap();
        assert_eq!(created.version, 1);

        let updated = store.put(created.clone(), 1).unwrap();
        assert_eq!(updated.version, 2);

        let stale = store.put(created, 1).unwrap_err();
        assert!(stale.is_retryable());
        assert_eq!(store.get_by_id(&updated.id).unwrap().version, 2);
    }

    #[test]
    fn document_numbers_are_unique_per_type() {
        let store = temp_store();
        create(&store, record("SC20240130001")).unwrap();

        let err = create(&store, record("SC20240130001")).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateNumber(n) if n == "SC20240130001"));
    }

    #[test]
    fn scan_follows_insertion_order_and_type() {
        let store = temp_store();
        let first = create(&store, record("SC1")).unwrap();
        let second = create(&store, record("SC2")).unwrap();

        let ids: Vec<RecordId> = store
            .scan(DocumentType::ScrapOrder)
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(store.scan(DocumentType::BorrowRequest).count(), 0);
    }

    #[test]
    fn get_with_wrong_type_is_not_found() {
        let store = temp_store();
        let created = create(&store, record("SC1")).unwrap();

        assert!(store.get(DocumentType::ScrapOrder, &created.id).is_ok());
        assert!(matches!(
            store.get(DocumentType::InboundOrder, &created.id),
            Err(WorkflowError::RecordNotFound(_))
        ));
    }

    #[test]
    fn put_never_inserts() {
        let store = temp_store();
        let fresh = record("SC1");
        let err = store.put(fresh.clone(), 0).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "version"));
        assert!(store.find(&fresh.id).unwrap().is_none());
    }

    #[test]
    fn put_keeps_status_and_number() {
        let store = temp_store();
        let created = create(&store, record("SC1")).unwrap();
        create(&store, record("SC2")).unwrap();

        let mut renumbered = created.clone();
        renumbered.document_number = "SC2".into();
        let err = store.put(renumbered, 1).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "documentNumber"));

        let mut moved = created.clone();
        moved.status = "processed".into();
        let err = store.put(moved, 1).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "status"));

        assert_eq!(store.get_by_id(&created.id).unwrap(), created);
    }

    #[test]
    fn audit_chain_survives_unaudited_puts() {
        let store = temp_store();
        let draft = record("SC1");
        let created = store
            .commit(UnitOfWork::new(draft.clone(), 0).audited(entry(&draft, "create")))
            .unwrap();

        let mut edited = created.clone();
        edited
            .fields
            .insert("note".into(), crate::types::FieldValue::from("first"));
        let edited = store.put(edited, 1).unwrap();
        let edited = store.put(edited.clone(), 2).unwrap();

        let mut approved = edited.clone();
        approved.status = "approved".into();
        let approved = store
            .commit(UnitOfWork::new(approved.clone(), 3).audited(entry(&approved, "approve")))
            .unwrap();
        assert_eq!(approved.version, 4);

        let trail = store.audit_trail(&approved.id).unwrap();
        let sequences: Vec<u64> = trail.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(crate::audit::verify_chain(&trail).unwrap());
    }

    #[test]
    fn resource_registration_never_overwrites() {
        let store = temp_store();
        store
            .insert_resource(LinkedResource::new("A", "toner", 5, 5, 20))
            .unwrap();

        assert!(store
            .insert_resource(LinkedResource::new("A", "toner", 99, 5, 20))
            .is_err());
        assert_eq!(store.resource("A").unwrap().unwrap().current_stock(), 5);
    }
}
