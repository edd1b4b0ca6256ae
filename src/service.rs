//! Service layer API for document lifecycle operations
use std::sync::Arc;

use chrono::Utc;

use super::audit::{AuditEntry, CREATE_ACTION, DELETE_ACTION};
use super::builder::{NewRecord, Payload};
use super::config::EngineConfig;
use super::error::{Result, WorkflowError};
use super::executor::{StagedTransition, TransitionExecutor};
use super::numbering::NumberingService;
use super::query::{FilterQuery, QueryEngine};
use super::record::Record;
use super::registry::Registry;
use super::resource::LinkedResource;
use super::store::{RecordStore, UnitOfWork};
use super::types::{Actor, DocumentType, RecordId, Role, TimeStamp};

/// Status written to the audit trail when a draft is removed
pub const DELETED_STATUS: &str = "deleted";

#[derive(Clone)]
pub struct DocumentService {
    store: RecordStore,
    numbers: NumberingService,
    registry: Arc<Registry>,
    executor: TransitionExecutor,
    queries: QueryEngine,
}

impl DocumentService {
    pub fn new(instance: Arc<sled::Db>, registry: Registry, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = RecordStore::new(instance)?;
        let numbers = NumberingService::new(store.instance(), config.numbering.sequence_width)?;
        let registry = Arc::new(registry);

        Ok(Self {
            executor: TransitionExecutor::new(store.clone(), registry.clone()),
            queries: QueryEngine::new(store.clone()),
            store,
            numbers,
            registry,
        })
    }

    /// Opens the database named by `config` with the standard document tables
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let instance = config.open_db()?;
        Self::new(Arc::new(instance), Registry::standard()?, config)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create a document in its type's initial status with a fresh number
    #[tracing::instrument(level = "debug", skip(self, draft, actor), fields(doc_type = %draft.doc_type, actor = %actor.id))]
    pub fn create_record(&self, draft: NewRecord, actor: &Actor) -> Result<Record> {
        let machine = self.registry.machine(draft.doc_type)?;
        machine.validate_creation(&draft.fields, &draft.line_items)?;
        self.check_references(&draft)?;

        let date = draft.dated.unwrap_or_else(|| Utc::now().date_naive());
        let document_number = self.numbers.next(draft.doc_type.number_prefix(), date)?;

        let now = TimeStamp::new();
        let record = Record {
            id: RecordId::generate(draft.doc_type),
            document_number,
            status: machine.initial().to_string(),
            version: 0,
            fields: draft.fields,
            line_items: draft.line_items,
            created_by: actor.id.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let entry = AuditEntry {
            record_id: record.id,
            sequence: 1,
            action: CREATE_ACTION.to_string(),
            actor: actor.id.clone(),
            role: actor.role,
            timestamp: now,
            comment: None,
            from_status: None,
            to_status: record.status.clone(),
            prev_digest: None,
        };

        let record = self.store.commit(UnitOfWork::new(record, 0).audited(entry))?;
        tracing::info!(
            record = %record.id,
            number = %record.document_number,
            status = %record.status,
            "record created"
        );
        Ok(record)
    }

    pub fn attempt_transition(
        &self,
        record_id: &RecordId,
        action: &str,
        actor: &Actor,
        payload: Payload,
    ) -> Result<Record> {
        self.executor.attempt(record_id, action, actor, payload)
    }

    /// Validate a transition without writing anything
    pub fn stage_transition(
        &self,
        record_id: &RecordId,
        action: &str,
        actor: &Actor,
        payload: Payload,
    ) -> Result<StagedTransition> {
        self.executor.stage(record_id, action, actor, payload)
    }

    pub fn commit_transition(&self, staged: StagedTransition) -> Result<Record> {
        self.executor.commit(staged)
    }

    /// Remove a document still in its initial status. Only its creator or an admin may.
    /// The audit trail stays readable and the document number is never reissued.
    pub fn delete_draft(&self, record_id: &RecordId, actor: &Actor) -> Result<()> {
        let record = self.store.get_by_id(record_id)?;
        let machine = self.registry.machine(record.doc_type())?;

        if record.status != machine.initial() {
            return Err(WorkflowError::InvalidTransition {
                doc_type: record.doc_type(),
                status: record.status,
                action: DELETE_ACTION.to_string(),
            });
        }
        if record.created_by != actor.id && actor.role != Role::Admin {
            return Err(WorkflowError::Forbidden {
                action: DELETE_ACTION.to_string(),
                required: Role::Admin,
                actual: actor.role,
            });
        }

        let entry = AuditEntry {
            record_id: record.id,
            sequence: 0, // assigned on commit
            action: DELETE_ACTION.to_string(),
            actor: actor.id.clone(),
            role: actor.role,
            timestamp: TimeStamp::new(),
            comment: None,
            from_status: Some(record.status.clone()),
            to_status: DELETED_STATUS.to_string(),
            prev_digest: None,
        };
        self.store.remove(record_id, record.version, entry)?;
        tracing::info!(record = %record_id, number = %record.document_number, "draft deleted");
        Ok(())
    }

    pub fn query(&self, doc_type: DocumentType, query: &FilterQuery) -> Result<Vec<Record>> {
        self.queries.query(doc_type, query)
    }

    pub fn get_record(&self, record_id: &RecordId) -> Result<Record> {
        self.store.get_by_id(record_id)
    }

    /// Entries in sequence order, oldest first
    pub fn get_audit_trail(&self, record_id: &RecordId) -> Result<Vec<AuditEntry>> {
        let trail = self.store.audit_trail(record_id)?;
        if trail.is_empty() {
            return Err(WorkflowError::RecordNotFound(record_id.to_string()));
        }
        Ok(trail)
    }

    pub fn get_linked_resource(&self, resource_code: &str) -> Result<LinkedResource> {
        self.store
            .resource(resource_code)?
            .ok_or_else(|| WorkflowError::ResourceNotFound(resource_code.to_string()))
    }

    pub fn register_resource(&self, resource: LinkedResource) -> Result<LinkedResource> {
        if resource.resource_code.trim().is_empty() {
            return Err(WorkflowError::validation("resourceCode", "must not be empty"));
        }
        if resource.max_stock < resource.safety_stock {
            return Err(WorkflowError::validation(
                "maxStock",
                format!("{} is below safety stock {}", resource.max_stock, resource.safety_stock),
            ));
        }
        let resource = self.store.insert_resource(resource)?;
        tracing::debug!(
            code = %resource.resource_code,
            stock = resource.current_stock(),
            "resource registered"
        );
        Ok(resource)
    }

    pub fn available_actions(&self, record_id: &RecordId, actor: &Actor) -> Result<Vec<String>> {
        let record = self.store.get_by_id(record_id)?;
        self.executor.available_actions(&record, actor.role)
    }

    // references must point at stored records
    fn check_references(&self, draft: &NewRecord) -> Result<()> {
        for (name, value) in &draft.fields {
            let Some(target) = value.as_reference() else {
                continue;
            };
            if self.store.find(target)?.is_none() {
                return Err(WorkflowError::validation(
                    name.clone(),
                    format!("references missing record {target}"),
                ));
            }
        }
        Ok(())
    }
}
