//! Applies registry rules to records
//!
//! A transition runs in two phases. `stage` loads the record, resolves the rule,
//! checks role and payload, builds the next record state and validates the stock
//! plan against current stock; nothing is written. `commit` writes the record, the
//! audit entry and the stock deltas in one transaction. Dropping a staged
//! transition abandons it with no trace.
use std::sync::Arc;

use chrono::Utc;

use super::audit::AuditEntry;
use super::builder::Payload;
use super::error::{Result, WorkflowError};
use super::record::{LineItem, Record};
use super::registry::{LineQuantities, Registry, TransitionRule};
use super::resource::LinkedResource;
use super::side_effect::{Dispatcher, StockDelta};
use super::store::{RecordStore, UnitOfWork};
use super::types::{Actor, FieldValue, RecordId, Role, TimeStamp};

/// A validated transition that has not been written yet
#[derive(Debug, Clone)]
pub struct StagedTransition {
    record: Record,
    expected_version: u64,
    entry: AuditEntry,
    stock: Vec<StockDelta>,
    preview: Vec<LinkedResource>,
}

impl StagedTransition {
    /// The record as it will be stored, version excluded
    pub fn record(&self) -> &Record {
        &self.record
    }
    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }
    pub fn from_status(&self) -> Option<&str> {
        self.entry.from_status.as_deref()
    }
    pub fn to_status(&self) -> &str {
        &self.entry.to_status
    }
    pub fn stock_deltas(&self) -> &[StockDelta] {
        &self.stock
    }
    /// Resources as they would look if the stock read at stage time were still current
    pub fn stock_preview(&self) -> &[LinkedResource] {
        &self.preview
    }
}

#[derive(Clone)]
pub struct TransitionExecutor {
    store: RecordStore,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
}

impl TransitionExecutor {
    pub fn new(store: RecordStore, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            dispatcher: Dispatcher,
        }
    }

    pub fn attempt(
        &self,
        record_id: &RecordId,
        action: &str,
        actor: &Actor,
        payload: Payload,
    ) -> Result<Record> {
        let staged = self.stage(record_id, action, actor, payload)?;
        self.commit(staged)
    }

    #[tracing::instrument(level = "debug", skip(self, actor, payload), fields(record = %record_id, actor = %actor.id))]
    pub fn stage(
        &self,
        record_id: &RecordId,
        action: &str,
        actor: &Actor,
        payload: Payload,
    ) -> Result<StagedTransition> {
        let record = self.store.get_by_id(record_id)?;
        let machine = self.registry.machine(record.doc_type())?;

        let rule = machine
            .rule(&record.status, action)
            .ok_or_else(|| WorkflowError::InvalidTransition {
                doc_type: record.doc_type(),
                status: record.status.clone(),
                action: action.to_string(),
            })?;
        tracing::debug!(from = %rule.source, to = %rule.target, "rule resolved");

        if let Some(required) = rule.required_role {
            if !actor.role.satisfies(required) {
                return Err(WorkflowError::Forbidden {
                    action: action.to_string(),
                    required,
                    actual: actor.role,
                });
            }
        }

        for spec in &rule.fields {
            spec.check(&payload.fields)?;
        }
        if let Some(name) = payload
            .fields
            .keys()
            .find(|name| !rule.fields.iter().any(|spec| &spec.name == *name))
        {
            return Err(WorkflowError::validation(
                name.clone(),
                format!("not accepted by '{action}'"),
            ));
        }
        let line_items =
            record_line_quantities(rule, &record.line_items, payload.line_quantities.as_deref())?;

        let now = TimeStamp::new();
        let mut next = record.clone();
        next.status = rule.target.clone();
        next.line_items = line_items;
        next.fields.extend(payload.fields.clone());
        next.fields
            .insert(format!("{action}By"), FieldValue::from(actor.id.clone()));
        next.fields
            .insert(format!("{action}At"), FieldValue::from(now.clone()));
        next.updated_at = now.clone();
        // a declared field may still shadow a creation field
        machine.validate_creation(&next.fields, &next.line_items)?;
        self.check_references(&payload)?;

        let (stock, preview) = match rule.side_effect {
            Some(kind) => {
                let stock = self.dispatcher.plan(kind, &next.line_items);
                let current = self.store.resources(&self.dispatcher.touched(&stock))?;
                let preview = self.dispatcher.apply(&current, &stock)?;
                (stock, preview)
            }
            None => (vec![], vec![]),
        };

        let entry = audit_entry(&record, rule, actor, now, payload.note());

        Ok(StagedTransition {
            record: next,
            expected_version: record.version,
            entry,
            stock,
            preview,
        })
    }

    pub fn commit(&self, staged: StagedTransition) -> Result<Record> {
        let id = staged.record.id;
        let work = UnitOfWork::new(staged.record, staged.expected_version)
            .audited(staged.entry)
            .with_stock(staged.stock);

        match self.store.commit(work) {
            Ok(record) => {
                tracing::info!(
                    record = %record.id,
                    number = %record.document_number,
                    status = %record.status,
                    version = record.version,
                    "transition committed"
                );
                Ok(record)
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::warn!(record = %id, "transition lost a version race");
                }
                Err(err)
            }
        }
    }

    fn check_references(&self, payload: &Payload) -> Result<()> {
        for (name, value) in &payload.fields {
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

    /// Actions legal from the record's status that `role` may perform, in declaration order
    pub fn available_actions(&self, record: &Record, role: Role) -> Result<Vec<String>> {
        let machine = self.registry.machine(record.doc_type())?;
        Ok(machine
            .rules_from(&record.status)
            .filter(|rule| rule.permits(role))
            .map(|rule| rule.action.clone())
            .collect())
    }
}

fn record_line_quantities(
    rule: &TransitionRule,
    items: &[LineItem],
    quantities: Option<&[u64]>,
) -> Result<Vec<LineItem>> {
    match (rule.line_quantities, quantities) {
        (LineQuantities::Required, None) => Err(WorkflowError::validation(
            "lineQuantities",
            format!("'{}' needs one quantity per line item", rule.action),
        )),
        (LineQuantities::NotAccepted, Some(_)) => Err(WorkflowError::validation(
            "lineQuantities",
            format!("'{}' does not take line quantities", rule.action),
        )),
        (_, None) => Ok(items.to_vec()),
        (_, Some(quantities)) if quantities.len() != items.len() => {
            Err(WorkflowError::validation(
                "lineQuantities",
                format!("expected {} quantities, got {}", items.len(), quantities.len()),
            ))
        }
        (_, Some(quantities)) => Ok(items
            .iter()
            .zip(quantities)
            .map(|(item, &actual)| LineItem {
                actual_quantity: Some(actual),
                ..item.clone()
            })
            .collect()),
    }
}

fn audit_entry(
    record: &Record,
    rule: &TransitionRule,
    actor: &Actor,
    timestamp: TimeStamp<Utc>,
    comment: Option<String>,
) -> AuditEntry {
    AuditEntry {
        record_id: record.id,
        sequence: 0, // assigned on commit
        action: rule.action.clone(),
        actor: actor.id.clone(),
        role: actor.role,
        timestamp,
        comment,
        from_status: Some(record.status.clone()),
        to_status: rule.target.clone(),
        prev_digest: None,
    }
}
