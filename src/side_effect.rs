//! Stock mutations triggered by transitions
//!
//! A side effect is planned once from the record's line items and then applied to
//! whatever view of the stock ledger the caller holds. The executor applies the plan
//! twice: against a read at stage time to fail fast, and against the authoritative
//! values inside the commit transaction.
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use super::error::{Result, WorkflowError};
use super::record::LineItem;
use super::resource::LinkedResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDelta {
    pub resource_code: String,
    pub kind: EffectKind,
    pub quantity: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Dispatcher;

impl Dispatcher {
    /// One delta per line item, in line order
    pub fn plan(&self, kind: EffectKind, line_items: &[LineItem]) -> Vec<StockDelta> {
        line_items
            .iter()
            .map(|item| StockDelta {
                resource_code: item.resource_code.clone(),
                kind,
                quantity: item.effective_quantity(),
            })
            .collect()
    }

    /// Resource codes a plan touches, deduplicated and sorted
    pub fn touched(&self, deltas: &[StockDelta]) -> Vec<String> {
        let mut codes: Vec<String> = deltas.iter().map(|d| d.resource_code.clone()).collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Applies every delta to a working copy. Either all succeed and the updated
    /// resources are returned, or nothing in `current` is considered changed.
    pub fn apply(
        &self,
        current: &BTreeMap<String, LinkedResource>,
        deltas: &[StockDelta],
    ) -> Result<Vec<LinkedResource>> {
        let mut working: BTreeMap<String, LinkedResource> = BTreeMap::new();

        for delta in deltas {
            let resource = match working.entry(delta.resource_code.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let loaded = current
                        .get(&delta.resource_code)
                        .cloned()
                        .ok_or_else(|| WorkflowError::ResourceNotFound(delta.resource_code.clone()))?;
                    entry.insert(loaded)
                }
            };

            let stock = resource.current_stock();
            let next = match delta.kind {
                EffectKind::Increment => stock.checked_add(delta.quantity).ok_or_else(|| {
                    WorkflowError::validation("quantity", "stock would overflow")
                })?,
                EffectKind::Decrement => stock.checked_sub(delta.quantity).ok_or_else(|| {
                    tracing::warn!(
                        resource = %delta.resource_code,
                        available = stock,
                        requested = delta.quantity,
                        "rejecting stock batch"
                    );
                    WorkflowError::InsufficientStock {
                        resource_code: delta.resource_code.clone(),
                        available: stock,
                        requested: delta.quantity,
                    }
                })?,
            };
            resource.set_stock(next);
        }

        Ok(working.into_values().collect())
    }
}
