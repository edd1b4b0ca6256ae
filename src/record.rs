//! Business documents as stored and returned by the engine
use std::collections::BTreeMap;

use chrono::Utc;

use super::types::{DocumentType, FieldValue, RecordId, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub resource_code: String,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub unit_price: i64, // minor units
    #[n(3)]
    pub actual_quantity: Option<u64>, // recorded on completion, e.g. counted or received
}

impl LineItem {
    pub fn new(resource_code: impl Into<String>, quantity: u64, unit_price: i64) -> Self {
        Self {
            resource_code: resource_code.into(),
            quantity,
            unit_price,
            actual_quantity: None,
        }
    }
    /// Quantity that moves stock: the recorded actual when present, the planned one otherwise
    pub fn effective_quantity(&self) -> u64 {
        self.actual_quantity.unwrap_or(self.quantity)
    }
    pub fn amount(&self) -> i64 {
        self.unit_price
            .saturating_mul(i64::try_from(self.quantity).unwrap_or(i64::MAX))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    #[n(0)]
    pub id: RecordId,
    #[n(1)]
    pub document_number: String,
    #[n(2)]
    pub status: String,
    #[n(3)]
    pub version: u64,
    #[n(4)]
    pub fields: BTreeMap<String, FieldValue>,
    #[n(5)]
    pub line_items: Vec<LineItem>,
    #[n(6)]
    pub created_by: String,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record {
    pub fn doc_type(&self) -> DocumentType {
        self.id.doc_type()
    }
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
    pub fn total_amount(&self) -> i64 {
        self.line_items
            .iter()
            .fold(0i64, |acc, item| acc.saturating_add(item.amount()))
    }
}
