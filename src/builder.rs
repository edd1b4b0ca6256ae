//! Builders for creation requests and transition payloads
use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::record::LineItem;
use super::types::{DocumentType, FieldValue};

// used for constructing new documents. The number, id and status are assigned on create.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub doc_type: DocumentType,
    pub fields: BTreeMap<String, FieldValue>,
    pub line_items: Vec<LineItem>,
    pub dated: Option<NaiveDate>, // numbering date, today when unset
}

impl NewRecord {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new(doc_type: DocumentType) -> Self {
        Self {
            doc_type,
            fields: BTreeMap::new(),
            line_items: vec![],
            dated: None,
        }
    }
    pub fn set(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
    pub fn line_item(mut self, resource_code: impl Into<String>, quantity: u64, unit_price: i64) -> Self {
        self.line_items
            .push(LineItem::new(resource_code, quantity, unit_price));
        self
    }
    pub fn dated(mut self, date: NaiveDate) -> Self {
        self.dated = Some(date);
        self
    }
}

/// Data supplied alongside an action, e.g. a rejection reason or counted quantities
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub fields: BTreeMap<String, FieldValue>,
    pub line_quantities: Option<Vec<u64>>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
    pub fn comment(self, text: impl Into<String>) -> Self {
        self.with("comment", text.into())
    }
    pub fn reason(self, text: impl Into<String>) -> Self {
        self.with("reason", text.into())
    }
    /// One quantity per line item, in line order
    pub fn line_quantities(mut self, quantities: Vec<u64>) -> Self {
        self.line_quantities = Some(quantities);
        self
    }
    // text recorded in the audit trail
    pub(crate) fn note(&self) -> Option<String> {
        ["comment", "reason"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(FieldValue::as_text))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_fields_and_lines() {
        let draft = NewRecord::new(DocumentType::InboundOrder)
            .set("warehouse", "north")
            .set("amount", 1_200i64)
            .line_item("A", 10, 120);

        assert_eq!(draft.fields.len(), 2);
        assert_eq!(draft.line_items[0].resource_code, "A");
        assert!(draft.dated.is_none());
    }

    #[test]
    fn note_prefers_comment_over_reason() {
        let payload = Payload::new().reason("broken").comment("see photo");
        assert_eq!(payload.note().as_deref(), Some("see photo"));

        let payload = Payload::new().reason("broken");
        assert_eq!(payload.note().as_deref(), Some("broken"));
    }
}
