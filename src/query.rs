//! Ad-hoc record filtering
//!
//! A query is an ordered list of criteria, all of which must hold. Results keep the
//! store's scan order; the engine never sorts.
use std::cmp::Ordering;
use std::collections::HashMap;

use super::error::Result;
use super::record::Record;
use super::store::RecordStore;
use super::types::{DocumentType, FieldValue, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineField {
    ResourceCode,
    Quantity,
    UnitPrice,
}

/// Where a criterion reads its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Status,
    DocumentNumber,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
    Field(String),
    /// Any line item matching is enough
    LineItem(LineField),
    /// `link.field`: `field` on the record referenced by the `link` field
    Linked { link: String, field: String },
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some(("lineItems", "resourceCode")) => FieldPath::LineItem(LineField::ResourceCode),
            Some(("lineItems", "quantity")) => FieldPath::LineItem(LineField::Quantity),
            Some(("lineItems", "unitPrice")) => FieldPath::LineItem(LineField::UnitPrice),
            Some((link, field)) => FieldPath::Linked {
                link: link.to_string(),
                field: field.to_string(),
            },
            None => match path {
                "status" => FieldPath::Status,
                "documentNumber" => FieldPath::DocumentNumber,
                "createdBy" => FieldPath::CreatedBy,
                "createdAt" => FieldPath::CreatedAt,
                "updatedAt" => FieldPath::UpdatedAt,
                other => FieldPath::Field(other.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Contains(String),
    Equals(FieldValue),
    Range {
        min: Option<FieldValue>,
        max: Option<FieldValue>,
    },
    In(Vec<FieldValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCriterion {
    pub field: FieldPath,
    pub operator: Operator,
}

impl FilterCriterion {
    pub fn contains(field: &str, needle: impl Into<String>) -> Self {
        Self::on(field, Operator::Contains(needle.into()))
    }
    pub fn equals(field: &str, value: impl Into<FieldValue>) -> Self {
        Self::on(field, Operator::Equals(value.into()))
    }
    pub fn range(field: &str, min: Option<FieldValue>, max: Option<FieldValue>) -> Self {
        Self::on(field, Operator::Range { min, max })
    }
    pub fn in_set<V: Into<FieldValue>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::on(field, Operator::In(values.into_iter().map(Into::into).collect()))
    }
    fn on(field: &str, operator: Operator) -> Self {
        Self {
            field: FieldPath::parse(field),
            operator,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub criteria: Vec<FilterCriterion>,
}

impl FilterQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn and(mut self, criterion: FilterCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }
    pub fn compile(&self) -> Predicate {
        Predicate {
            checks: self
                .criteria
                .iter()
                .map(|c| Check {
                    field: c.field.clone(),
                    test: Test::from(&c.operator),
                })
                .collect(),
        }
    }
}

impl From<Vec<FilterCriterion>> for FilterQuery {
    fn from(criteria: Vec<FilterCriterion>) -> Self {
        Self { criteria }
    }
}

/// Resolves the record behind a reference field
pub trait LinkResolver {
    fn linked(&mut self, id: &RecordId) -> Result<Option<Record>>;
}

/// For predicates over records without joins
pub struct NoLinks;

impl LinkResolver for NoLinks {
    fn linked(&mut self, _: &RecordId) -> Result<Option<Record>> {
        Ok(None)
    }
}

struct CachedLinks<'a> {
    store: &'a RecordStore,
    cache: HashMap<RecordId, Option<Record>>,
}

impl LinkResolver for CachedLinks<'_> {
    fn linked(&mut self, id: &RecordId) -> Result<Option<Record>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(hit.clone());
        }
        let found = self.store.find(id)?;
        self.cache.insert(*id, found.clone());
        Ok(found)
    }
}

#[derive(Debug, Clone)]
enum Test {
    Contains(String), // lowercased
    Equals(FieldValue),
    Range {
        min: Option<FieldValue>,
        max: Option<FieldValue>,
    },
    In(Vec<FieldValue>),
}

impl From<&Operator> for Test {
    fn from(operator: &Operator) -> Self {
        match operator {
            Operator::Contains(needle) => Test::Contains(needle.to_lowercase()),
            Operator::Equals(value) => Test::Equals(value.clone()),
            Operator::Range { min, max } => Test::Range {
                min: min.clone(),
                max: max.clone(),
            },
            Operator::In(values) => Test::In(values.clone()),
        }
    }
}

impl Test {
    fn unbounded(&self) -> bool {
        matches!(self, Test::Range { min: None, max: None })
    }

    fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Test::Contains(needle) => value
                .as_text()
                .is_some_and(|text| text.to_lowercase().contains(needle.as_str())),
            Test::Equals(expected) => value == expected,
            Test::Range { min, max } => {
                let above = min
                    .as_ref()
                    .is_none_or(|min| value.compare(min).is_some_and(|o| o != Ordering::Less));
                let below = max
                    .as_ref()
                    .is_none_or(|max| value.compare(max).is_some_and(|o| o != Ordering::Greater));
                above && below
            }
            Test::In(values) => values.contains(value),
        }
    }
}

#[derive(Debug, Clone)]
struct Check {
    field: FieldPath,
    test: Test,
}

/// A compiled query; holds no reference to any store
#[derive(Debug, Clone)]
pub struct Predicate {
    checks: Vec<Check>,
}

impl Predicate {
    pub fn matches(&self, record: &Record, links: &mut dyn LinkResolver) -> Result<bool> {
        for check in &self.checks {
            if check.test.unbounded() {
                continue;
            }
            let values = resolve(&check.field, record, links)?;
            if !values.iter().any(|v| check.test.matches(v)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn resolve(path: &FieldPath, record: &Record, links: &mut dyn LinkResolver) -> Result<Vec<FieldValue>> {
    if let FieldPath::Linked { link, field } = path {
        let Some(target) = record.field(link).and_then(FieldValue::as_reference) else {
            return Ok(vec![]);
        };
        return Ok(match links.linked(target)? {
            Some(linked) => local(&FieldPath::parse(field), &linked),
            None => vec![],
        });
    }
    Ok(local(path, record))
}

// values readable on the record itself; a nested join yields nothing
fn local(path: &FieldPath, record: &Record) -> Vec<FieldValue> {
    match path {
        FieldPath::Status => vec![FieldValue::from(record.status.clone())],
        FieldPath::DocumentNumber => vec![FieldValue::from(record.document_number.clone())],
        FieldPath::CreatedBy => vec![FieldValue::from(record.created_by.clone())],
        FieldPath::CreatedAt => vec![FieldValue::from(record.created_at.clone())],
        FieldPath::UpdatedAt => vec![FieldValue::from(record.updated_at.clone())],
        FieldPath::Field(name) => record.field(name).cloned().into_iter().collect(),
        FieldPath::LineItem(line_field) => record
            .line_items
            .iter()
            .map(|item| match line_field {
                LineField::ResourceCode => FieldValue::from(item.resource_code.clone()),
                LineField::Quantity => {
                    FieldValue::Integer(i64::try_from(item.effective_quantity()).unwrap_or(i64::MAX))
                }
                LineField::UnitPrice => FieldValue::Integer(item.unit_price),
            })
            .collect(),
        FieldPath::Linked { .. } => vec![],
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    store: RecordStore,
}

impl QueryEngine {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn query(&self, doc_type: DocumentType, query: &FilterQuery) -> Result<Vec<Record>> {
        let predicate = query.compile();
        let mut links = CachedLinks {
            store: &self.store,
            cache: HashMap::new(),
        };

        let mut found = vec![];
        for record in self.store.scan(doc_type) {
            let record = record?;
            if predicate.matches(&record, &mut links)? {
                found.push(record);
            }
        }
        tracing::debug!(%doc_type, criteria = query.criteria.len(), hits = found.len(), "query");
        Ok(found)
    }
}
