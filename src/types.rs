//! Identity, time and value types shared by every document type
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bech32::{Bech32m, Hrp};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use uuid7::{Uuid, uuid7};

use super::error::WorkflowError;
use super::utils;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[cbor(index_only)]
pub enum DocumentType {
    #[n(0)]
    BorrowRequest,
    #[n(1)]
    RetirementApplication,
    #[n(2)]
    MaintenanceTicket,
    #[n(3)]
    InboundOrder,
    #[n(4)]
    ScrapOrder,
    #[n(5)]
    ProcurementApplication,
    #[n(6)]
    ProcurementOrder,
    #[n(7)]
    QuotationRequest,
    #[n(8)]
    InventoryCount,
}

impl DocumentType {
    pub const ALL: [DocumentType; 9] = [
        DocumentType::BorrowRequest,
        DocumentType::RetirementApplication,
        DocumentType::MaintenanceTicket,
        DocumentType::InboundOrder,
        DocumentType::ScrapOrder,
        DocumentType::ProcurementApplication,
        DocumentType::ProcurementOrder,
        DocumentType::QuotationRequest,
        DocumentType::InventoryCount,
    ];

    /// Prefix used in human readable document numbers, e.g. `BR20240130001`
    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocumentType::BorrowRequest => "BR",
            DocumentType::RetirementApplication => "RA",
            DocumentType::MaintenanceTicket => "MT",
            DocumentType::InboundOrder => "IN",
            DocumentType::ScrapOrder => "SC",
            DocumentType::ProcurementApplication => "PA",
            DocumentType::ProcurementOrder => "PO",
            DocumentType::QuotationRequest => "QR",
            DocumentType::InventoryCount => "IC",
        }
    }

    // bech32 human readable part of a record id
    fn hrp(&self) -> Hrp {
        Hrp::parse_unchecked(&self.number_prefix().to_lowercase())
    }

    fn from_hrp(hrp: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.number_prefix().eq_ignore_ascii_case(hrp))
    }

    /// Single byte key prefix, keeps records of one type contiguous in the store
    pub(crate) fn tag(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[cbor(index_only)]
pub enum Role {
    #[n(0)]
    Applicant,
    #[n(1)]
    Approver,
    #[n(2)]
    Keeper,
    #[n(3)]
    Purchaser,
    #[n(4)]
    Admin,
}

impl Role {
    pub fn satisfies(&self, required: Role) -> bool {
        *self == Role::Admin || *self == required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Applicant => "applicant",
            Role::Approver => "approver",
            Role::Keeper => "keeper",
            Role::Purchaser => "purchaser",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Whoever performs an action. Authentication happens elsewhere, we only see the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }
    /// Actor with a freshly minted bech32 user id
    pub fn generate(name: impl Into<String>, role: Role) -> anyhow::Result<Self> {
        let id = utils::new_uuid_to_bech32("user_")?;
        Ok(Self::new(id, name, role))
    }
}

// newtype wrapper over uuid because Uuid doesn't implement minicbor traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(Uuid);

impl<C> minicbor::Encode<C> for Ident {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(self.0.as_bytes())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Ident {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let digest: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected 16 uuid bytes"))?;

        Ok(Ident(Uuid::from(digest)))
    }
}

/// Store assigned record identity. UUIDv7 keeps ids in creation order.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct RecordId {
    #[n(0)]
    doc_type: DocumentType,
    #[n(1)]
    ident: Ident,
}

impl RecordId {
    pub(crate) fn generate(doc_type: DocumentType) -> Self {
        Self {
            doc_type,
            ident: Ident(uuid7()),
        }
    }
    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }
    /// Store key: `[type tag][16 uuid bytes]`
    pub(crate) fn key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(17);
        key.push(self.doc_type.tag());
        key.extend_from_slice(self.ident.0.as_bytes());
        key
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bech32::encode_to_fmt::<Bech32m, _>(f, self.doc_type.hrp(), self.ident.0.as_bytes())
            .map_err(|_| fmt::Error)
    }
}

impl FromStr for RecordId {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data) =
            bech32::decode(s).map_err(|e| WorkflowError::validation("recordId", e.to_string()))?;
        let doc_type = DocumentType::from_hrp(&hrp.to_lowercase())
            .ok_or_else(|| WorkflowError::validation("recordId", "unknown document prefix"))?;
        let bytes: [u8; 16] = data
            .try_into()
            .map_err(|_| WorkflowError::validation("recordId", "expected 16 id bytes"))?;

        Ok(Self {
            doc_type,
            ident: Ident(Uuid::from(bytes)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// derives would bound the zone itself, and chrono zones are not `Ord`
impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Calendar date stored as days from the common era
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocDate(pub NaiveDate);

impl<C> minicbor::Encode<C> for DocDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for DocDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(DocDate)
            .ok_or(minicbor::decode::Error::message("day count out of range"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Date,
    Time,
    Bool,
    Reference,
}

/// A typed value in a record's field map. Amounts are integers in minor units.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    #[n(0)]
    Text(#[n(0)] String),
    #[n(1)]
    Integer(#[n(0)] i64),
    #[n(2)]
    Date(#[n(0)] DocDate),
    #[n(3)]
    Time(#[n(0)] TimeStamp<Utc>),
    #[n(4)]
    Bool(#[n(0)] bool),
    #[n(5)]
    Reference(#[n(0)] RecordId),
}

impl FieldValue {
    pub fn date(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(|d| FieldValue::Date(DocDate(d)))
    }
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::Time(_) => FieldKind::Time,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Reference(_) => FieldKind::Reference,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_reference(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Reference(id) => Some(id),
            _ => None,
        }
    }
    /// Ordering for range filters. Only integers, dates and timestamps are ordered,
    /// and only against a value of the same kind.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(a.cmp(b)),
            (FieldValue::Date(a), FieldValue::Date(b)) => Some(a.cmp(b)),
            (FieldValue::Time(a), FieldValue::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(DocDate(value))
    }
}

impl From<TimeStamp<Utc>> for FieldValue {
    fn from(value: TimeStamp<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

impl From<RecordId> for FieldValue {
    fn from(value: RecordId) -> Self {
        FieldValue::Reference(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_instant() {
        let early = TimeStamp::new_with(2024, 1, 30, 8, 0, 0).unwrap();
        let late = TimeStamp::new_with(2024, 1, 30, 9, 0, 0).unwrap();
        assert!(early < late);
        assert_eq!(
            FieldValue::from(late.clone()).compare(&FieldValue::from(early)),
            Some(Ordering::Greater)
        );
        assert_eq!(late.clone().cmp(&late), Ordering::Equal);
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn record_id_text_form_parses_back() {
        let id = RecordId::generate(DocumentType::BorrowRequest);
        let text = id.to_string();

        assert!(text.starts_with("br1"));
        assert_eq!(text.parse::<RecordId>().unwrap(), id);
    }

    #[test]
    fn record_id_rejects_foreign_prefix() {
        let foreign = utils::new_uuid_to_bech32("user_").unwrap();
        assert!(foreign.parse::<RecordId>().is_err());
    }

    #[test]
    fn record_ids_sort_in_creation_order() {
        let first = RecordId::generate(DocumentType::ScrapOrder);
        let second = RecordId::generate(DocumentType::ScrapOrder);

        assert!(first.key() < second.key());
    }

    #[test]
    fn admin_satisfies_every_role() {
        assert!(Role::Admin.satisfies(Role::Approver));
        assert!(Role::Approver.satisfies(Role::Approver));
        assert!(!Role::Keeper.satisfies(Role::Approver));
    }

    #[test]
    fn compare_refuses_mixed_kinds() {
        let date = FieldValue::date(2024, 1, 30).unwrap();
        assert_eq!(date.compare(&FieldValue::Integer(3)), None);
        assert_eq!(
            FieldValue::Integer(2).compare(&FieldValue::Integer(3)),
            Some(Ordering::Less)
        );
    }
}
