//! Column type mappings.
//!
//! Rows are scanned into a `RowMap` before being decoded into caller types.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders handle the actual value extraction
//!
//! Temporal columns are rendered as strings per `RowFormat`, so the same map
//! can be decoded into chrono types later. DATETIME holds a wall clock read
//! in the configured location; TIMESTAMP arrives as a UTC instant (the
//! session time zone is `+00:00`) and is shown in that location.

use crate::config::TimeLayout;
use crate::models::RowMap;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Date,
    DateTime,
    Timestamp,
    Time,
    Unknown,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower == "boolean" || lower == "bool" {
        return TypeCategory::Boolean;
    }

    // Integer types (also covers TINYINT(1))
    if lower.contains("int") || lower == "year" {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" {
        return TypeCategory::Json;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "datetime" {
        return TypeCategory::DateTime;
    }
    if lower == "timestamp" {
        return TypeCategory::Timestamp;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bit" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Format
// =============================================================================

/// Time zone temporal columns are interpreted and shown in (`loc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// The host's local zone.
    Local,
    Zone(Tz),
}

impl Location {
    pub const UTC: Location = Location::Zone(Tz::UTC);
}

impl Default for Location {
    fn default() -> Self {
        Self::UTC
    }
}

impl FromStr for Location {
    type Err = String;

    /// `Local`, `UTC` (also the empty string) or an IANA name such as `Asia/Singapore`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Local" => Ok(Self::Local),
            "" | "UTC" => Ok(Self::UTC),
            name => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|_| format!("unknown time zone '{name}'")),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Zone(tz) => f.write_str(tz.name()),
        }
    }
}

/// How binary columns appear in a row map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryFormat {
    /// Base64 text, for maps handed to callers as JSON.
    #[default]
    Base64,
    /// An array of octets, for maps decoded into `Vec<u8>` fields.
    ByteArray,
}

/// Rendering rules applied while scanning rows into maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFormat {
    pub layout: TimeLayout,
    pub loc: Location,
    /// When false DATETIME/TIMESTAMP stay in the server's text form.
    pub parse_time: bool,
    pub binary: BinaryFormat,
}

impl Default for RowFormat {
    fn default() -> Self {
        Self {
            layout: TimeLayout::default(),
            loc: Location::default(),
            parse_time: true,
            binary: BinaryFormat::default(),
        }
    }
}

/// What a naive temporal value read from the server stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// DATETIME: a wall clock in `loc`.
    Wall,
    /// TIMESTAMP: an instant, read through the UTC session.
    Utc,
}

// =============================================================================
// Value Rendering
// =============================================================================

/// Encode binary data as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

fn render_binary(bytes: Vec<u8>, format: BinaryFormat) -> JsonValue {
    match format {
        BinaryFormat::Base64 => encode_binary_value(&bytes),
        BinaryFormat::ByteArray => JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect()),
    }
}

/// Render a DATETIME/TIMESTAMP value per `format`.
pub fn format_datetime(value: NaiveDateTime, clock: Clock, format: &RowFormat) -> String {
    if !format.parse_time {
        return value.format("%Y-%m-%d %H:%M:%S%.f").to_string();
    }
    match format.loc {
        Location::Local => format_in(&Local, value, clock, format.layout),
        Location::Zone(tz) => format_in(&tz, value, clock, format.layout),
    }
}

fn format_in<Z>(zone: &Z, value: NaiveDateTime, clock: Clock, layout: TimeLayout) -> String
where
    Z: TimeZone,
    Z::Offset: fmt::Display,
{
    let at: DateTime<Z> = match clock {
        // A wall clock skipped by a DST jump is read as UTC
        Clock::Wall => zone
            .from_local_datetime(&value)
            .earliest()
            .unwrap_or_else(|| zone.from_utc_datetime(&value)),
        Clock::Utc => zone.from_utc_datetime(&value),
    };
    match layout {
        TimeLayout::Rfc3339 => at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        TimeLayout::LocalNaive => at.naive_local().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
    }
}

pub fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

// =============================================================================
// Row to Map Trait
// =============================================================================

/// Conversion of database rows into column-name keyed maps.
pub trait RowToMap {
    fn to_row_map(&self, format: &RowFormat) -> RowMap;
}

impl RowToMap for MySqlRow {
    fn to_row_map(&self, format: &RowFormat) -> RowMap {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name);
                let value = decode_column(self, idx, category, format);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

// =============================================================================
// Per-Category Decoders
// =============================================================================

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory, format: &RowFormat) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx, format.binary),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::DateTime => decode_datetime(row, idx, Clock::Wall, format),
        TypeCategory::Timestamp => decode_datetime(row, idx, Clock::Utc, format),
        TypeCategory::Time => decode_time(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx, format.binary),
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!("Failed to decode DECIMAL: {:?}", e);
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
    // Signed first; BIGINT UNSIGNED above i64::MAX falls through to u64.
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|n| JsonValue::Number(n.into())).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|n| JsonValue::Number(n.into())).unwrap_or(JsonValue::Null);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    JsonValue::Null
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary_col(row: &MySqlRow, idx: usize, binary: BinaryFormat) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| render_binary(v, binary))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_date(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<NaiveDate>, _>(idx)
        .ok()
        .flatten()
        .map(|d| JsonValue::String(format_date(d)))
        .unwrap_or(JsonValue::Null)
}

fn decode_datetime(row: &MySqlRow, idx: usize, clock: Clock, format: &RowFormat) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v
            .map(|dt| JsonValue::String(format_datetime(dt, clock, format)))
            .unwrap_or(JsonValue::Null);
    }
    row.try_get::<Option<DateTime<chrono::Utc>>, _>(idx)
        .ok()
        .flatten()
        .map(|dt| JsonValue::String(format_datetime(dt.naive_utc(), Clock::Utc, format)))
        .unwrap_or(JsonValue::Null)
}

fn decode_time(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<NaiveTime>, _>(idx)
        .ok()
        .flatten()
        .map(|t| JsonValue::String(t.format("%H:%M:%S%.f").to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &MySqlRow, idx: usize, binary: BinaryFormat) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return JsonValue::String(v);
    }
    // VARBINARY-backed text, or anything the driver refuses as a string
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|bytes| match String::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s),
            Err(e) => render_binary(e.into_bytes(), binary),
        })
        .unwrap_or(JsonValue::Null)
}
