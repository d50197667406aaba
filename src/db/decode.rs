//! Row map decoding into caller types.
//!
//! Decoding goes through serde. In weakly typed mode values are coerced the
//! way loosely typed database columns need: numbers and strings convert both
//! ways, `0`/`1`/`"true"` become booleans, a scalar becomes a one element
//! sequence and NULL becomes the zero value of non-optional fields. Struct
//! fields match column names exactly first, then case-insensitively.

use crate::config::TimeLayout;
use crate::error::{DbError, DbResult};
use crate::models::RowMap;
use serde::de::value::{Error, MapDeserializer, SeqDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::{Number, Value as JsonValue};

/// Per-call decoding behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Layout timestamp columns are rendered in before decoding.
    pub time_layout: TimeLayout,
    pub weakly_typed: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            time_layout: TimeLayout::default(),
            weakly_typed: true,
        }
    }
}

impl DecodeOptions {
    /// Exact JSON-like typing, no coercion.
    pub fn strict() -> Self {
        Self {
            weakly_typed: false,
            ..Self::default()
        }
    }

    pub fn with_time_layout(mut self, time_layout: TimeLayout) -> Self {
        self.time_layout = time_layout;
        self
    }
}

/// Decode one row map into `T`.
pub fn decode_row<T: DeserializeOwned>(row: RowMap, options: &DecodeOptions) -> DbResult<T> {
    T::deserialize(ValueDeserializer::new(
        JsonValue::Object(row),
        options.weakly_typed,
    ))
    .map_err(|e| DbError::decode(e.to_string()))
}

/// Decode every row map, failing on the first row that does not fit.
pub fn decode_rows<T: DeserializeOwned>(
    rows: Vec<RowMap>,
    options: &DecodeOptions,
) -> DbResult<Vec<T>> {
    rows.into_iter().map(|row| decode_row(row, options)).collect()
}

enum Integer {
    Signed(i64),
    Unsigned(u64),
}

/// Serde deserializer over an owned JSON value.
struct ValueDeserializer {
    value: JsonValue,
    weak: bool,
}

impl ValueDeserializer {
    fn new(value: JsonValue, weak: bool) -> Self {
        Self { value, weak }
    }

    fn invalid_type<E: de::Expected>(&self, exp: &E) -> Error {
        let unexpected = match &self.value {
            JsonValue::Null => Unexpected::Unit,
            JsonValue::Bool(b) => Unexpected::Bool(*b),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) => Unexpected::Float(f),
                None => Unexpected::Other("number"),
            },
            JsonValue::String(s) => Unexpected::Str(s),
            JsonValue::Array(_) => Unexpected::Seq,
            JsonValue::Object(_) => Unexpected::Map,
        };
        de::Error::invalid_type(unexpected, exp)
    }

    fn integer(&self) -> Result<Integer, Error> {
        match &self.value {
            JsonValue::Number(n) => number_to_integer(n, self.weak)
                .ok_or_else(|| self.invalid_type(&"an integer")),
            JsonValue::String(s) if self.weak => parse_integer(s)
                .ok_or_else(|| de::Error::invalid_value(Unexpected::Str(s), &"an integer")),
            JsonValue::Bool(b) if self.weak => Ok(Integer::Signed(i64::from(*b))),
            JsonValue::Null if self.weak => Ok(Integer::Signed(0)),
            _ => Err(self.invalid_type(&"an integer")),
        }
    }

    fn float(&self) -> Result<f64, Error> {
        match &self.value {
            JsonValue::Number(n) => n.as_f64().ok_or_else(|| self.invalid_type(&"a float")),
            JsonValue::String(s) if self.weak => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(0.0);
                }
                s.parse()
                    .map_err(|_| de::Error::invalid_value(Unexpected::Str(s), &"a float"))
            }
            JsonValue::Bool(b) if self.weak => Ok(if *b { 1.0 } else { 0.0 }),
            JsonValue::Null if self.weak => Ok(0.0),
            _ => Err(self.invalid_type(&"a float")),
        }
    }

    fn boolean(&self) -> Result<bool, Error> {
        match &self.value {
            JsonValue::Bool(b) => Ok(*b),
            JsonValue::Number(n) if self.weak => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            JsonValue::String(s) if self.weak => parse_bool(s)
                .ok_or_else(|| de::Error::invalid_value(Unexpected::Str(s), &"a boolean")),
            JsonValue::Null if self.weak => Ok(false),
            _ => Err(self.invalid_type(&"a boolean")),
        }
    }

    fn string(self) -> Result<String, Error> {
        match self.value {
            JsonValue::String(s) => Ok(s),
            JsonValue::Number(n) if self.weak => Ok(n.to_string()),
            JsonValue::Bool(b) if self.weak => Ok(if b { "1" } else { "0" }.to_string()),
            JsonValue::Null if self.weak => Ok(String::new()),
            JsonValue::Array(ref items) if self.weak => octets(items)
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| self.invalid_type(&"a string")),
            _ => Err(self.invalid_type(&"a string")),
        }
    }
}

fn number_to_integer(n: &Number, weak: bool) -> Option<Integer> {
    if let Some(i) = n.as_i64() {
        return Some(Integer::Signed(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Integer::Unsigned(u));
    }
    let f = n.as_f64()?;
    (weak && f.is_finite()).then(|| Integer::Signed(f.trunc() as i64))
}

fn parse_integer(s: &str) -> Option<Integer> {
    let s = s.trim();
    if s.is_empty() {
        return Some(Integer::Signed(0));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Integer::Signed(i));
    }
    if let Ok(u) = s.parse::<u64>() {
        return Some(Integer::Unsigned(u));
    }
    // DECIMAL columns arrive as text, e.g. "42.00"; a real fraction is not an integer
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| Integer::Signed(f as i64))
}

/// Bytes of a binary column rendered as a JSON array of octets.
fn octets(items: &[JsonValue]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        _ => None,
    }
}

/// Rename map keys to the struct field they match case-insensitively.
fn align_keys(map: serde_json::Map<String, JsonValue>, fields: &[&str]) -> Vec<(String, JsonValue)> {
    map.into_iter()
        .map(|(key, value)| {
            if fields.contains(&key.as_str()) {
                return (key, value);
            }
            match fields.iter().find(|f| f.eq_ignore_ascii_case(&key)) {
                Some(field) => (field.to_string(), value),
                None => (key, value),
            }
        })
        .collect()
}

impl<'de> IntoDeserializer<'de, Error> for ValueDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        let weak = self.weak;
        match self.value {
            JsonValue::Null => visitor.visit_unit(),
            JsonValue::Bool(b) => visitor.visit_bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    visitor.visit_i64(i)
                } else if let Some(u) = n.as_u64() {
                    visitor.visit_u64(u)
                } else {
                    visitor.visit_f64(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => visitor.visit_string(s),
            JsonValue::Array(items) => visitor.visit_seq(SeqDeserializer::new(
                items.into_iter().map(|v| ValueDeserializer::new(v, weak)),
            )),
            JsonValue::Object(map) => visitor.visit_map(MapDeserializer::new(
                map.into_iter().map(|(k, v)| (k, ValueDeserializer::new(v, weak))),
            )),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_bool(self.boolean()?)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.integer()? {
            Integer::Signed(i) => visitor.visit_i64(i),
            Integer::Unsigned(u) => visitor.visit_u64(u),
        }
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_string(self.string()?)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            JsonValue::String(s) => visitor.visit_byte_buf(s.into_bytes()),
            JsonValue::Array(items) => match octets(&items) {
                Some(bytes) => visitor.visit_byte_buf(bytes),
                None => ValueDeserializer::new(JsonValue::Array(items), self.weak)
                    .deserialize_any(visitor),
            },
            other => ValueDeserializer::new(other, self.weak).deserialize_any(visitor),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            JsonValue::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            JsonValue::Null => visitor.visit_unit(),
            _ if self.weak => visitor.visit_unit(),
            _ => Err(self.invalid_type(&"null")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        let weak = self.weak;
        match self.value {
            JsonValue::Array(items) => visitor.visit_seq(SeqDeserializer::new(
                items.into_iter().map(|v| ValueDeserializer::new(v, weak)),
            )),
            // JSON arrays stored in text columns
            JsonValue::String(s) if weak && s.trim_start().starts_with('[') => {
                let parsed: JsonValue = serde_json::from_str(&s).map_err(de::Error::custom)?;
                ValueDeserializer::new(parsed, weak).deserialize_seq(visitor)
            }
            JsonValue::Null if weak => {
                visitor.visit_seq(SeqDeserializer::new(std::iter::empty::<ValueDeserializer>()))
            }
            other if weak => visitor.visit_seq(SeqDeserializer::new(std::iter::once(
                ValueDeserializer::new(other, weak),
            ))),
            other => Err(ValueDeserializer::new(other, weak).invalid_type(&"a sequence")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_struct("", &[], visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        let weak = self.weak;
        match self.value {
            JsonValue::Object(map) => {
                let entries = align_keys(map, fields);
                visitor.visit_map(MapDeserializer::new(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, ValueDeserializer::new(v, weak))),
                ))
            }
            // JSON objects stored in text columns
            JsonValue::String(s) if weak && s.trim_start().starts_with('{') => {
                let parsed: JsonValue = serde_json::from_str(&s).map_err(de::Error::custom)?;
                ValueDeserializer::new(parsed, weak).deserialize_struct(name, fields, visitor)
            }
            JsonValue::Null if weak => visitor.visit_map(MapDeserializer::new(
                std::iter::empty::<(String, ValueDeserializer)>(),
            )),
            other => Err(ValueDeserializer::new(other, weak).invalid_type(&"a map")),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            JsonValue::String(s) => visitor.visit_enum(s.into_deserializer()),
            other => serde::Deserializer::deserialize_enum(other, name, variants, visitor)
                .map_err(de::Error::custom),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        i128 u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::Deserialize;
    use serde_json::json;

    fn row(value: JsonValue) -> RowMap {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct UserInfo {
        id: i64,
        name: String,
        age: u32,
        active: bool,
        score: f64,
        nickname: Option<String>,
    }

    #[test]
    fn test_decode_exact_types() {
        let user: UserInfo = decode_row(
            row(json!({"id": 1, "name": "ann", "age": 30, "active": true, "score": 9.5, "nickname": null})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(
            user,
            UserInfo {
                id: 1,
                name: "ann".into(),
                age: 30,
                active: true,
                score: 9.5,
                nickname: None,
            }
        );
    }

    #[test]
    fn test_weak_coercions() {
        let user: UserInfo = decode_row(
            row(json!({"id": "7", "name": 42, "age": "12.00", "active": 1, "score": "3.25", "nickname": "al"})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.name, "42");
        assert_eq!(user.age, 12);
        assert!(user.active);
        assert_eq!(user.score, 3.25);
        assert_eq!(user.nickname.as_deref(), Some("al"));
    }

    #[test]
    fn test_fractional_text_is_not_an_integer() {
        #[derive(Debug, Deserialize)]
        struct Row {
            #[allow(dead_code)]
            n: i64,
        }
        let err = decode_row::<Row>(row(json!({"n": "12.9"})), &DecodeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("12.9"));

        let whole: Row = decode_row(row(json!({"n": "-3.000"})), &DecodeOptions::default()).unwrap();
        assert_eq!(whole.n, -3);
    }

    /// Minimal `serde_bytes`-style buffer: asks the deserializer for bytes.
    #[derive(Debug, PartialEq)]
    struct Blob(Vec<u8>);

    impl<'de> Deserialize<'de> for Blob {
        fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct BlobVisitor;

            impl<'de> Visitor<'de> for BlobVisitor {
                type Value = Blob;

                fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    f.write_str("bytes")
                }

                fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Blob, E> {
                    Ok(Blob(v))
                }
            }

            deserializer.deserialize_byte_buf(BlobVisitor)
        }
    }

    #[test]
    fn test_bytes_from_text_and_octets() {
        #[derive(Debug, Deserialize)]
        struct Row {
            text: Blob,
            raw: Blob,
            list: Vec<u8>,
            name: String,
        }
        // "test" is also valid base64; it must stay the literal bytes
        let decoded: Row = decode_row(
            row(json!({"text": "test", "raw": [0, 255, 7], "list": [104, 105], "name": [104, 105]})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(decoded.text, Blob(b"test".to_vec()));
        assert_eq!(decoded.raw, Blob(vec![0, 255, 7]));
        assert_eq!(decoded.list, b"hi");
        assert_eq!(decoded.name, "hi");
    }

    #[test]
    fn test_null_becomes_zero_value() {
        let user: UserInfo = decode_row(
            row(json!({"id": null, "name": null, "age": null, "active": null, "score": null, "nickname": null})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(user.id, 0);
        assert_eq!(user.name, "");
        assert!(!user.active);
        assert_eq!(user.score, 0.0);
    }

    #[test]
    fn test_strict_rejects_coercion() {
        let err = decode_row::<UserInfo>(
            row(json!({"id": "7", "name": "ann", "age": 1, "active": true, "score": 1.0, "nickname": null})),
            &DecodeOptions::strict(),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }

    #[test]
    fn test_case_insensitive_field_match() {
        #[derive(Debug, Deserialize)]
        struct Row {
            user_name: String,
        }
        let decoded: Row =
            decode_row(row(json!({"USER_NAME": "bob"})), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.user_name, "bob");
    }

    #[test]
    fn test_bool_strings() {
        #[derive(Debug, Deserialize)]
        struct Flags {
            a: bool,
            b: bool,
            c: bool,
        }
        let flags: Flags = decode_row(
            row(json!({"a": "true", "b": "0", "c": "T"})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert!(flags.a && !flags.b && flags.c);

        let err = decode_row::<Flags>(
            row(json!({"a": "yes", "b": "0", "c": "1"})),
            &DecodeOptions::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_timestamps_per_layout() {
        #[derive(Debug, Deserialize)]
        struct Offset {
            created_time: DateTime<Utc>,
        }
        #[derive(Debug, Deserialize)]
        struct Naive {
            created_time: NaiveDateTime,
        }

        let offset: Offset = decode_row(
            row(json!({"created_time": "2024-03-09T08:05:01.250Z"})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(offset.created_time.timestamp_millis() % 1000, 250);

        let naive: Naive = decode_row(
            row(json!({"created_time": "2024-03-09T08:05:01"})),
            &DecodeOptions::default().with_time_layout(TimeLayout::LocalNaive),
        )
        .unwrap();
        assert_eq!(naive.created_time.to_string(), "2024-03-09 08:05:01");
    }

    #[test]
    fn test_scalar_to_sequence_and_json_text() {
        #[derive(Debug, Deserialize)]
        struct Row {
            tags: Vec<String>,
            ids: Vec<i64>,
            meta: std::collections::HashMap<String, i64>,
        }
        let decoded: Row = decode_row(
            row(json!({"tags": "solo", "ids": "[1, 2, 3]", "meta": "{\"a\": 1}"})),
            &DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(decoded.tags, vec!["solo"]);
        assert_eq!(decoded.ids, vec![1, 2, 3]);
        assert_eq!(decoded.meta["a"], 1);
    }

    #[test]
    fn test_unit_enum_from_text() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "UPPERCASE")]
        enum Status {
            Success,
            Error,
        }
        #[derive(Debug, Deserialize)]
        struct Row {
            status: Status,
        }
        let decoded: Row =
            decode_row(row(json!({"status": "ERROR"})), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.status, Status::Error);
    }

    #[test]
    fn test_decode_rows_fails_on_first_bad_row() {
        #[derive(Debug, Deserialize)]
        struct Row {
            #[allow(dead_code)]
            n: i32,
        }
        let rows = vec![row(json!({"n": 1})), row(json!({"n": "x"}))];
        assert!(decode_rows::<Row>(rows, &DecodeOptions::default()).is_err());
    }

    #[test]
    fn test_out_of_range_integer_rejected() {
        #[derive(Debug, Deserialize)]
        struct Row {
            #[allow(dead_code)]
            n: u8,
        }
        assert!(decode_row::<Row>(row(json!({"n": 300})), &DecodeOptions::default()).is_err());
    }
}
