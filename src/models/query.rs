//! Statement parameters and row shapes.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One scanned row: column name to JSON-like value.
pub type RowMap = serde_json::Map<String, JsonValue>;

/// A positional parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Date(NaiveDate),
    /// Wall clock, stored as-is; DATETIME columns read back in `loc`.
    DateTime(NaiveDateTime),
    /// An instant, sent as UTC; suits TIMESTAMP columns.
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

macro_rules! impl_from_param {
    ($($ty:ty => $variant:ident as $target:ty),+ $(,)?) => {
        $(
            impl From<$ty> for QueryParam {
                fn from(v: $ty) -> Self {
                    Self::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

impl_from_param! {
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => String as String,
    &str => String as String,
    Vec<u8> => Bytes as Vec<u8>,
    NaiveDate => Date as NaiveDate,
    NaiveDateTime => DateTime as NaiveDateTime,
    DateTime<Utc> => Timestamp as DateTime<Utc>,
    JsonValue => Json as JsonValue,
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<&[u8]> for QueryParam {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_primitives() {
        assert_eq!(QueryParam::from(7i32), QueryParam::Int(7));
        assert_eq!(QueryParam::from(7u32), QueryParam::UInt(7));
        assert_eq!(QueryParam::from("ann"), QueryParam::String("ann".into()));
        assert_eq!(QueryParam::from(true), QueryParam::Bool(true));
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(1.5f64)), QueryParam::Float(1.5));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert_eq!(QueryParam::from(vec![1u8, 2]).type_name(), "bytes");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(QueryParam::from(date).type_name(), "date");
        assert!(QueryParam::Null.is_null());
    }

    #[test]
    fn test_serialize_untagged() {
        let params = vec![
            QueryParam::Int(1),
            QueryParam::String("x".into()),
            QueryParam::Null,
            QueryParam::Bytes(b"hi".to_vec()),
        ];
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"[1,"x",null,"aGk="]"#);
    }
}
