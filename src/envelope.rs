//! Message shapes that cross the isolation boundary.
//!
//! Everything in here is plain owned data: a [`Request`] goes in, exactly one
//! [`Response`] comes out, and both serialize to JSON without referring to
//! any engine object.

use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Unexpected, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::HandleId;
use crate::error::{ErrorKind, ExecutionError};

/// Key of the object that carries a non-finite real, e.g. `{"real": "-Infinity"}`.
const NON_FINITE_KEY: &str = "real";

/// Core value types for bound parameters and result cells
///
/// On the wire a value is the bare JSON scalar for its variant and a blob is
/// an array of byte values. JSON numbers cannot hold infinities or NaN, so a
/// non-finite real travels as `{"real": "Infinity" | "-Infinity" | "NaN"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

fn non_finite_label(value: f64) -> &'static str {
    if value.is_nan() {
        "NaN"
    } else if value > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn non_finite_value(label: &str) -> Option<f64> {
    match label {
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => None,
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::Real(v) if v.is_finite() => serializer.serialize_f64(*v),
            Value::Real(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(NON_FINITE_KEY, non_finite_label(*v))?;
                map.end()
            }
            Value::Text(v) => serializer.serialize_str(v),
            Value::Blob(v) => serializer.collect_seq(v),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, a real, a string or an array of bytes")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                Value::deserialize(deserializer)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Integer(v))
            }

            // Integers past i64::MAX have no SQLite storage class; refuse them
            // rather than widening to a real.
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v).map(Value::Integer).map_err(|_| {
                    E::invalid_value(Unexpected::Unsigned(v), &"a 64-bit signed integer")
                })
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Real(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Text(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
                Ok(Value::Blob(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
                Ok(Value::Blob(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(Value::Blob(bytes))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let key = map
                    .next_key::<String>()?
                    .ok_or_else(|| {
                        <A::Error as de::Error>::invalid_length(0, &"a single \"real\" entry")
                    })?;
                if key != NON_FINITE_KEY {
                    return Err(de::Error::unknown_field(&key, &[NON_FINITE_KEY]));
                }
                let label = map.next_value::<String>()?;
                let value = non_finite_value(&label).ok_or_else(|| {
                    <A::Error as de::Error>::invalid_value(
                        Unexpected::Str(&label),
                        &"\"Infinity\", \"-Infinity\" or \"NaN\"",
                    )
                })?;
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::invalid_length(2, &"a single \"real\" entry"));
                }
                Ok(Value::Real(value))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// SQL text with positional parameters, addressed to one database handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Target handle. `None` addresses whichever handle the boundary owns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<HandleId>,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            handle: None,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append one positional parameter
    pub fn with_param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn for_handle(mut self, handle: HandleId) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// Output of one row-producing statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowGroup {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Row groups in statement order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    pub groups: Vec<RowGroup>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// First row group, which is the only one for single-statement queries.
    pub fn first(&self) -> Option<&RowGroup> {
        self.groups.first()
    }
}

/// The one reply a request receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(rename = "resultSet")]
        result_set: ResultSet,
    },
    Error(ExecutionError),
}

impl Response {
    pub fn ok(result_set: ResultSet) -> Self {
        Response::Ok { result_set }
    }

    pub fn err(error: ExecutionError) -> Self {
        Response::Error(error)
    }

    pub fn boundary_closed() -> Self {
        Response::Error(ExecutionError::new(
            ErrorKind::BoundaryClosed,
            "execution boundary is closed",
        ))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Response::Ok { result_set } => Some(result_set),
            Response::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Response::Ok { .. } => None,
            Response::Error(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<ResultSet, ExecutionError> {
        match self {
            Response::Ok { result_set } => Ok(result_set),
            Response::Error(err) => Err(err),
        }
    }
}

impl From<Result<ResultSet, ExecutionError>> for Response {
    fn from(result: Result<ResultSet, ExecutionError>) -> Self {
        match result {
            Ok(result_set) => Response::ok(result_set),
            Err(err) => Response::err(err),
        }
    }
}

/// Decode one JSON request frame. Undecodable frames become a parse error
/// so the caller still gets a response for them.
pub fn decode_request(frame: &str) -> Result<Request, ExecutionError> {
    serde_json::from_str(frame).map_err(|err| {
        ExecutionError::new(ErrorKind::Parse, format!("invalid request: {err}"))
    })
}

/// Decode a raw request frame. Bytes that are not valid UTF-8 are reported
/// the same way as any other undecodable frame.
pub fn decode_request_bytes(frame: &[u8]) -> Result<Request, ExecutionError> {
    serde_json::from_slice(frame).map_err(|err| {
        ExecutionError::new(ErrorKind::Parse, format!("invalid request: {err}"))
    })
}

pub fn encode_request(request: &Request) -> serde_json::Result<String> {
    serde_json::to_string(request)
}

pub fn decode_response(frame: &str) -> serde_json::Result<Response> {
    serde_json::from_str(frame)
}

pub fn encode_response(response: &Response) -> serde_json::Result<String> {
    serde_json::to_string(response)
}
