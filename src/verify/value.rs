//! Typed values captured from result rows.
//!
//! `RawValue` is what a driver hands over. `Scalar` is the JSON-safe form the
//! comparator and the wire format work with: dates become fixed-format text,
//! decimals become text, nested lists are converted element by element.

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Display format for dates and timestamps in results
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// A value as reported by a database driver, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Arbitrary precision numeric, already rendered by the driver
    Decimal(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    List(Vec<RawValue>),
}

impl RawValue {
    /// Convert to the JSON-safe scalar form
    pub fn into_scalar(self) -> Scalar {
        match self {
            RawValue::Null => Scalar::Null,
            RawValue::Boolean(b) => Scalar::Boolean(b),
            RawValue::Integer(n) => Scalar::Integer(n),
            RawValue::Real(x) => Scalar::Real(x),
            RawValue::Text(s) | RawValue::Decimal(s) => Scalar::Text(s),
            RawValue::Blob(bytes) => Scalar::Blob(bytes),
            RawValue::Date(d) => Scalar::Text(d.format("%d/%m/%Y 00:00:00").to_string()),
            RawValue::Timestamp(ts) => Scalar::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
            RawValue::List(items) => {
                Scalar::List(items.into_iter().map(RawValue::into_scalar).collect())
            }
        }
    }
}

/// A normalized cell value.
///
/// Equality follows SQL result semantics rather than storage class: an
/// integral real equals the integer with the same value, `-0.0` equals `0.0`
/// and all NaNs are equal to each other. `Hash` agrees with `Eq`, so scalars
/// can be counted in hash maps.
#[derive(Debug, Clone)]
pub enum Scalar {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    List(Vec<Scalar>),
}

/// Integer value of a real, when it has one that fits in i64
fn integral(x: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if x.fract() == 0.0 && x >= -LIMIT && x < LIMIT {
        Some(x as i64)
    } else {
        None
    }
}

fn real_bits(x: f64) -> u64 {
    if x.is_nan() {
        f64::NAN.to_bits()
    } else if x == 0.0 {
        0.0f64.to_bits()
    } else {
        x.to_bits()
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            (Scalar::Integer(a), Scalar::Integer(b)) => a == b,
            (Scalar::Real(a), Scalar::Real(b)) => real_bits(*a) == real_bits(*b),
            (Scalar::Integer(a), Scalar::Real(b)) | (Scalar::Real(b), Scalar::Integer(a)) => {
                integral(*b) == Some(*a)
            }
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Blob(a), Scalar::Blob(b)) => a == b,
            (Scalar::List(a), Scalar::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Scalar::Null => state.write_u8(0),
            Scalar::Boolean(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Scalar::Integer(n) => {
                state.write_u8(2);
                n.hash(state);
            }
            Scalar::Real(x) => match integral(*x) {
                Some(n) => {
                    state.write_u8(2);
                    n.hash(state);
                }
                None => {
                    state.write_u8(3);
                    real_bits(*x).hash(state);
                }
            },
            Scalar::Text(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Scalar::Blob(bytes) => {
                state.write_u8(5);
                bytes.hash(state);
            }
            Scalar::List(items) => {
                state.write_u8(6);
                items.hash(state);
            }
        }
    }
}

/// Lowercase hex rendering used for blobs
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Boolean(b) => serializer.serialize_bool(*b),
            Scalar::Integer(n) => serializer.serialize_i64(*n),
            Scalar::Real(x) => serializer.serialize_f64(*x),
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::Blob(bytes) => serializer.serialize_str(&hex(bytes)),
            Scalar::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Boolean(b) => write!(f, "{}", b),
            Scalar::Integer(n) => write!(f, "{}", n),
            Scalar::Real(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "{}", s),
            Scalar::Blob(bytes) => write!(f, "x'{}'", hex(bytes)),
            Scalar::List(items) => {
                let rendered: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

// Conversion traits for building rows in tests and fixtures
impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Integer(n)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Real(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Boolean(b)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(val) => val.into(),
            None => Scalar::Null,
        }
    }
}
