use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single scalar value. The fundamental unit of data flowing between
/// connections, the merge step, and callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int64(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Encode into a type-tagged binary key. Used for hash-join keys,
    /// broadcast dedup keys, and shard hashing, so that values of different
    /// types never collide and equal values always encode identically.
    pub fn encode_key(&self, buf: &mut Vec<u8>) {
        match self {
            Datum::Null => buf.push(0x00),
            Datum::Boolean(b) => {
                buf.push(0x01);
                buf.push(if *b { 1 } else { 0 });
            }
            Datum::Int64(v) => {
                buf.push(0x02);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Float64(v) => {
                buf.push(0x03);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Text(s) => {
                buf.push(0x04);
                buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Datum::Bytes(b) => {
                buf.push(0x05);
                buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
                buf.extend_from_slice(b);
            }
        }
    }

    pub fn key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        self.encode_key(&mut buf);
        buf
    }
}

/// Total ordering over datums for post-merge ORDER BY. Nulls sort first;
/// numeric types compare cross-type; unrelated types compare equal.
pub fn cmp_datum(a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (Datum::Null, Datum::Null) => Ordering::Equal,
        (Datum::Null, _) => Ordering::Less,
        (_, Datum::Null) => Ordering::Greater,
        (Datum::Int64(x), Datum::Int64(y)) => x.cmp(y),
        (Datum::Float64(x), Datum::Float64(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Int64(x), Datum::Float64(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Datum::Float64(x), Datum::Int64(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (Datum::Text(x), Datum::Text(y)) => x.cmp(y),
        (Datum::Boolean(x), Datum::Boolean(y)) => x.cmp(y),
        (Datum::Bytes(x), Datum::Bytes(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "'{}'", s),
            Datum::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int64(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Boolean(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_distinguishes_types() {
        // Int64(1) and Boolean(true) must not collide.
        assert_ne!(Datum::Int64(1).key_bytes(), Datum::Boolean(true).key_bytes());
        // Text("1") and Int64(1) must not collide.
        assert_ne!(Datum::Text("1".into()).key_bytes(), Datum::Int64(1).key_bytes());
    }

    #[test]
    fn key_encoding_is_stable() {
        let d = Datum::Text("file1".into());
        assert_eq!(d.key_bytes(), d.key_bytes());
    }

    #[test]
    fn ordering_nulls_first() {
        assert_eq!(cmp_datum(&Datum::Null, &Datum::Int64(0)), Ordering::Less);
        assert_eq!(cmp_datum(&Datum::Int64(0), &Datum::Null), Ordering::Greater);
    }

    #[test]
    fn ordering_cross_numeric() {
        assert_eq!(cmp_datum(&Datum::Int64(2), &Datum::Float64(1.5)), Ordering::Greater);
    }
}
