// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{cmp::Ordering, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use config::utils::time::format_fetch_datetime;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use uuid::Uuid;

/// An association-typed attribute value: the foreign key plus the target
/// entity and its primary-name value when the service returned one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub id: Uuid,
    pub logical_name: String,
    pub name: Option<String>,
}

impl EntityReference {
    pub fn new(id: Uuid, logical_name: impl Into<String>) -> Self {
        Self {
            id,
            logical_name: logical_name.into(),
            name: None,
        }
    }
}

/// A tagged runtime scalar. Values carry their type; nothing is inferred at
/// plan time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    String(String),
    Timestamp(DateTime<Utc>),
    Guid(Uuid),
    Binary(Bytes),
    Reference(EntityReference),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Guid(_) => "guid",
            Value::Binary(_) => "binary",
            Value::Reference(_) => "reference",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) => d.to_i64(),
            _ => None,
        }
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Numeric addition used when merging SUM/AVG partials. Integer addition
    /// promotes to decimal on overflow.
    pub fn add_numeric(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => Some(v.clone()),
            (Value::Int(a), Value::Int(b)) => Some(match a.checked_add(*b) {
                Some(v) => Value::Int(v),
                None => Value::Decimal(Decimal::from(*a) + Decimal::from(*b)),
            }),
            _ => {
                let a = self.to_decimal()?;
                let b = other.to_decimal()?;
                Some(Value::Decimal(a + b))
            }
        }
    }

    /// Engine ordering: numerics compare across int/decimal, strings compare
    /// case-insensitively (the service collation), everything else compares
    /// within its own type only. Null orders before any non-null value so
    /// that sort keys are total.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => {
                Some(a.to_lowercase().cmp(&b.to_lowercase()))
            }
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Reference(a), Value::Reference(b)) => {
                Some((&a.logical_name, a.id).cmp(&(&b.logical_name, b.id)))
            }
            _ => {
                let a = self.to_decimal()?;
                let b = other.to_decimal()?;
                Some(a.cmp(&b))
            }
        }
    }

    /// Stable, type-tagged identity used for DISTINCT, INTERSECT/EXCEPT and
    /// aggregate grouping. Values of different runtime type never share a
    /// key (`1` and `"1"` stay distinct); all nulls share one key; strings
    /// fold case like [`Value::compare`].
    pub fn group_key(&self) -> String {
        match self {
            Value::Null => "∅".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("n:{i}"),
            // normalized so that 1.50 and 1.5 share a key
            Value::Decimal(d) => format!("n:{}", d.normalize()),
            Value::String(s) => format!("s:{}", s.to_lowercase()),
            Value::Timestamp(t) => format!("t:{}", t.timestamp_micros()),
            Value::Guid(g) => format!("g:{g}"),
            Value::Binary(b) => {
                let mut key = String::with_capacity(2 + b.len() * 2);
                key.push_str("x:");
                for byte in b.iter() {
                    key.push_str(&format!("{byte:02x}"));
                }
                key
            }
            Value::Reference(r) => format!("r:{}:{}", r.logical_name, r.id),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{}", format_fetch_datetime(t)),
            Value::Guid(g) => write!(f, "{g}"),
            Value::Binary(b) => write!(f, "0x{}", b.iter().fold(String::new(), |mut s, b| {
                s.push_str(&format!("{b:02x}"));
                s
            })),
            Value::Reference(r) => match &r.name {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "{}", r.id),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_compare_across_numeric_types() {
        let a = Value::Int(2);
        let b = Value::Decimal(Decimal::new(25, 1)); // 2.5
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(b.compare(&a), Some(Ordering::Greater));
        assert_eq!(
            Value::Int(3).compare(&Value::Decimal(Decimal::from(3))),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_compare_strings_case_insensitive() {
        assert_eq!(
            Value::from("Contoso").compare(&Value::from("contoso")),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_compare_null_orders_first() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Null), Some(Ordering::Equal));
    }

    #[test]
    fn test_group_key_type_tagged() {
        // same stringification, different runtime type, different key
        assert_ne!(Value::Int(1).group_key(), Value::from("1").group_key());
        // nulls share one key
        assert_eq!(Value::Null.group_key(), Value::Null.group_key());
        // decimal normalization
        assert_eq!(
            Value::Decimal(Decimal::new(150, 2)).group_key(),
            Value::Decimal(Decimal::new(15, 1)).group_key()
        );
        // int and its decimal twin share a numeric key
        assert_eq!(
            Value::Int(7).group_key(),
            Value::Decimal(Decimal::from(7)).group_key()
        );
    }

    #[test]
    fn test_add_numeric_overflow_promotes() {
        let sum = Value::Int(i64::MAX).add_numeric(&Value::Int(1)).unwrap();
        assert!(matches!(sum, Value::Decimal(_)));
    }

    #[test]
    fn test_display_timestamp() {
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(Value::Timestamp(t).to_string(), "2023-06-01T12:30:00Z");
    }
}
