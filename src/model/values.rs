/*!
Typed values and their canonical binary encoding.

Column statistics store lower and upper bounds as opaque byte strings; every
engine reading the table must agree on those bytes. [encode_stat_value] and
[decode_stat_value] implement the canonical encoding, [Value::compare] the
per-type comparator used for min/max tracking and zone-map pruning.
*/

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::decimal::Decimal;
use crate::model::types::PrimitiveType;

/// Maximum length of truncated string bounds, in code points.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 16;

/// A single primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// True or false.
    Boolean(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit IEEE 754 float.
    Float(f32),
    /// 64-bit IEEE 754 float.
    Double(f64),
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since midnight.
    Time(i64),
    /// Microseconds since 1970-01-01 00:00:00, no timezone.
    Timestamp(i64),
    /// Microseconds since 1970-01-01 00:00:00 UTC.
    Timestamptz(i64),
    /// Nanoseconds since 1970-01-01 00:00:00, no timezone.
    TimestampNs(i64),
    /// Nanoseconds since 1970-01-01 00:00:00 UTC.
    TimestamptzNs(i64),
    /// UTF-8 character sequence.
    String(String),
    /// Universally unique identifier.
    Uuid(Uuid),
    /// Fixed length byte array.
    Fixed(Vec<u8>),
    /// Arbitrary-length byte array.
    Binary(Vec<u8>),
    /// Fixed point decimal.
    Decimal(Decimal),
}

impl Value {
    /// Build a date value from a calendar date.
    pub fn date_from(date: NaiveDate) -> Value {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        Value::Date((date - epoch).num_days() as i32)
    }

    /// Build a microsecond timestamp value from a datetime.
    pub fn timestamp_from(datetime: NaiveDateTime) -> Value {
        Value::Timestamp(datetime.and_utc().timestamp_micros())
    }

    /// Whether the value is a floating point NaN. NaN is unordered and is
    /// excluded from min/max tracking.
    pub fn is_nan(&self) -> bool {
        match self {
            Value::Float(f) => f.is_nan(),
            Value::Double(d) => d.is_nan(),
            _ => false,
        }
    }

    /// Compare two values of the same type.
    ///
    /// Booleans order false before true; integers and date/time types
    /// numerically; strings and UUIDs lexicographically over code points;
    /// binary and fixed lexicographically over unsigned bytes; decimals
    /// numerically over the unscaled value. Returns `None` for mismatched
    /// variants or when either side is NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Timestamptz(a), Value::Timestamptz(b)) => Some(a.cmp(b)),
            (Value::TimestampNs(a), Value::TimestampNs(b)) => Some(a.cmp(b)),
            (Value::TimestamptzNs(a), Value::TimestamptzNs(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Fixed(a), Value::Fixed(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.unscaled().cmp(b.unscaled())),
            _ => None,
        }
    }

    /// Estimated on-disk size of the value in bytes, used for column size
    /// accounting.
    pub fn estimate_size(&self) -> u64 {
        match self {
            Value::Boolean(_) => 1,
            Value::Int(_) | Value::Float(_) | Value::Date(_) => 4,
            Value::Long(_)
            | Value::Double(_)
            | Value::Time(_)
            | Value::Timestamp(_)
            | Value::Timestamptz(_)
            | Value::TimestampNs(_)
            | Value::TimestamptzNs(_) => 8,
            Value::String(s) => s.len() as u64,
            Value::Uuid(_) => 16,
            Value::Fixed(b) | Value::Binary(b) => b.len() as u64,
            Value::Decimal(d) => d.to_bytes().len() as u64,
        }
    }
}

/// Encode a value into the canonical bound representation.
///
/// int and date: 4-byte little-endian. long, time and all timestamp
/// variants: 8-byte little-endian. float/double: IEEE 754 little-endian.
/// boolean: a single `0`/`1` byte. string: UTF-8 bytes. uuid: 16-byte
/// big-endian. decimal: minimal two's-complement big-endian unscaled value.
pub fn encode_stat_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Boolean(b) => vec![u8::from(*b)],
        Value::Int(i) => i.to_le_bytes().to_vec(),
        Value::Long(l) => l.to_le_bytes().to_vec(),
        Value::Float(f) => f.to_le_bytes().to_vec(),
        Value::Double(d) => d.to_le_bytes().to_vec(),
        Value::Date(d) => d.to_le_bytes().to_vec(),
        Value::Time(t) => t.to_le_bytes().to_vec(),
        Value::Timestamp(t)
        | Value::Timestamptz(t)
        | Value::TimestampNs(t)
        | Value::TimestamptzNs(t) => t.to_le_bytes().to_vec(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Uuid(u) => u.as_bytes().to_vec(),
        Value::Fixed(b) | Value::Binary(b) => b.clone(),
        Value::Decimal(d) => d.to_bytes(),
    }
}

/// Decode a canonical bound representation back into a typed value.
pub fn decode_stat_value(bytes: &[u8], primitive: &PrimitiveType) -> Result<Value> {
    match primitive {
        PrimitiveType::Boolean => match bytes {
            [0] => Ok(Value::Boolean(false)),
            [1] => Ok(Value::Boolean(true)),
            _ => Err(Error::InvalidFormat("boolean bound".to_string())),
        },
        PrimitiveType::Int => Ok(Value::Int(i32::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Long => Ok(Value::Long(i64::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Float => Ok(Value::Float(f32::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Double => Ok(Value::Double(f64::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Date => Ok(Value::Date(i32::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Time => Ok(Value::Time(i64::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Timestamp => Ok(Value::Timestamp(i64::from_le_bytes(bytes.try_into()?))),
        PrimitiveType::Timestamptz => {
            Ok(Value::Timestamptz(i64::from_le_bytes(bytes.try_into()?)))
        }
        PrimitiveType::TimestampNs => {
            Ok(Value::TimestampNs(i64::from_le_bytes(bytes.try_into()?)))
        }
        PrimitiveType::TimestamptzNs => {
            Ok(Value::TimestamptzNs(i64::from_le_bytes(bytes.try_into()?)))
        }
        PrimitiveType::String => Ok(Value::String(String::from_utf8(bytes.to_vec())?)),
        PrimitiveType::Uuid => Ok(Value::Uuid(Uuid::from_slice(bytes)?)),
        PrimitiveType::Fixed(_) => Ok(Value::Fixed(bytes.to_vec())),
        PrimitiveType::Binary => Ok(Value::Binary(bytes.to_vec())),
        PrimitiveType::Decimal { precision, scale } => Ok(Value::Decimal(Decimal::from_bytes(
            bytes,
            *precision as u8,
            *scale as u32,
        )?)),
        other => Err(Error::NotSupported(format!("stat bounds for {}", other))),
    }
}

/// Truncate a string to at most `max_len` code points. Used for lower
/// bounds, where a prefix is always a valid lower bound.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

/// Truncate a string to at most `max_len` code points while keeping the
/// result an upper bound for the input.
///
/// The truncated prefix alone compares lower than the original, so the last
/// code point that is not at the Unicode maximum is incremented and anything
/// after it dropped. If every code point of the prefix is saturated the
/// prefix is kept unchanged.
pub fn truncate_upper_bound(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut chars: Vec<char> = s.chars().take(max_len).collect();
    for index in (0..chars.len()).rev() {
        if let Some(incremented) = increment_char(chars[index]) {
            chars.truncate(index);
            chars.push(incremented);
            return chars.into_iter().collect();
        }
    }
    chars.into_iter().collect()
}

/// The next valid code point after `c`, skipping the surrogate range.
fn increment_char(c: char) -> Option<char> {
    if c == char::MAX {
        return None;
    }
    let mut next = c as u32 + 1;
    if next == 0xD800 {
        next = 0xE000;
    }
    char::from_u32(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use proptest::prelude::*;

    #[test]
    fn test_encode_int_little_endian() {
        assert_eq!(
            encode_stat_value(&Value::Int(2018)),
            vec![0xE2, 0x07, 0x00, 0x00]
        );
        assert_eq!(
            encode_stat_value(&Value::Int(2021)),
            vec![0xE5, 0x07, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_widths() {
        assert_eq!(encode_stat_value(&Value::Boolean(true)), vec![1]);
        assert_eq!(encode_stat_value(&Value::Date(19000)).len(), 4);
        assert_eq!(encode_stat_value(&Value::Time(0)).len(), 8);
        assert_eq!(encode_stat_value(&Value::Timestamp(0)).len(), 8);
        assert_eq!(encode_stat_value(&Value::TimestampNs(0)).len(), 8);
        assert_eq!(encode_stat_value(&Value::Long(-1)).len(), 8);
    }

    #[test]
    fn test_encode_uuid_big_endian() {
        let uuid = Uuid::parse_str("fb072c92-a02b-11e9-ae9c-1bb7bc9eca94").unwrap();
        let bytes = encode_stat_value(&Value::Uuid(uuid));
        assert_eq!(bytes[0..4], [0xfb, 0x07, 0x2c, 0x92]);
    }

    #[test]
    fn test_decode_roundtrip() {
        let cases = vec![
            (Value::Boolean(false), PrimitiveType::Boolean),
            (Value::Int(-42), PrimitiveType::Int),
            (Value::Long(1 << 40), PrimitiveType::Long),
            (Value::Float(1.5), PrimitiveType::Float),
            (Value::Double(-2.25), PrimitiveType::Double),
            (Value::Date(19000), PrimitiveType::Date),
            (Value::Time(86_399_000_000), PrimitiveType::Time),
            (Value::Timestamp(1_662_532_818_843_000), PrimitiveType::Timestamp),
            (Value::TimestamptzNs(1_662_532_818_843_000_000), PrimitiveType::TimestamptzNs),
            (Value::String("taxis".to_string()), PrimitiveType::String),
            (Value::Uuid(Uuid::nil()), PrimitiveType::Uuid),
            (Value::Fixed(vec![1, 2, 3]), PrimitiveType::Fixed(3)),
            (Value::Binary(vec![0xff, 0x00]), PrimitiveType::Binary),
            (
                Value::Decimal(Decimal::new(BigInt::from(-12345), 9, 2).unwrap()),
                PrimitiveType::Decimal {
                    precision: 9,
                    scale: 2,
                },
            ),
        ];
        for (value, primitive) in cases {
            let bytes = encode_stat_value(&value);
            let back = decode_stat_value(&bytes, &primitive).unwrap();
            assert_eq!(value, back);
        }
    }

    #[test]
    fn test_compare_nan_unordered() {
        assert_eq!(
            Value::Float(f32::NAN).compare(&Value::Float(1.0)),
            None
        );
        assert!(Value::Float(f32::NAN).is_nan());
        assert!(!Value::Float(1.0).is_nan());
    }

    #[test]
    fn test_compare_binary_unsigned() {
        let low = Value::Binary(vec![0x01]);
        let high = Value::Binary(vec![0xff]);
        assert_eq!(low.compare(&high), Some(Ordering::Less));
    }

    #[test]
    fn test_truncate_upper_bound_increments() {
        assert_eq!(truncate_upper_bound("abcz", 3), "abd");
        assert_eq!(truncate_upper_bound("abc", 3), "abc");
        assert_eq!(truncate_upper_bound("ab", 3), "ab");
        assert_eq!(truncate_string("abca", 3), "abc");
    }

    #[test]
    fn test_truncate_upper_bound_saturated_tail() {
        let s = format!("a{}{}b", char::MAX, char::MAX);
        assert_eq!(truncate_upper_bound(&s, 3), "b");
        let all_max = format!("{}{}{}{}", char::MAX, char::MAX, char::MAX, char::MAX);
        assert_eq!(
            truncate_upper_bound(&all_max, 3),
            format!("{}{}{}", char::MAX, char::MAX, char::MAX)
        );
    }

    proptest! {
        #[test]
        fn test_truncated_upper_bound_is_upper_bound(s in "\\PC{0,64}", max_len in 1usize..20) {
            let truncated = truncate_upper_bound(&s, max_len);
            // only guaranteed when the prefix is not fully saturated
            if truncated != s.chars().take(max_len).collect::<String>()
                || s.chars().count() <= max_len
            {
                prop_assert!(truncated.as_str() >= s.as_str());
            }
            prop_assert!(truncated.chars().count() <= max_len.max(s.chars().count().min(max_len)));
        }

        #[test]
        fn test_long_bound_roundtrip(v in any::<i64>()) {
            let bytes = encode_stat_value(&Value::Long(v));
            prop_assert_eq!(decode_stat_value(&bytes, &PrimitiveType::Long).unwrap(), Value::Long(v));
        }
    }
}
