//! Building MessagePack inputs and taking outputs apart again.

use crate::codec::Cursor;
use crate::error::Result;
use rmp::encode;
use serde_json::Value;

/// Encode a JSON value as MessagePack, appending to `out`.
///
/// Integers become the smallest fitting int, objects become maps with str
/// keys (in `serde_json`'s key order).
///
/// # Errors
/// Returns an error if a collection is longer than `u32::MAX`.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> anyhow::Result<()> {
    match value {
        Value::Null => encode::write_nil(out)?,
        Value::Bool(b) => encode::write_bool(out, *b)?,
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                encode::write_uint(out, u)?;
            } else if let Some(i) = n.as_i64() {
                encode::write_sint(out, i)?;
            } else if let Some(f) = n.as_f64() {
                encode::write_f64(out, f)?;
            }
        }
        Value::String(s) => encode::write_str(out, s)?,
        Value::Array(items) => {
            encode::write_array_len(out, u32::try_from(items.len())?)?;
            for item in items {
                encode_value(item, out)?;
            }
        }
        Value::Object(map) => {
            encode::write_map_len(out, u32::try_from(map.len())?)?;
            for (k, v) in map {
                encode::write_str(out, k)?;
                encode_value(v, out)?;
            }
        }
    }
    Ok(())
}

/// Encoding of a single value.
///
/// # Panics
/// Panics if the value cannot be encoded.
#[must_use]
pub fn value(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(v, &mut out).expect("encode value");
    out
}

/// Encoding of one record with its fields in the given order.
///
/// ```
/// use msgsplit::testing::record;
/// use serde_json::json;
///
/// let bytes = record(&[("a", json!(1))]);
/// assert_eq!(bytes, [0x81, 0xa1, b'a', 0x01]);
/// ```
///
/// # Panics
/// Panics if a field cannot be encoded.
#[must_use]
pub fn record(fields: &[(&str, Value)]) -> Vec<u8> {
    let mut out = Vec::new();
    let len = u32::try_from(fields.len()).expect("field count fits u32");
    encode::write_map_len(&mut out, len).expect("encode map header");
    for (k, v) in fields {
        encode::write_str(&mut out, k).expect("encode key");
        encode_value(v, &mut out).expect("encode field");
    }
    out
}

/// Split a stream of back-to-back encoded values into the encoding of each.
///
/// Works for column outputs (one value per row) and shard outputs (one map
/// per record) alike.
///
/// # Errors
/// Decode error if the bytes are not a sequence of complete values.
pub fn split_values(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cursor = Cursor::new(bytes);
    let mut values = Vec::new();
    while !cursor.is_at_end()? {
        let mut raw = Vec::new();
        cursor.read_raw_value(&mut raw)?;
        values.push(raw);
    }
    Ok(values)
}

/// A small mixed-type record set with a missing `distinct_id` in record 3.
#[must_use]
pub fn sample_events() -> Vec<Vec<u8>> {
    vec![
        record(&[
            ("distinct_id", Value::from("abcd1234")),
            ("event", Value::from("click")),
            ("n", Value::from(1)),
        ]),
        record(&[
            ("event", Value::from("view")),
            ("distinct_id", Value::from("abcdxxxx")),
            ("tags", serde_json::json!(["a", "b"])),
        ]),
        record(&[
            ("distinct_id", Value::from("efgh0000")),
            ("score", Value::from(-2.5)),
        ]),
        record(&[("event", Value::from("orphan")), ("n", Value::Null)]),
    ]
}
