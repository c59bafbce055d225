//! Request body field parsing.
//!
//! Mutation endpoints accept the value under either a primary key
//! (`read_only`, `sync_interval_minutes`) or the generic `value` key. The
//! primary key is looked at first.

use serde_json::{Map, Value};

fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Extract a boolean stored under `primary` or `alternate`.
///
/// Returns `None` when the body is not a JSON object or neither key holds a
/// boolean.
pub fn parse_bool_field(body: &[u8], primary: &str, alternate: &str) -> Option<bool> {
    let map = parse_object(body)?;
    [primary, alternate]
        .into_iter()
        .find_map(|key| map.get(key).and_then(Value::as_bool))
}

/// Extract a whole number `>= min` stored under `primary` or `alternate`.
///
/// - `Ok(None)`: body unreadable or neither key present
/// - `Err(msg)`: the first key present holds something other than an
///   acceptable whole number; `msg` names that key
///
/// Integral floats such as `5.0` are accepted.
pub fn parse_int_field(
    body: &[u8],
    primary: &str,
    alternate: &str,
    min: i64,
) -> Result<Option<i64>, String> {
    let Some(map) = parse_object(body) else {
        return Ok(None);
    };
    let Some((key, value)) = [primary, alternate]
        .into_iter()
        .find_map(|key| map.get(key).map(|value| (key, value)))
    else {
        return Ok(None);
    };

    let number = match value {
        Value::Number(number) => number,
        _ => return Err(format!("{} must be a number", key)),
    };

    let whole = match number.as_i64() {
        Some(i) => i,
        None => {
            let f = number.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() || f.fract() != 0.0 {
                return Err(format!("{} must be a whole number", key));
            }
            // Saturates for values beyond i64.
            f as i64
        }
    };

    if whole < min {
        return Err(format!("{} must be at least {}", key, min));
    }
    Ok(Some(whole))
}
