//! Normalisation of loosely-typed request parameters.
//!
//! Typed callers serialize the `api` structs directly and bypass this module.
//! Generic callers hand over arbitrary JSON maps (for example decoded from a
//! tool invocation); a nested `Breakpoint` object in such a map is rewritten
//! into the exact shape the backend decodes.

use serde_json::{Map, Value};

use crate::api::Breakpoint;
use crate::error::{RpcError, Result};

const BREAKPOINT_KEY: &str = "Breakpoint";

pub fn normalize_params(params: Value) -> Result<Value> {
    let Value::Object(mut map) = params else {
        return Ok(params);
    };

    if let Some(Value::Object(raw)) = map.remove(BREAKPOINT_KEY) {
        let breakpoint = breakpoint_from_loose(raw)?;
        map.insert(BREAKPOINT_KEY.to_owned(), serde_json::to_value(breakpoint)?);
    }

    Ok(Value::Object(map))
}

fn breakpoint_from_loose(raw: Map<String, Value>) -> Result<Breakpoint> {
    let mut fixed = Map::with_capacity(raw.len());
    for (key, value) in raw {
        let canonical = match key.as_str() {
            "File" | "file" => "file",
            "Line" | "line" => "line",
            "ID" | "Id" | "id" => "id",
            "Name" | "name" => "name",
            "Cond" | "cond" => "Cond",
            "Disabled" | "disabled" => "disabled",
            _ => {
                fixed.insert(key, value);
                continue;
            }
        };

        let value = match canonical {
            "file" => Value::String(file_string(&value)),
            "line" | "id" => Value::from(coerce_integer(canonical, &value)?),
            _ => value,
        };
        fixed.insert(canonical.to_owned(), value);
    }

    Ok(serde_json::from_value(Value::Object(fixed))?)
}

fn file_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn coerce_integer(field: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| RpcError::Protocol(format!("breakpoint `{field}` must be an integer")))
}
