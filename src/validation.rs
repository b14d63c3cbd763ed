//! Input validation for runbook action payloads and run variables
//!
//! Action payloads are opaque to the orchestrator but are persisted with every
//! run, so they are bounded in size and shape before a runbook is accepted.

use serde_json::Value;
use std::collections::HashMap;

/// Maximum allowed size for a serialized action payload (256KB)
const MAX_PAYLOAD_SIZE_BYTES: usize = 256 * 1024;

/// Maximum nesting depth for payload objects/arrays
const MAX_PAYLOAD_DEPTH: usize = 10;

/// Maximum number of keys in an object or items in an array
const MAX_PAYLOAD_ENTRIES: usize = 1000;

/// Maximum string length for payload string values and variable values
const MAX_STRING_LENGTH: usize = 10_000;

/// Validates an action payload for size and structural bounds
pub fn validate_action_payload(value: &Value) -> Result<(), String> {
    let serialized =
        serde_json::to_string(value).map_err(|e| format!("Invalid JSON structure: {e}"))?;

    if serialized.len() > MAX_PAYLOAD_SIZE_BYTES {
        return Err(format!(
            "payload too large: {} bytes (max: {MAX_PAYLOAD_SIZE_BYTES})",
            serialized.len()
        ));
    }

    validate_depth(value, 0)
}

fn validate_depth(value: &Value, current_depth: usize) -> Result<(), String> {
    if current_depth > MAX_PAYLOAD_DEPTH {
        return Err(format!(
            "payload nesting too deep: {current_depth} (max: {MAX_PAYLOAD_DEPTH})"
        ));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_PAYLOAD_ENTRIES {
                return Err(format!(
                    "too many keys: {} (max: {MAX_PAYLOAD_ENTRIES})",
                    map.len()
                ));
            }
            for (key, val) in map {
                if key.len() > MAX_STRING_LENGTH {
                    return Err(format!("key too long: {} chars", key.len()));
                }
                validate_depth(val, current_depth + 1)?;
            }
        }
        Value::Array(items) => {
            if items.len() > MAX_PAYLOAD_ENTRIES {
                return Err(format!(
                    "array too large: {} items (max: {MAX_PAYLOAD_ENTRIES})",
                    items.len()
                ));
            }
            for item in items {
                validate_depth(item, current_depth + 1)?;
            }
        }
        Value::String(s) => {
            if s.len() > MAX_STRING_LENGTH {
                return Err(format!(
                    "string too long: {} chars (max: {MAX_STRING_LENGTH})",
                    s.len()
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Payloads handed to the UI automation engine and custom handlers must be objects
pub fn require_object_payload(value: &Value) -> Result<(), String> {
    match value {
        Value::Object(_) => Ok(()),
        Value::Null => Err("action payload is missing".to_string()),
        other => Err(format!(
            "action payload must be a JSON object, got {}",
            json_type_name(other)
        )),
    }
}

/// Validates run variables supplied when a run is triggered
pub fn validate_run_variables(variables: &HashMap<String, String>) -> Result<(), String> {
    for (key, value) in variables {
        if key.trim().is_empty() {
            return Err("variable names must not be empty".to_string());
        }
        if key.contains('}') || key.contains("${") {
            return Err(format!("invalid variable name: {key}"));
        }
        if value.len() > MAX_STRING_LENGTH {
            return Err(format!("variable '{key}' value too long"));
        }
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
