//! Structural schema check for inbound envelopes.
//!
//! Runs on the raw JSON value before typed decoding so the rejection reason
//! can be logged alongside the offending payload.

use crate::envelope::{Envelope, PROTOCOL_VERSION};
use crate::error::{HubError, HubResult};
use serde_json::{Map, Value};

/// Fields an envelope may carry. Anything else is rejected.
pub const ALLOWED_FIELDS: &[&str] = &[
    "id", "to", "from", "type", "content", "err", "cb", "date", "version",
];

/// Validate a raw JSON value and convert it into an [`Envelope`].
pub fn validate(raw: Value) -> HubResult<Envelope> {
    let Value::Object(map) = &raw else {
        return Err(invalid("envelope must be a JSON object"));
    };

    if let Some(extra) = map.keys().find(|k| !ALLOWED_FIELDS.contains(&k.as_str())) {
        return Err(invalid(format!("unexpected field `{extra}`")));
    }

    require_string(map, "id")?;
    require_string(map, "to")?;
    optional_string(map, "from")?;
    optional_string(map, "type")?;

    if let Some(cb) = map.get("cb") {
        if !cb.is_boolean() {
            return Err(invalid("`cb` must be a boolean"));
        }
    }
    if let Some(date) = map.get("date") {
        if !(date.is_i64() || date.is_u64()) {
            return Err(invalid("`date` must be an integer"));
        }
    }
    if let Some(version) = map.get("version") {
        match version.as_u64() {
            Some(v) if (1..=PROTOCOL_VERSION).contains(&v) => {}
            Some(v) => return Err(invalid(format!("unsupported version {v}"))),
            None => return Err(invalid("`version` must be a positive integer")),
        }
    }

    serde_json::from_value(raw).map_err(|e| invalid(e.to_string()))
}

fn require_string(map: &Map<String, Value>, field: &str) -> HubResult<()> {
    match map.get(field) {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(invalid(format!("`{field}` must be a string"))),
        None => Err(invalid(format!("missing required field `{field}`"))),
    }
}

fn optional_string(map: &Map<String, Value>, field: &str) -> HubResult<()> {
    match map.get(field) {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(invalid(format!("`{field}` must be a string"))),
    }
}

fn invalid(reason: impl Into<String>) -> HubError {
    HubError::Validation(reason.into())
}
