//! JSON text codec for envelopes.
//!
//! Both directions are total: a failure is logged and reported as `None`,
//! and callers drop the frame.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Encode a value into a JSON text frame.
pub fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "failed to encode frame");
            None
        }
    }
}

/// Decode a JSON text frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, frame = %truncate(text, 256), "failed to decode frame");
            None
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
