//! Wire envelope exchanged between clients and the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest envelope version this library understands.
pub const PROTOCOL_VERSION: u64 = 1;

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Login,
    Req,
    Res,
    /// Any tag this version does not recognize; dropped by the session.
    #[default]
    #[serde(other)]
    Unknown,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Login => "login",
            EnvelopeType::Req => "req",
            EnvelopeType::Res => "res",
            EnvelopeType::Unknown => "unknown",
        }
    }
}

/// One message crossing the gateway boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Correlation key, unique per in-flight exchange on a connection.
    pub id: String,
    /// Destination address.
    pub to: String,
    /// Origin address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: EnvelopeType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub err: Value,
    /// Whether the sender expects a reply.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cb: bool,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Envelope {
    /// Build a bare envelope of the given type.
    pub fn new(kind: EnvelopeType, id: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            to: to.into(),
            from: None,
            kind,
            content: Value::Null,
            err: Value::Null,
            cb: false,
            date: None,
            version: None,
        }
    }

    pub fn login(id: impl Into<String>, credentials: Value) -> Self {
        let mut envelope = Self::new(EnvelopeType::Login, id, "");
        envelope.content = credentials;
        envelope
    }

    pub fn request(id: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        let mut envelope = Self::new(EnvelopeType::Req, id, to);
        envelope.content = content;
        envelope
    }

    /// Build the `res` envelope answering `self`, addressed back to its sender.
    pub fn response_to(&self, content: Value, err: Value) -> Self {
        let mut envelope = Self::new(
            EnvelopeType::Res,
            self.id.clone(),
            self.from.clone().unwrap_or_default(),
        );
        envelope.from = Some(self.to.clone());
        envelope.content = content;
        envelope.err = err;
        envelope
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_callback(mut self) -> Self {
        self.cb = true;
        self
    }

    pub fn is_error(&self) -> bool {
        !self.err.is_null()
    }
}

/// Current time in milliseconds since the Unix epoch, as carried in `date`.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Generate a random identifier (hex-encoded, 16 bytes = 32 hex chars).
///
/// Used for correlation ids and identity suffixes.
pub fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_tag_is_preserved_as_unknown() {
        let env: Envelope =
            serde_json::from_value(json!({"id": "1", "to": "x", "type": "message"})).unwrap();
        assert_eq!(env.kind, EnvelopeType::Unknown);
    }

    #[test]
    fn missing_type_defaults_to_unknown() {
        let env: Envelope = serde_json::from_value(json!({"id": "1", "to": "x"})).unwrap();
        assert_eq!(env.kind, EnvelopeType::Unknown);
    }

    #[test]
    fn optional_fields_are_omitted_when_empty() {
        let env = Envelope::request("7", "svc", Value::Null);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value, json!({"id": "7", "to": "svc", "type": "req"}));
    }

    #[test]
    fn response_swaps_addresses_and_keeps_id() {
        let req = Envelope::request("42", "svc", json!(1)).with_from("u1/abc");
        let res = req.response_to(json!("ok"), Value::Null);
        assert_eq!(res.id, "42");
        assert_eq!(res.to, "u1/abc");
        assert_eq!(res.from.as_deref(), Some("svc"));
        assert_eq!(res.kind, EnvelopeType::Res);
        assert!(!res.is_error());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
