//! Login credential checking.
//!
//! A connection's first `login` envelope carries opaque credentials. The
//! gateway hands them to an [`Authenticator`], which either names the user or
//! refuses. The gateway then derives the connection identity from that name.

use futures_util::future::{self, BoxFuture, FutureExt};
use hub_core::{HubError, HubResult};
use serde_json::Value;
use tracing::debug;

/// Checks login credentials and returns the bare user name.
pub trait Authenticator: Send + Sync {
    fn login<'a>(&'a self, credentials: &'a Value) -> BoxFuture<'a, HubResult<String>>;
}

/// Accepts any non-empty user name.
///
/// Credentials are either `{"username": "alice", ...}` or the bare string
/// `"alice"`. Names must not contain `/`, which separates the identity suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicAuthenticator;

impl Authenticator for BasicAuthenticator {
    fn login<'a>(&'a self, credentials: &'a Value) -> BoxFuture<'a, HubResult<String>> {
        future::ready(basic_username(credentials)).boxed()
    }
}

fn basic_username(credentials: &Value) -> HubResult<String> {
    let name = match credentials {
        Value::String(name) => name.as_str(),
        Value::Object(map) => match map.get("username") {
            Some(Value::String(name)) => name.as_str(),
            _ => return Err(HubError::Login("missing username".into())),
        },
        _ => return Err(HubError::Login("credentials must be an object or string".into())),
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(HubError::Login("empty username".into()));
    }
    if name.contains('/') {
        return Err(HubError::Login(format!("invalid username: {name}")));
    }
    debug!(username = %name, "basic login accepted");
    Ok(name.to_string())
}
