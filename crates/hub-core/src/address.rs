//! Actor addresses and their bare/full forms.
//!
//! A full address carries a connection-instance suffix after the first `/`
//! (`alice/3f2a…`); its bare form is the part before it (`alice`).

use serde::{Deserialize, Serialize};

/// How an address is compared and stored by a subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// Use the address exactly as given.
    #[default]
    Full,
    /// Strip any instance suffix before storage or comparison.
    Bare,
}

/// Whether `address` carries an instance suffix.
pub fn is_full(address: &str) -> bool {
    matches!(address.split_once('/'), Some((bare, rest)) if !bare.is_empty() && !rest.is_empty())
}

/// The bare form of `address`.
pub fn bare(address: &str) -> &str {
    if is_full(address) {
        address.split_once('/').map(|(b, _)| b).unwrap_or(address)
    } else {
        address
    }
}

/// Normalize `address` to the canonical form for `mode`.
pub fn normalize(address: &str, mode: AddressMode) -> String {
    match mode {
        AddressMode::Full => address.to_string(),
        AddressMode::Bare => bare(address).to_string(),
    }
}

/// Build a full address from a bare name and an instance suffix.
pub fn full(bare: &str, suffix: &str) -> String {
    format!("{bare}/{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_bare_forms() {
        assert!(is_full("alice/abc"));
        assert!(!is_full("alice"));
        assert!(!is_full("alice/"));
        assert!(!is_full("/abc"));
        assert_eq!(bare("alice/abc"), "alice");
        assert_eq!(bare("alice"), "alice");
    }

    #[test]
    fn normalize_per_mode() {
        assert_eq!(normalize("bob/1", AddressMode::Full), "bob/1");
        assert_eq!(normalize("bob/1", AddressMode::Bare), "bob");
        assert_eq!(normalize("bob", AddressMode::Bare), "bob");
    }

    #[test]
    fn mode_parses_lowercase() {
        let mode: AddressMode = serde_json::from_str("\"bare\"").unwrap();
        assert_eq!(mode, AddressMode::Bare);
        assert_eq!(AddressMode::default(), AddressMode::Full);
    }

    #[test]
    fn suffix_is_only_split_once() {
        assert_eq!(bare("carol/a/b"), "carol");
        assert_eq!(full("carol", "x1"), "carol/x1");
    }
}
