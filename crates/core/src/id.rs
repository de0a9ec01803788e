// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical 1-Wire device identifiers and target parsing.
//!
//! Grounded on `pyowmaster/owidutil.py`: `RE_DEV_ID`, `owid_from_path`,
//! `is_owid`, `parse_target`.

use regex::Regex;
use std::sync::OnceLock;

fn dev_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"([A-F0-9]{2}\.[A-F0-9]{12})").unwrap()
    })
}

fn dev_channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^([A-F0-9]{2}\.[A-F0-9]{12})\.([0-9A-Za-z]+)$").unwrap()
    })
}

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[A-Za-z0-9_-]+$").unwrap()
    })
}

fn alias_channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^([A-Za-z0-9_-]+)\.([0-9A-Za-z]+)$").unwrap()
    })
}

/// Try to find a canonical 1-Wire ID (`XX.YYYYYYYYYYYY`) anywhere in `path`.
///
/// Idempotent: `owid_from_path(owid_from_path(x).unwrap())` returns the same value.
pub fn owid_from_path(path: &str) -> Option<String> {
    dev_id_re().find(path).map(|m| m.as_str().to_owned())
}

/// True if `path` is *exactly* a canonical device ID (anchored match).
pub fn is_owid(s: &str) -> bool {
    match owid_from_path(s) {
        Some(found) => found == s,
        None => false,
    }
}

/// True if `alias` is a syntactically valid device alias.
pub fn is_valid_alias(alias: &str) -> bool {
    alias_re().is_match(alias)
}

/// Parse a `<id-or-alias>[.<channel>]` target string.
///
/// Returns `(id_or_alias, channel)`, matching `pyowmaster.owidutil.parse_target`.
pub fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    if let Some(c) = dev_channel_re().captures(target) {
        #[allow(clippy::unwrap_used)]
        return (
            Some(c.get(1).unwrap().as_str().to_owned()),
            Some(c.get(2).unwrap().as_str().to_owned()),
        );
    }

    if let Some(c) = alias_channel_re().captures(target) {
        #[allow(clippy::unwrap_used)]
        return (
            Some(c.get(1).unwrap().as_str().to_owned()),
            Some(c.get(2).unwrap().as_str().to_owned()),
        );
    }

    if let Some(id) = owid_from_path(target) {
        return (Some(id), None);
    }

    if is_valid_alias(target) {
        return (Some(target.to_owned()), None);
    }

    (None, None)
}

/// Extract the two-hex-digit family code from a canonical device ID.
pub fn family_code(id: &str) -> Option<&str> {
    id.get(0..2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_id_anywhere_in_path() {
        assert_eq!(
            owid_from_path("/uncached/10.0123456789AB/temperature"),
            Some("10.0123456789AB".to_owned())
        );
    }

    #[test]
    fn rejects_non_id() {
        assert_eq!(owid_from_path("not-an-id"), None);
    }

    #[test]
    fn idempotent() {
        let once = owid_from_path("/10.0123456789AB/temperature").unwrap();
        let twice = owid_from_path(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn is_owid_requires_exact_match() {
        assert!(is_owid("10.0123456789AB"));
        assert!(!is_owid("/10.0123456789AB/temperature"));
    }

    #[test]
    fn parse_target_with_channel() {
        assert_eq!(
            parse_target("12.AAAAAAAAAAAA.A"),
            (Some("12.AAAAAAAAAAAA".to_owned()), Some("A".to_owned()))
        );
    }

    #[test]
    fn parse_target_alias_with_channel() {
        assert_eq!(
            parse_target("frontdoor.A"),
            (Some("frontdoor".to_owned()), Some("A".to_owned()))
        );
    }

    #[test]
    fn parse_target_bare_id() {
        assert_eq!(
            parse_target("10.0123456789AB"),
            (Some("10.0123456789AB".to_owned()), None)
        );
    }

    #[test]
    fn parse_target_bare_alias() {
        assert_eq!(
            parse_target("frontdoor"),
            (Some("frontdoor".to_owned()), None)
        );
    }

    #[test]
    fn family_code_extracts_prefix() {
        assert_eq!(family_code("29.BBBBBBBBBBBB"), Some("29"));
    }
}
