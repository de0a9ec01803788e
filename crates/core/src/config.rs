// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration document and the key-path-with-alternatives lookup operator
//! (C10).
//!
//! Grounded on `pyowmaster/ecollections.py` (`resolve_keys`,
//! `traverse_dict_and_list`), retargeted per REDESIGN NOTES §9 from a
//! colon-delimited string mini-language to an explicit [`KeySegment`] enum.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{OwError, OwResult};

/// A parsed configuration document: a YAML-sourced nested value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn get_path(&self, segments: &[String]) -> Option<&ConfigValue> {
        let mut cur = self;
        for seg in segments {
            match cur {
                Self::Map(m) => cur = m.get(seg)?,
                Self::Seq(s) => {
                    let idx: usize = seg.parse().ok()?;
                    cur = s.get(idx)?;
                }
                _ => return None,
            }
        }
        Some(cur)
    }

    fn from_yaml(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Null
                }
            }
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(seq) => {
                Self::Seq(seq.into_iter().map(Self::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_owned(),
                    };
                    out.insert(key, Self::from_yaml(v));
                }
                Self::Map(out)
            }
            serde_yaml::Value::Tagged(t) => Self::from_yaml(t.value),
        }
    }
}

/// One segment of a key path: either a single literal, or a non-empty list
/// of alternatives to try in order.
#[derive(Debug, Clone)]
pub enum KeySegment {
    Literal(String),
    Alternatives(Vec<String>),
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_owned())
    }
}

impl From<Vec<&str>> for KeySegment {
    fn from(alts: Vec<&str>) -> Self {
        Self::Alternatives(alts.into_iter().map(String::from).collect())
    }
}

/// Expand a list of [`KeySegment`]s into every literal path, in declared
/// order (earlier segments vary slowest), mirroring
/// `ecollections.resolve_keys`.
fn expand_paths(segments: &[KeySegment]) -> Vec<Vec<String>> {
    let mut paths: Vec<Vec<String>> = vec![Vec::new()];

    for seg in segments {
        let alts: Vec<&String> = match seg {
            KeySegment::Literal(s) => vec![s],
            KeySegment::Alternatives(v) => v.iter().collect(),
        };

        let mut next = Vec::with_capacity(paths.len() * alts.len());
        for p in &paths {
            for a in &alts {
                let mut np = p.clone();
                np.push((*a).clone());
                next.push(np);
            }
        }
        paths = next;
    }

    paths
}

/// The loaded configuration document, plus the lookup operator.
#[derive(Debug, Clone)]
pub struct Config {
    root: ConfigValue,
}

impl Config {
    pub fn from_value(root: ConfigValue) -> Self {
        Self { root }
    }

    pub fn load(path: &Path) -> OwResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| OwError::configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> OwResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| OwError::configuration(format!("invalid config document: {e}")))?;
        Ok(Self {
            root: ConfigValue::from_yaml(value),
        })
    }

    /// Reload from disk (used by the `SIGHUP` handler).
    pub fn reload(&self, path: &Path) -> OwResult<Self> {
        Self::load(path)
    }

    pub fn root(&self) -> &ConfigValue {
        &self.root
    }

    /// The key-path-with-alternatives lookup operator. Expands `segments` to
    /// every literal path (in order) and returns the first that resolves to
    /// a non-null value.
    pub fn get(&self, segments: &[KeySegment]) -> Option<&ConfigValue> {
        for path in expand_paths(segments) {
            if let Some(v) = self.root.get_path(&path) {
                if !v.is_null() {
                    return Some(v);
                }
            }
        }
        None
    }

    pub fn get_str(&self, segments: &[KeySegment], default: &str) -> String {
        self.get(segments)
            .and_then(ConfigValue::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| default.to_owned())
    }

    pub fn get_f64(&self, segments: &[KeySegment], default: f64) -> f64 {
        self.get(segments).and_then(ConfigValue::as_f64).unwrap_or(default)
    }

    pub fn get_u64(&self, segments: &[KeySegment], default: u64) -> u64 {
        self.get(segments).and_then(ConfigValue::as_u64).unwrap_or(default)
    }

    pub fn get_bool(&self, segments: &[KeySegment], default: bool) -> bool {
        self.get(segments).and_then(ConfigValue::as_bool).unwrap_or(default)
    }

    /// Convenience for a whole section (e.g. `devices`, `devices.aliases`).
    pub fn section(&self, name: &str) -> Option<&ConfigValue> {
        self.get(&[KeySegment::from(name)])
    }
}

/// Helper macro-free constructor for a key path of plain literals.
pub fn path(segments: &[&str]) -> Vec<KeySegment> {
    segments.iter().map(|s| KeySegment::from(*s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_colon_path_lookup() {
        let cfg = Config::from_yaml_str("owmaster:\n  scan_interval: 45\n").unwrap();
        assert_eq!(cfg.get_u64(&path(&["owmaster", "scan_interval"]), 30), 45);
    }

    #[test]
    fn missing_key_uses_default() {
        let cfg = Config::from_yaml_str("owmaster: {}\n").unwrap();
        assert_eq!(cfg.get_u64(&path(&["owmaster", "scan_interval"]), 30), 30);
    }

    #[test]
    fn alternatives_fallback_in_order() {
        let cfg = Config::from_yaml_str("fallback:\n  option: 7\n").unwrap();
        let key = vec![
            KeySegment::from(vec!["section", "fallback"]),
            KeySegment::from("option"),
        ];
        assert_eq!(cfg.get(&key).and_then(ConfigValue::as_u64), Some(7));
    }

    #[test]
    fn alternatives_first_match_wins() {
        let cfg = Config::from_yaml_str("section:\n  option: 1\nfallback:\n  option: 2\n").unwrap();
        let key = vec![
            KeySegment::from(vec!["section", "fallback"]),
            KeySegment::from("option"),
        ];
        assert_eq!(cfg.get(&key).and_then(ConfigValue::as_u64), Some(1));
    }

    #[test]
    fn nested_alternatives_cross_product() {
        let cfg = Config::from_yaml_str("root:\n  fallback:\n    a: yes_val\n").unwrap();
        let key = vec![
            KeySegment::from("root"),
            KeySegment::from(vec!["section", "fallback"]),
            KeySegment::from(vec!["a", "b"]),
        ];
        assert_eq!(cfg.get(&key).and_then(ConfigValue::as_str), Some("yes_val"));
    }

    #[test]
    fn reload_twice_yields_equal_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("owmaster.yml");
        std::fs::write(&file, "owmaster:\n  scan_interval: 10\n").unwrap();

        let a = Config::load(&file).unwrap();
        let b = a.reload(&file).unwrap();
        assert_eq!(
            a.get_u64(&path(&["owmaster", "scan_interval"]), 0),
            b.get_u64(&path(&["owmaster", "scan_interval"]), 0)
        );
    }
}
