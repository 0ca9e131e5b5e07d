//! Version strings as published by bundles, feeds and stores.
//!
//! Versions compare by their numeric components (`1.2` == `1.2.0`); when the
//! components are equal, a numeric build suffix in parentheses breaks ties
//! (`2.1 (340)` < `2.1 (352)`). A version without a build sorts below the
//! same version with one (`2.1` < `2.1 (340)`).

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Version is empty")]
    Empty,

    #[error("Version has no numeric components: {0}")]
    NoComponents(String),
}

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("valid component regex"))
}

fn build_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\((\d+)\)\s*$").expect("valid build regex"))
}

/// A parsed, comparable version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    components: Vec<u64>,
    build: Option<u64>,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }

        let build_match = build_pattern().captures(raw);
        let build = build_match
            .as_ref()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok());
        let short = match &build_match {
            Some(caps) => &raw[..caps.get(0).map(|m| m.start()).unwrap_or(raw.len())],
            None => raw,
        };

        let components: Vec<u64> = component_pattern()
            .find_iter(short)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();

        if components.is_empty() {
            return Err(VersionError::NoComponents(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
            build,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.raw
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        // A missing build sorts first
        self.build.cmp(&other.build)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
