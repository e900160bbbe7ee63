// src/uid.rs
//! Typed resource identifiers: `<kind>:<segment>[:<segment>...]`.
//!
//! Segments are escaped before joining so the serialized form is a single URL
//! path segment and parses back to the same identifier. Only `%`, `:` and `/`
//! are rewritten (`%25`, `%3A`, `%2F`); everything else is kept verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SEPARATOR: char = ':';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UidError {
    #[error("invalid typed UID '{0}': expected '<kind>:<id>[:<id>...]'")]
    Format(String),
    #[error("invalid typed UID kind '{0}': kind must be non-empty and contain no ':' or '/'")]
    Kind(String),
    #[error("invalid escape sequence in typed UID segment '{0}'")]
    Escape(String),
}

/// Structured identifier combining a provider/kind tag with ordered segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypedUid {
    kind: String,
    identifiers: Vec<String>,
}

impl TypedUid {
    /// Build a UID from a provider kind and its semantic key.
    ///
    /// Kinds are provider type constants in this crate and there is at least one
    /// segment; use [`TypedUid::try_new`] when either comes from untrusted input.
    pub fn new<I, S>(kind: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = kind.into();
        let identifiers: Vec<String> = identifiers.into_iter().map(Into::into).collect();
        debug_assert!(valid_kind(&kind), "invalid typed UID kind: {kind}");
        debug_assert!(!identifiers.is_empty(), "typed UID '{kind}' needs at least one segment");
        Self { kind, identifiers }
    }

    pub fn try_new<I, S>(kind: impl Into<String>, identifiers: I) -> Result<Self, UidError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = kind.into();
        if !valid_kind(&kind) {
            return Err(UidError::Kind(kind));
        }
        let identifiers: Vec<String> = identifiers.into_iter().map(Into::into).collect();
        if identifiers.is_empty() {
            return Err(UidError::Format(kind));
        }
        Ok(Self { kind, identifiers })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// First identifier segment, if any.
    pub fn primary(&self) -> Option<&str> {
        self.identifiers.first().map(String::as_str)
    }
}

fn valid_kind(kind: &str) -> bool {
    !kind.is_empty() && !kind.contains(SEPARATOR) && !kind.contains('/')
}

fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_segment(escaped: &str) -> Result<String, UidError> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest
            .get(pos + 1..pos + 3)
            .ok_or_else(|| UidError::Escape(escaped.to_string()))?;
        let decoded = match code.to_ascii_uppercase().as_str() {
            "25" => '%',
            "3A" => ':',
            "2F" => '/',
            _ => return Err(UidError::Escape(escaped.to_string())),
        };
        out.push(decoded);
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

impl fmt::Display for TypedUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        for id in &self.identifiers {
            write!(f, "{SEPARATOR}{}", escape_segment(id))?;
        }
        Ok(())
    }
}

impl FromStr for TypedUid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(SEPARATOR);
        let kind = parts.next().unwrap_or_default();
        let identifiers = parts
            .map(unescape_segment)
            .collect::<Result<Vec<_>, _>>()?;
        if identifiers.is_empty() {
            return Err(UidError::Format(s.to_string()));
        }
        Self::try_new(kind, identifiers)
    }
}

impl Serialize for TypedUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypedUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
