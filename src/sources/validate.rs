// src/sources/validate.rs
//! Field checks for source configurations. Collects every failure rather than
//! stopping at the first one.

use crate::config::ConfigError;

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ConfigError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, message: impl Into<String>) -> Self {
        self.errors.push(ConfigError::new(field, message));
        self
    }

    pub fn required(self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            return self.push(field, "is required");
        }
        self
    }

    /// Absolute http(s) URL. Empty passes; pair with [`Validator::required`].
    pub fn url(self, field: &str, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        match reqwest::Url::parse(value) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => self,
            _ => self.push(field, format!("'{value}' is not a valid http(s) URL")),
        }
    }

    pub fn one_of(self, field: &str, value: &str, allowed: &[&str]) -> Self {
        if value.is_empty() || allowed.contains(&value) {
            return self;
        }
        self.push(field, format!("must be one of {}", allowed.join(", ")))
    }

    pub fn contains(self, field: &str, value: &str, needle: &str) -> Self {
        if value.is_empty() || value.contains(needle) {
            return self;
        }
        self.push(field, format!("must contain '{needle}'"))
    }

    pub fn finish(self) -> Vec<ConfigError> {
        self.errors
    }
}

/// Turn the first validation failure into the `initialize` error.
pub fn first_error(errors: Vec<ConfigError>) -> Result<(), ConfigError> {
    match errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
