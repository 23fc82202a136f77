//! Chart values accumulator
//!
//! State functions record dotted key paths (`configData.http.addr`) with scalar
//! values. [`ValuesBuilder::build`] expands them into the nested document that
//! is handed to the installer.
//!
//! Path rules:
//! - a later write to the same path replaces the earlier one
//! - writes to unrelated paths commute
//! - `\.` is a literal dot inside a single segment
//! - the reserved `rollme` key collects restart causes instead of overwriting
//! - a path that descends through a scalar, or a scalar written over a
//!   subtree, is a [`ValuesError::PathConflict`]

mod registry;

pub use registry::{
    AzureSecrets, CONFIG_LABEL_KEY, CONFIG_LABEL_VALUE, EXTERNAL_ACCESS_SECRET, FULLNAME_OVERRIDE,
    GcsSecrets, HTTP_SECRET_ENV, INTERNAL_ACCESS_SECRET, S3Secrets, SERVICE_PORT,
};

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// Key whose value changes force a rollout of the registry deployment
pub const ROLLME_KEY: &str = "rollme";

/// Separator between restart causes in the `rollme` value
pub const ROLLME_SEPARATOR: &str = ",";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValuesError {
    #[error("invalid value path '{0}'")]
    InvalidPath(String),

    #[error("value path '{path}' conflicts with existing value at '{at}'")]
    PathConflict { path: String, at: String },
}

/// Builder for the chart values document. One per reconcile pass.
#[derive(Clone, Debug, Default)]
pub struct ValuesBuilder {
    entries: BTreeMap<String, Value>,
    rollme: Vec<String>,
}

impl ValuesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` at the dotted `path`
    pub fn with(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if path == ROLLME_KEY {
            let cause = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return self.with_rollme(cause);
        }
        self.entries.insert(path.to_string(), value);
        self
    }

    /// Append a restart cause to the `rollme` key
    pub fn with_rollme(&mut self, cause: impl Into<String>) -> &mut Self {
        self.rollme.push(cause.into());
        self
    }

    /// Value recorded at exactly `path`, before expansion
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Current `rollme` value, if any cause was recorded
    pub fn rollme(&self) -> Option<String> {
        if self.rollme.is_empty() {
            None
        } else {
            Some(self.rollme.join(ROLLME_SEPARATOR))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.rollme.is_empty()
    }

    /// Expand all recorded paths into one nested document
    pub fn build(&self) -> Result<Value, ValuesError> {
        let mut root = Map::new();

        for (path, value) in &self.entries {
            let segments = split_path(path)?;
            insert_path(&mut root, path, &segments, value.clone())?;
        }

        if let Some(rollme) = self.rollme() {
            insert_path(
                &mut root,
                ROLLME_KEY,
                &[ROLLME_KEY.to_string()],
                Value::String(rollme),
            )?;
        }

        Ok(Value::Object(root))
    }
}

/// Split a dotted path, honouring `\.` as an escaped dot
pub fn split_path(path: &str) -> Result<Vec<String>, ValuesError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => {
                if current.is_empty() {
                    return Err(ValuesError::InvalidPath(path.to_string()));
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if current.is_empty() {
        return Err(ValuesError::InvalidPath(path.to_string()));
    }
    segments.push(current);
    Ok(segments)
}

fn insert_path(
    root: &mut Map<String, Value>,
    path: &str,
    segments: &[String],
    value: Value,
) -> Result<(), ValuesError> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(ValuesError::InvalidPath(path.to_string()));
    };

    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(ValuesError::PathConflict {
                    path: path.to_string(),
                    at: parents.iter().take(depth + 1).cloned().collect::<Vec<_>>().join("."),
                });
            }
        };
    }

    if let Some(Value::Object(_)) = current.get(last) {
        return Err(ValuesError::PathConflict {
            path: path.to_string(),
            at: path.to_string(),
        });
    }
    current.insert(last.clone(), value);
    Ok(())
}
