//! Hierarchical node paths for the coordination store
//!
//! Paths are absolute and slash-separated (`/instance/tenants/acme`). The
//! root is `/`. Segments may not be empty, `.` or `..`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// An absolute, normalized path to a node in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// The root node (`/`)
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and validate an absolute path
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(invalid(s, "path must be absolute"));
        }
        if s == "/" {
            return Ok(Self::root());
        }
        let trimmed = s.strip_suffix('/').unwrap_or(s);
        for segment in trimmed[1..].split('/') {
            validate_segment(s, segment)?;
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Append a relative path (`a/b/c`) to this path.
    ///
    /// Backslashes are treated as separators so relative paths produced on
    /// any platform map onto the same node.
    pub fn join(&self, relative: &str) -> Result<Self> {
        let normalized = relative.replace('\\', "/");
        let mut joined = self.0.clone();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            validate_segment(relative, segment)?;
            if !joined.ends_with('/') {
                joined.push('/');
            }
            joined.push_str(segment);
        }
        Ok(Self(joined))
    }

    /// Parent path, or `None` for the root
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last path segment, or `None` for the root
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Whether `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &NodePath) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0
            .strip_prefix(other.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Iterate over this path and all its ancestors, root excluded, shallowest first.
    pub fn ancestors_inclusive(&self) -> Vec<NodePath> {
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(path) = current {
            if path.is_root() {
                break;
            }
            current = path.parent();
            out.push(path);
        }
        out.reverse();
        out
    }
}

fn validate_segment(path: &str, segment: &str) -> Result<()> {
    match segment {
        "" => Err(invalid(path, "empty path segment")),
        "." | ".." => Err(invalid(path, "relative segments are not allowed")),
        _ => Ok(()),
    }
}

fn invalid(path: &str, reason: &str) -> Error {
    Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}
