// Path pattern compilation and matching
//
// A pattern is a `/`-separated list of segments. `:name` segments capture one
// or more of `[A-Za-z0-9_-]`; everything else must match literally. Paths
// match with or without one extra trailing slash on either side.

use crate::params::{self, Params};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(':') {
            Some(name) if !name.is_empty() && name.chars().all(is_param_char) => {
                Segment::Param(name.to_string())
            }
            _ => Segment::Literal(raw.to_string()),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == value,
            Segment::Param(_) => !value.is_empty() && value.chars().all(is_param_char),
        }
    }
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn split_path(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

/// Compiled route pattern such as `/users/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let raw = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{pattern}")
        };
        let segments = split_path(&raw).into_iter().map(Segment::parse).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match the whole path and return the raw captured values.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let mut parts = split_path(path);
        if let Some(found) = self.capture_exact(&self.segments, &parts) {
            return Some(found);
        }

        parts.push("");
        if let Some(found) = self.capture_exact(&self.segments, &parts) {
            return Some(found);
        }
        parts.pop();

        let mut padded = self.segments.clone();
        padded.push(Segment::Literal(String::new()));
        self.capture_exact(&padded, &parts)
    }

    /// Match the pattern against the leading segments of `path`.
    ///
    /// Returns the captures and the unmatched remainder, which is either empty
    /// or starts with `/`.
    pub fn match_prefix(&self, path: &str) -> Option<(Params, String)> {
        let prefix = self.prefix_segments();
        let parts = split_path(path);
        if parts.len() < prefix.len() {
            return None;
        }

        let found = self.capture_exact(prefix, &parts[..prefix.len()])?;
        let rest = &parts[prefix.len()..];
        let remainder = if rest.is_empty() {
            String::new()
        } else {
            format!("/{}", rest.join("/"))
        };
        Some((found, remainder))
    }

    // A trailing slash on a mount pattern does not consume a segment, and
    // `/` mounts at the root.
    fn prefix_segments(&self) -> &[Segment] {
        match self.segments.split_last() {
            Some((Segment::Literal(last), rest)) if last.is_empty() => rest,
            _ => &self.segments,
        }
    }

    fn capture_exact(&self, segments: &[Segment], parts: &[&str]) -> Option<Params> {
        if segments.len() != parts.len() {
            return None;
        }

        let mut found = Vec::new();
        for (segment, part) in segments.iter().zip(parts) {
            if !segment.matches(part) {
                return None;
            }
            if let Segment::Param(name) = segment {
                found.push((name.clone(), part.to_string()));
            }
        }
        Some(params::from_pairs(found))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}
