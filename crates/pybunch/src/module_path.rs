//! Hierarchical module identities
//!
//! A [`ModulePath`] is the ordered sequence of name segments that locates a
//! module inside the bundle's namespace, e.g. `["pkg", "sub", "leaf"]` for
//! `pkg.sub.leaf`. Packages are stored under their reserved initializer
//! segment (`pkg.__init__`), so a package and its initializer share a dotted
//! name but never a table key.

use std::fmt;

use crate::error::{BundleError, Result};

/// Reserved last segment of a package initializer module
pub const INIT_SEGMENT: &str = "__init__";

/// Reserved last segment of a package's executable entry module
pub const MAIN_SEGMENT: &str = "__main__";

/// Separator used by the joined dotted form
pub const SEPARATOR: char = '.';

/// Immutable dotted module identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath {
    parts: Vec<String>,
}

impl ModulePath {
    /// The empty path, i.e. the root of the bundle namespace
    pub const fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Split a dotted name into a path. Empty segments are dropped, so both
    /// `""` and `"."` produce the root.
    pub fn from_name(name: &str) -> Self {
        Self {
            parts: name
                .split(SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Build a path from already-split segments
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts
                .into_iter()
                .map(Into::into)
                .filter(|segment: &String| !segment.is_empty())
                .collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// First segment, the top-level package name
    pub fn first(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    /// Last segment
    pub fn name(&self) -> Result<&str> {
        self.parts
            .last()
            .map(String::as_str)
            .ok_or(BundleError::EmptyPath)
    }

    /// Drop the last segment
    pub fn parent(&self) -> Result<Self> {
        match self.parts.split_last() {
            Some((_, rest)) => Ok(Self {
                parts: rest.to_vec(),
            }),
            None => Err(BundleError::EmptyPath),
        }
    }

    /// Drop `levels` trailing segments, or `None` if that underflows
    pub fn strip_levels(&self, levels: usize) -> Option<Self> {
        let keep = self.parts.len().checked_sub(levels)?;
        Some(Self {
            parts: self.parts[..keep].to_vec(),
        })
    }

    /// Concatenate two paths
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut parts = Vec::with_capacity(self.parts.len() + other.parts.len());
        parts.extend_from_slice(&self.parts);
        parts.extend_from_slice(&other.parts);
        Self { parts }
    }

    /// Append a single segment
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(segment.to_owned());
        Self { parts }
    }

    /// Path of this package's initializer module
    #[must_use]
    pub fn initializer(&self) -> Self {
        self.child(INIT_SEGMENT)
    }

    /// Prefix test: true when `self` equals `other` or is one of its ancestors
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.parts.starts_with(&self.parts)
    }

    /// True when `ancestor` is a prefix of `self`
    pub fn is_relative_to(&self, ancestor: &Self) -> bool {
        ancestor.is_ancestor_of(self)
    }

    /// Strip `ancestor` from the front of `self`
    pub fn relative_to(&self, ancestor: &Self) -> Result<Self> {
        if !self.is_relative_to(ancestor) {
            return Err(BundleError::NotAncestor {
                path: self.clone(),
                ancestor: ancestor.clone(),
            });
        }
        Ok(Self {
            parts: self.parts[ancestor.parts.len()..].to_vec(),
        })
    }

    /// Whether this path names a package initializer
    pub fn is_initializer(&self) -> bool {
        self.parts.last().is_some_and(|last| last == INIT_SEGMENT)
    }

    /// `self`, then every proper ancestor down to (but excluding) the root
    pub fn lineage(&self) -> impl Iterator<Item = Self> + '_ {
        (1..=self.parts.len()).rev().map(|len| Self {
            parts: self.parts[..len].to_vec(),
        })
    }

    /// Dotted form
    pub fn dotted(&self) -> String {
        self.parts.join(".")
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl From<&str> for ModulePath {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}
