//! Wildcard patterns over `(package, class, method)` locations.
//!
//! Pattern forms:
//!
//! - `pa`, `pa*`, `*pa`: package only
//! - `Cl`, `/cl`: class only (uppercase first letter, or forced by `/`)
//! - `pa.Cl`: package and class, split at the last `.`
//! - `#me`, `Cl#me`, `pa.Cl#me`: with a method
//! - `*`: everything
//!
//! A pattern holds at most one `*`, at the start or end of a segment.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::{UNNAMED_PACKAGE, package_of};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Any,
    Exact(String),
    Prefix(String),
    Suffix(String),
}

impl Segment {
    fn parse(pattern: &str, text: &str) -> Result<Self> {
        if text == "*" {
            return Ok(Segment::Any);
        }
        let segment = if let Some(suffix) = text.strip_prefix('*') {
            Segment::Suffix(suffix.to_string())
        } else if let Some(prefix) = text.strip_suffix('*') {
            Segment::Prefix(prefix.to_string())
        } else {
            Segment::Exact(text.to_string())
        };
        let literal = match &segment {
            Segment::Exact(value) | Segment::Prefix(value) | Segment::Suffix(value) => value,
            Segment::Any => "",
        };
        if literal.contains('*') {
            return Err(invalid(pattern, "wildcard must be at the start or end of a segment"));
        }
        Ok(segment)
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Exact(expected) => value == expected,
            Segment::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Segment::Suffix(suffix) => value.ends_with(suffix.as_str()),
        }
    }

    /// Match a class name, falling back to the outer class of a nested name.
    fn matches_class(&self, class: &str) -> bool {
        if self.matches(class) {
            return true;
        }
        match class.split_once('$') {
            Some((outer, _)) => self.matches(outer),
            None => false,
        }
    }
}

/// Compiled location pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationMatcher {
    pattern: String,
    package: Option<Segment>,
    class: Option<Segment>,
    method: Option<Segment>,
}

impl LocationMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(invalid(pattern, "pattern must not be empty"));
        }
        if pattern.matches('*').count() > 1 {
            return Err(invalid(pattern, "at most one wildcard is allowed"));
        }

        let (location, method) = match pattern.split_once('#') {
            Some((location, method)) => (location, Some(Segment::parse(pattern, method)?)),
            None => (pattern, None),
        };

        let (package, class) = if let Some(class) = location.strip_prefix('/') {
            (None, Some(class))
        } else if location.is_empty() {
            (None, None)
        } else {
            match location.rsplit_once('.') {
                Some((package, class)) if starts_uppercase(class) => (Some(package), Some(class)),
                _ if starts_uppercase(location) => (None, Some(location)),
                _ => (Some(location), None),
            }
        };

        Ok(Self {
            pattern: pattern.to_string(),
            package: package.map(|text| Segment::parse(pattern, text)).transpose()?,
            class: class.map(|text| Segment::parse(pattern, text)).transpose()?,
            method,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Only package-only patterns match a bare package.
    pub fn matches_package(&self, package: &str) -> bool {
        self.class.is_none()
            && self.method.is_none()
            && self
                .package
                .as_ref()
                .is_some_and(|segment| segment.matches(package))
    }

    /// Match a class name without knowing its package.
    pub fn matches_class(&self, class: &str) -> bool {
        self.method.is_none()
            && self
                .package
                .as_ref()
                .is_none_or(|segment| *segment == Segment::Any)
            && self
                .class
                .as_ref()
                .is_none_or(|segment| segment.matches_class(class))
    }

    pub fn matches_package_class(&self, package: &str, class: &str) -> bool {
        self.method.is_none()
            && self
                .package
                .as_ref()
                .is_none_or(|segment| segment.matches(package))
            && self
                .class
                .as_ref()
                .is_none_or(|segment| segment.matches_class(class))
    }

    /// With a method segment present the class has to match exactly, so
    /// `Cl#me` does not cover methods of `Cl$Inner`.
    pub fn matches(&self, package: &str, class: &str, method: &str) -> bool {
        let class_matches = match (&self.class, &self.method) {
            (None, _) => true,
            (Some(segment), None) => segment.matches_class(class),
            (Some(segment), Some(_)) => segment.matches(class),
        };
        class_matches
            && self
                .package
                .as_ref()
                .is_none_or(|segment| segment.matches(package))
            && self
                .method
                .as_ref()
                .is_none_or(|segment| segment.matches(method))
    }

    /// Match a dotted class name such as `com.a.Outer$Inner`.
    pub fn matches_class_name(&self, name: &str) -> bool {
        let package = match package_of(name) {
            UNNAMED_PACKAGE => "",
            package => package,
        };
        let class = name.rsplit_once('.').map(|(_, class)| class).unwrap_or(name);
        self.matches_package_class(package, class)
    }
}

impl FromStr for LocationMatcher {
    type Err = Error;

    fn from_str(pattern: &str) -> Result<Self> {
        Self::new(pattern)
    }
}

impl fmt::Display for LocationMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn starts_uppercase(text: &str) -> bool {
    text.strip_prefix('*')
        .unwrap_or(text)
        .chars()
        .next()
        .is_some_and(char::is_uppercase)
}

fn invalid(pattern: &str, reason: &'static str) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    }
}
