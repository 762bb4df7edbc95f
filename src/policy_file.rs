//! JSON policy declarations.
//!
//! ```json
//! {
//!   "default": "deny",
//!   "base": "com.example",
//!   "externals": ["java*"],
//!   "subjects": {
//!     "api": { "pattern": ".api*", "may_use": ["model"] },
//!     "model": {}
//!   },
//!   "cycles": { "mode": "packages", "exclude": ["com.example.generated*"] }
//! }
//! ```
//!
//! Subject patterns starting with `.` are relative to `base`; a subject
//! without a pattern matches `base.<name>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::dependency::{CycleMode, Policy, PolicyBuilder};
use crate::error::{Error, Result};

const POLICY_SCHEMA: &str = include_str!("policy.schema.json");

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DefaultDecision {
    #[default]
    Deny,
    Allow,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    default: DefaultDecision,
    base: Option<String>,
    #[serde(default)]
    externals: Vec<String>,
    #[serde(default)]
    subjects: BTreeMap<String, SubjectEntry>,
    #[serde(default)]
    cycles: CycleSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubjectEntry {
    pattern: Option<String>,
    #[serde(default)]
    allow_all: bool,
    #[serde(default)]
    may_use: Vec<String>,
    #[serde(default)]
    must_not_use: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CycleSection {
    #[serde(default)]
    mode: CycleMode,
    #[serde(default)]
    exclude: Vec<String>,
}

pub fn load_policy(path: &Path) -> Result<Policy> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_policy(&text)
}

pub fn parse_policy(text: &str) -> Result<Policy> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| Error::Policy(format!("invalid JSON: {err}")))?;
    validate(&value)?;
    let file: PolicyFile = serde_path_to_error::deserialize(value)
        .map_err(|err| Error::Policy(err.to_string()))?;
    file.into_policy()
}

fn validate(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(POLICY_SCHEMA)
        .map_err(|err| Error::Policy(format!("embedded schema is not JSON: {err}")))?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|err| Error::Policy(format!("embedded schema is invalid: {err}")))?;
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Policy(errors.join("; ")))
    }
}

impl PolicyFile {
    fn into_policy(self) -> Result<Policy> {
        let mut builder = match self.default {
            DefaultDecision::Deny => PolicyBuilder::deny_all(),
            DefaultDecision::Allow => PolicyBuilder::allow_all(),
        };
        for (name, entry) in &self.subjects {
            let pattern = resolve_pattern(self.base.as_deref(), name, entry.pattern.as_deref())?;
            builder = if entry.allow_all {
                builder.allow_all_subject(name, pattern)
            } else {
                builder.subject(name, pattern)
            };
        }
        for (name, entry) in &self.subjects {
            for target in &entry.may_use {
                builder = builder.may_use(name, target);
            }
            for target in &entry.must_not_use {
                builder = builder.must_not_use(name, target);
            }
        }
        for external in self.externals {
            builder = builder.external(external);
        }
        builder = builder.cycles(self.cycles.mode);
        for pattern in self.cycles.exclude {
            builder = builder.exclude_from_cycles(pattern);
        }
        builder.build()
    }
}

fn resolve_pattern(base: Option<&str>, name: &str, pattern: Option<&str>) -> Result<String> {
    match (base, pattern) {
        (_, Some(pattern)) if !pattern.starts_with('.') => Ok(pattern.to_string()),
        (Some(base), Some(".")) => Ok(base.to_string()),
        (Some(base), Some(relative)) => Ok(format!("{base}{relative}")),
        (Some(base), None) => Ok(format!("{base}.{name}")),
        (None, None) => Ok(name.to_string()),
        (None, Some(relative)) => Err(Error::Policy(format!(
            "subject '{name}' uses relative pattern '{relative}' without a base"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DefaultAccess;

    #[test]
    fn parses_subjects_relations_and_cycles() {
        let policy = parse_policy(
            r#"{
                "base": "com.example",
                "externals": ["java*"],
                "subjects": {
                    "api": { "pattern": ".api*", "may_use": ["model"] },
                    "model": {},
                    "root": { "pattern": ".", "allow_all": true },
                    "tools": { "pattern": "org.tools*", "must_not_use": ["api"] }
                },
                "cycles": { "mode": "subjects", "exclude": ["com.example.gen*"] }
            }"#,
        )
        .expect("policy");

        let patterns: Vec<(&str, &str)> = policy
            .subjects()
            .iter()
            .map(|subject| (subject.name(), subject.matcher().pattern()))
            .collect();
        assert_eq!(
            patterns,
            vec![
                ("api", "com.example.api*"),
                ("model", "com.example.model"),
                ("root", "com.example"),
                ("tools", "org.tools*"),
            ]
        );
        assert!(policy.subjects()[2].allows_all());
        assert_eq!(policy.default_access(), DefaultAccess::Deny);
        assert_eq!(policy.cycle_mode(), CycleMode::Subjects);
        assert_eq!(policy.cycle_exclusions().len(), 1);
    }

    #[test]
    fn open_default_is_read() {
        let policy = parse_policy(r#"{ "default": "allow" }"#).expect("policy");
        assert_eq!(policy.default_access(), DefaultAccess::Allow);
        assert_eq!(policy.cycle_mode(), CycleMode::Packages);
    }

    #[test]
    fn schema_rejects_unknown_keys() {
        let result = parse_policy(r#"{ "subjects": { "api": { "patern": "com.api" } } }"#);
        assert!(matches!(result, Err(Error::Policy(_))));
    }

    #[test]
    fn schema_rejects_unknown_cycle_mode() {
        let result = parse_policy(r#"{ "cycles": { "mode": "classes" } }"#);
        assert!(matches!(result, Err(Error::Policy(_))));
    }

    #[test]
    fn unknown_relation_target_is_reported() {
        let result = parse_policy(r#"{ "subjects": { "api": { "may_use": ["missing"] } } }"#);
        assert!(matches!(result, Err(Error::UnknownSubject(name)) if name == "missing"));
    }

    #[test]
    fn relative_pattern_needs_base() {
        let result = parse_policy(r#"{ "subjects": { "api": { "pattern": ".api" } } }"#);
        assert!(matches!(result, Err(Error::Policy(message)) if message.contains("without a base")));
    }

    #[test]
    fn invalid_json_is_a_policy_error() {
        assert!(matches!(parse_policy("{"), Err(Error::Policy(_))));
    }
}
