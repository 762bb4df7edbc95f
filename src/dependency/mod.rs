//! Dependency policies and their evaluation against a [`Model`].
//!
//! A policy partitions the defined classes into named subjects. Each subject
//! lists the subjects it may use (or must not use); everything else is decided
//! by the policy default. Classes under an external pattern may be used by
//! every subject.

pub mod cycles;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::location::LocationMatcher;
use crate::model::{ClassId, Model};

pub use cycles::{Cycle, CycleHop, CycleMode, package_cycles};

/// What happens to a dependency no rule mentions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DefaultAccess {
    #[default]
    Deny,
    Allow,
}

#[derive(Clone, Debug)]
pub struct Subject {
    name: String,
    matcher: LocationMatcher,
    allow_all: bool,
    may_use: BTreeSet<usize>,
    must_not_use: BTreeSet<usize>,
}

impl Subject {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &LocationMatcher {
        &self.matcher
    }

    pub fn allows_all(&self) -> bool {
        self.allow_all
    }
}

/// Compiled policy; build one with [`PolicyBuilder`].
#[derive(Clone, Debug)]
pub struct Policy {
    default: DefaultAccess,
    subjects: Vec<Subject>,
    externals: Vec<LocationMatcher>,
    cycle_mode: CycleMode,
    cycle_exclusions: Vec<LocationMatcher>,
}

#[derive(Clone, Debug)]
enum Relation {
    MayUse,
    MustNotUse,
}

/// Explicit policy declaration. Errors surface from [`PolicyBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct PolicyBuilder {
    default: DefaultAccess,
    subjects: Vec<(String, String, bool)>,
    relations: Vec<(String, String, Relation)>,
    externals: Vec<String>,
    cycle_mode: CycleMode,
    cycle_exclusions: Vec<String>,
}

impl PolicyBuilder {
    /// Closed policy: undeclared dependencies are violations.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Open policy: only `must_not_use` relations are enforced.
    pub fn allow_all() -> Self {
        Self {
            default: DefaultAccess::Allow,
            ..Self::default()
        }
    }

    pub fn subject(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.subjects.push((name.into(), pattern.into(), false));
        self
    }

    /// Subject whose classes may use anything.
    pub fn allow_all_subject(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.subjects.push((name.into(), pattern.into(), true));
        self
    }

    pub fn may_use(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.relations.push((from.into(), to.into(), Relation::MayUse));
        self
    }

    pub fn must_not_use(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.relations
            .push((from.into(), to.into(), Relation::MustNotUse));
        self
    }

    /// Namespace every subject may depend on, e.g. `java*`.
    pub fn external(mut self, pattern: impl Into<String>) -> Self {
        self.externals.push(pattern.into());
        self
    }

    pub fn cycles(mut self, mode: CycleMode) -> Self {
        self.cycle_mode = mode;
        self
    }

    /// Leave packages matching `pattern` out of cycle detection.
    pub fn exclude_from_cycles(mut self, pattern: impl Into<String>) -> Self {
        self.cycle_exclusions.push(pattern.into());
        self
    }

    pub fn build(self) -> Result<Policy> {
        let mut index: BTreeMap<&str, usize> = BTreeMap::new();
        let mut subjects = Vec::with_capacity(self.subjects.len());
        for (name, pattern, allow_all) in &self.subjects {
            if index.insert(name.as_str(), subjects.len()).is_some() {
                return Err(Error::DuplicateSubject(name.clone()));
            }
            subjects.push(Subject {
                name: name.clone(),
                matcher: LocationMatcher::new(pattern)?,
                allow_all: *allow_all,
                may_use: BTreeSet::new(),
                must_not_use: BTreeSet::new(),
            });
        }

        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| Error::UnknownSubject(name.to_string()))
        };
        for (from, to, relation) in &self.relations {
            let from = lookup(from)?;
            let to = lookup(to)?;
            match relation {
                Relation::MayUse => subjects[from].may_use.insert(to),
                Relation::MustNotUse => subjects[from].must_not_use.insert(to),
            };
        }

        Ok(Policy {
            default: self.default,
            subjects,
            externals: compile(&self.externals)?,
            cycle_mode: self.cycle_mode,
            cycle_exclusions: compile(&self.cycle_exclusions)?,
        })
    }
}

fn compile(patterns: &[String]) -> Result<Vec<LocationMatcher>> {
    patterns
        .iter()
        .map(|pattern| LocationMatcher::new(pattern))
        .collect()
}

/// Where a class lands under a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    Subject(usize),
    External,
    Undeclared,
}

/// Why an edge was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// No rule allows the dependency.
    NotAllowed,
    /// A `must_not_use` rule forbids it.
    Forbidden,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub subject: String,
    /// Subject of the target class, `None` when it is undeclared.
    pub target_subject: Option<String>,
    pub from_class: String,
    pub to_class: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target_subject.as_deref().unwrap_or("<undeclared>");
        let verb = match self.kind {
            ViolationKind::NotAllowed => "is not allowed to use",
            ViolationKind::Forbidden => "must not use",
        };
        write!(
            f,
            "{} {verb} {target} ({} -> {})",
            self.subject, self.from_class, self.to_class
        )
    }
}

/// A `may_use` relation no edge exercised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnusedRule {
    pub subject: String,
    pub target_subject: String,
}

impl fmt::Display for UnusedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} may use {}, but no class does",
            self.subject, self.target_subject
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct DependencyResult {
    pub violations: Vec<Violation>,
    pub unused_rules: Vec<UnusedRule>,
    pub cycles: Vec<Cycle>,
    /// Subjects whose pattern matches no defined class.
    pub empty_subjects: Vec<String>,
}

impl DependencyResult {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.unused_rules.is_empty() && self.cycles.is_empty()
    }
}

impl Policy {
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn default_access(&self) -> DefaultAccess {
        self.default
    }

    pub fn cycle_mode(&self) -> CycleMode {
        self.cycle_mode
    }

    pub fn set_cycle_mode(&mut self, mode: CycleMode) {
        self.cycle_mode = mode;
    }

    pub fn cycle_exclusions(&self) -> &[LocationMatcher] {
        &self.cycle_exclusions
    }

    fn is_external(&self, name: &str) -> bool {
        self.externals
            .iter()
            .any(|matcher| matcher.matches_class_name(name))
    }

    fn resolve(&self, name: &str, defined: bool) -> Result<Resolution> {
        let matching: Vec<usize> = self
            .subjects
            .iter()
            .enumerate()
            .filter(|(_, subject)| subject.matcher.matches_class_name(name))
            .map(|(index, _)| index)
            .collect();
        match matching.as_slice() {
            [index] => Ok(Resolution::Subject(*index)),
            [] if self.is_external(name) => Ok(Resolution::External),
            [] if defined => Err(Error::UnmatchedSubject {
                class: name.to_string(),
            }),
            [] => Ok(Resolution::Undeclared),
            many => Err(Error::AmbiguousSubject {
                class: name.to_string(),
                subjects: many
                    .iter()
                    .map(|index| self.subjects[*index].name.clone())
                    .collect(),
            }),
        }
    }

    /// Check every class edge of `model`.
    ///
    /// Fails only when a defined class matches no subject or several; all
    /// findings are collected into the result.
    pub fn evaluate(&self, model: &Model) -> Result<DependencyResult> {
        let mut resolved: BTreeMap<ClassId, Resolution> = BTreeMap::new();
        let mut populated = vec![false; self.subjects.len()];
        // Without subjects there is nothing to partition; only cycles apply.
        let classes = model
            .defined_classes()
            .filter(|_| !self.subjects.is_empty());
        for (id, class) in classes {
            if class.is_package_info() {
                continue;
            }
            let resolution = self.resolve(class.name(), true)?;
            if let Resolution::Subject(index) = resolution {
                populated[index] = true;
            }
            resolved.insert(id, resolution);
        }

        let mut used: BTreeSet<(usize, usize)> = BTreeSet::new();
        let mut violations = Vec::new();
        let mut subject_graph = cycles::NodeGraph::default();
        for (source_id, source) in &resolved {
            let Resolution::Subject(source) = *source else {
                continue;
            };
            let from_class = model.class(*source_id);
            for target_id in from_class.uses() {
                let target_class = model.class(*target_id);
                let target = match resolved.get(target_id) {
                    Some(resolution) => *resolution,
                    None if target_class.is_package_info() => continue,
                    None => self.resolve(target_class.name(), false)?,
                };
                if let Resolution::Subject(target) = target {
                    subject_graph.add_edge(
                        &self.subjects[source].name,
                        &self.subjects[target].name,
                        from_class.name(),
                        target_class.name(),
                    );
                }
                if let Some(kind) = self.check(source, target, &mut used) {
                    violations.push(Violation {
                        subject: self.subjects[source].name.clone(),
                        target_subject: match target {
                            Resolution::Subject(index) => Some(self.subjects[index].name.clone()),
                            _ => None,
                        },
                        from_class: from_class.name().to_string(),
                        to_class: target_class.name().to_string(),
                        kind,
                    });
                }
            }
        }
        violations.sort_by(|a, b| {
            (&a.from_class, &a.to_class).cmp(&(&b.from_class, &b.to_class))
        });

        let mut unused_rules = Vec::new();
        for (index, subject) in self.subjects.iter().enumerate() {
            for target in &subject.may_use {
                if !used.contains(&(index, *target)) {
                    unused_rules.push(UnusedRule {
                        subject: subject.name.clone(),
                        target_subject: self.subjects[*target].name.clone(),
                    });
                }
            }
        }

        let cycles = match self.cycle_mode {
            CycleMode::Packages => package_cycles(model, &self.cycle_exclusions),
            CycleMode::Subjects => subject_graph.cycles(),
            CycleMode::Off => Vec::new(),
        };

        let empty_subjects = self
            .subjects
            .iter()
            .zip(&populated)
            .filter(|(_, populated)| !**populated)
            .map(|(subject, _)| subject.name.clone())
            .collect();

        debug!(
            classes = resolved.len(),
            violations = violations.len(),
            unused_rules = unused_rules.len(),
            cycles = cycles.len(),
            "evaluated dependency policy"
        );
        Ok(DependencyResult {
            violations,
            unused_rules,
            cycles,
            empty_subjects,
        })
    }

    /// Decide one edge, recording satisfied `may_use` relations.
    fn check(
        &self,
        source: usize,
        target: Resolution,
        used: &mut BTreeSet<(usize, usize)>,
    ) -> Option<ViolationKind> {
        let subject = &self.subjects[source];
        let open = subject.allow_all || self.default == DefaultAccess::Allow;
        match target {
            Resolution::Subject(target) if target == source => {
                if subject.may_use.contains(&target) {
                    used.insert((source, target));
                }
                None
            }
            Resolution::Subject(target) if subject.must_not_use.contains(&target) => {
                Some(ViolationKind::Forbidden)
            }
            Resolution::Subject(target) if subject.may_use.contains(&target) => {
                used.insert((source, target));
                None
            }
            Resolution::External => None,
            _ if open => None,
            _ => Some(ViolationKind::NotAllowed),
        }
    }
}
