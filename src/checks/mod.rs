use anyhow::Result;
use serde_sarif::sarif::{Location, LogicalLocation, Message, Result as SarifResult};

use crate::engine::AnalysisContext;

pub(crate) mod dependency_cycle;
pub(crate) mod dependency_violation;
pub(crate) mod empty_subject;
pub(crate) mod unreadable_input;
pub(crate) mod unused_rule;

/// Metadata describing a check.
#[derive(Clone, Debug)]
pub(crate) struct CheckMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Turns one aspect of an analysis into SARIF results.
pub(crate) trait Check {
    fn metadata(&self) -> CheckMetadata;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

/// Wrapper struct for check factory functions to enable inventory collection.
pub(crate) struct CheckFactory(pub fn() -> Box<dyn Check + Sync>);

inventory::collect!(CheckFactory);

/// Register a check implementation.
///
/// Usage: `register_check!(CheckName);`
#[macro_export]
macro_rules! register_check {
    ($check_type:ty) => {
        inventory::submit! {
            $crate::checks::CheckFactory(|| Box::new(<$check_type>::default()))
        }
    };
}

/// Returns all registered checks as boxed trait objects.
pub(crate) fn all_checks() -> Vec<Box<dyn Check + Sync>> {
    inventory::iter::<CheckFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

pub(crate) fn class_location(class_name: &str) -> Location {
    logical_location(class_name, "type")
}

pub(crate) fn package_location(package_name: &str) -> Location {
    logical_location(package_name, "namespace")
}

/// Location of a policy subject, which has no counterpart in the inputs.
pub(crate) fn subject_location(subject: &str) -> Location {
    logical_location(subject, "module")
}

fn logical_location(name: &str, kind: &str) -> Location {
    let logical = LogicalLocation::builder().name(name).kind(kind).build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
