use anyhow::Result;
use serde_sarif::sarif::{ArtifactLocation, Location, PhysicalLocation, Result as SarifResult};

use crate::checks::{Check, CheckMetadata, result_message};
use crate::engine::AnalysisContext;

/// Surfaces archive entries and archives that were skipped while scanning.
#[derive(Default)]
pub(crate) struct UnreadableInputCheck;

crate::register_check!(UnreadableInputCheck);

impl Check for UnreadableInputCheck {
    fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            id: "UNREADABLE_INPUT",
            name: "Unreadable input",
            description: "An input could not be read, so its classes were not checked",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        Ok(context
            .failures()
            .iter()
            .map(|failure| {
                let artifact_location = ArtifactLocation::builder()
                    .uri(failure.location.clone())
                    .build();
                let physical = PhysicalLocation::builder()
                    .artifact_location(artifact_location)
                    .build();
                SarifResult::builder()
                    .message(result_message(format!(
                        "Skipped {}: {}",
                        failure.location, failure.message
                    )))
                    .locations(vec![Location::builder().physical_location(physical).build()])
                    .build()
            })
            .collect())
    }
}
