use anyhow::Result;
use serde_sarif::sarif::{Location, Result as SarifResult};

use crate::checks::{Check, CheckMetadata, package_location, result_message, subject_location};
use crate::dependency::CycleMode;
use crate::engine::AnalysisContext;

/// Reports each strongly connected group of packages or subjects.
#[derive(Default)]
pub(crate) struct DependencyCycleCheck;

crate::register_check!(DependencyCycleCheck);

impl Check for DependencyCycleCheck {
    fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            id: "DEPENDENCY_CYCLE",
            name: "Dependency cycle",
            description: "Packages or subjects depend on each other in a cycle",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let location: fn(&str) -> Location = match context.cycle_mode() {
            CycleMode::Subjects => subject_location,
            CycleMode::Packages | CycleMode::Off => package_location,
        };
        Ok(context
            .evaluation()
            .cycles
            .iter()
            .map(|cycle| {
                let locations: Vec<Location> = cycle
                    .members
                    .iter()
                    .map(|member| location(member))
                    .collect();
                SarifResult::builder()
                    .message(result_message(cycle.to_string()))
                    .locations(locations)
                    .build()
            })
            .collect())
    }
}
