use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::checks::{Check, CheckMetadata, result_message, subject_location};
use crate::engine::AnalysisContext;

/// Reports subjects whose pattern matches no defined class, usually a typo.
#[derive(Default)]
pub(crate) struct EmptySubjectCheck;

crate::register_check!(EmptySubjectCheck);

impl Check for EmptySubjectCheck {
    fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            id: "EMPTY_SUBJECT",
            name: "Empty subject",
            description: "A policy subject matches none of the analyzed classes",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        Ok(context
            .evaluation()
            .empty_subjects
            .iter()
            .map(|subject| {
                SarifResult::builder()
                    .message(result_message(format!(
                        "Subject {subject} matches no analyzed class; check its pattern."
                    )))
                    .locations(vec![subject_location(subject)])
                    .build()
            })
            .collect())
    }
}
