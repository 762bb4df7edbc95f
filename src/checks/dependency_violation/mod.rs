use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::Result as SarifResult;

use crate::checks::{Check, CheckMetadata, class_location, result_message};
use crate::dependency::ViolationKind;
use crate::engine::AnalysisContext;

/// Reports class edges the policy does not allow.
#[derive(Default)]
pub(crate) struct DependencyViolationCheck;

crate::register_check!(DependencyViolationCheck);

impl Check for DependencyViolationCheck {
    fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            id: "DEPENDENCY_VIOLATION",
            name: "Dependency violation",
            description: "A class depends on a class its subject is not allowed to use",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let violations = &context.evaluation().violations;
        let attributes = [KeyValue::new(
            "classgate.violation_count",
            violations.len() as i64,
        )];
        let results: Vec<SarifResult> = context.with_span("report.violations", &attributes, || {
            violations
                .iter()
                .map(|violation| {
                    let advice = match violation.kind {
                        ViolationKind::NotAllowed => "declare the dependency or remove the reference",
                        ViolationKind::Forbidden => "remove the reference",
                    };
                    SarifResult::builder()
                        .message(result_message(format!("{violation}; {advice}.")))
                        .locations(vec![
                            class_location(&violation.from_class),
                            class_location(&violation.to_class),
                        ])
                        .build()
                })
                .collect()
        });
        Ok(results)
    }
}
