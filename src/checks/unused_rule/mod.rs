use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::checks::{Check, CheckMetadata, result_message, subject_location};
use crate::engine::AnalysisContext;

/// Reports `may_use` relations no class edge needs.
#[derive(Default)]
pub(crate) struct UnusedRuleCheck;

crate::register_check!(UnusedRuleCheck);

impl Check for UnusedRuleCheck {
    fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            id: "UNUSED_RULE",
            name: "Unused dependency rule",
            description: "A declared may-use relation is not exercised by any class",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        Ok(context
            .evaluation()
            .unused_rules
            .iter()
            .map(|rule| {
                SarifResult::builder()
                    .message(result_message(format!("{rule}; drop the rule.")))
                    .locations(vec![subject_location(&rule.subject)])
                    .build()
            })
            .collect())
    }
}
