use std::sync::Arc;

use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor, Result as SarifResult};

use crate::checks::{Check, CheckMetadata, all_checks};
use crate::dependency::{CycleMode, DependencyResult, Policy};
use crate::model::Model;
use crate::scan::ScanFailure;
use crate::telemetry::{Telemetry, with_span};

/// Inputs shared by checks.
pub struct AnalysisContext {
    evaluation: DependencyResult,
    cycle_mode: CycleMode,
    failures: Vec<ScanFailure>,
    telemetry: Option<Arc<Telemetry>>,
}

/// Analysis engine that executes registered checks.
pub struct Engine {
    checks: Vec<Box<dyn Check + Sync>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut checks = all_checks();
        checks.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        Self { checks }
    }

    pub fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let mut rules = Vec::new();
        let mut results = Vec::new();

        for check in &self.checks {
            let metadata = check.metadata();
            rules.push(rule_descriptor(&metadata));
            let span_attributes = [KeyValue::new("classgate.check_id", metadata.id)];
            let mut check_results = context.with_span(
                &format!("check:{}", metadata.id),
                &span_attributes,
                || check.run(context),
            )?;
            for result in &mut check_results {
                if result.rule_id.is_none() {
                    result.rule_id = Some(metadata.id.to_string());
                }
            }
            results.extend(check_results);
        }

        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("");
            let right_msg = right.message.text.as_deref().unwrap_or("");
            left_id.cmp(right_id).then(left_msg.cmp(right_msg))
        });

        Ok(EngineOutput { rules, results })
    }
}

/// Aggregated SARIF payload from check execution.
pub struct EngineOutput {
    pub rules: Vec<ReportingDescriptor>,
    pub results: Vec<SarifResult>,
}

/// Evaluate `policy` against `model` and bundle everything checks read.
pub fn build_context(
    model: &Model,
    policy: &Policy,
    failures: Vec<ScanFailure>,
    telemetry: Option<Arc<Telemetry>>,
) -> crate::error::Result<AnalysisContext> {
    let evaluation = with_span(
        telemetry.as_deref(),
        "evaluation",
        &[
            KeyValue::new("classgate.phase", "evaluation"),
            KeyValue::new("classgate.subject_count", policy.subjects().len() as i64),
        ],
        || policy.evaluate(model),
    )?;
    Ok(AnalysisContext {
        evaluation,
        cycle_mode: policy.cycle_mode(),
        failures,
        telemetry,
    })
}

fn rule_descriptor(metadata: &CheckMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

impl AnalysisContext {
    pub fn evaluation(&self) -> &DependencyResult {
        &self.evaluation
    }

    /// Whether cycle members are packages or subjects.
    pub fn cycle_mode(&self) -> CycleMode {
        self.cycle_mode
    }

    pub fn failures(&self) -> &[ScanFailure] {
        &self.failures
    }

    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }
}
