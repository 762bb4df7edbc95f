use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Run, SCHEMA_URL, Sarif, Tool,
    ToolComponent,
};
use tracing::info;

use classgate::dependency::{CycleMode, Policy, PolicyBuilder};
use classgate::engine::{Engine, build_context};
use classgate::policy_file::load_policy;
use classgate::scan::scan_inputs;
use classgate::telemetry::{Telemetry, current_trace_id, init_logging, with_span};

/// CLI arguments for classgate execution.
#[derive(Parser, Debug)]
#[command(
    name = "classgate",
    about = "Architecture dependency rules and cycle detection for JVM class files and archives, reported as SARIF.",
    version
)]
struct Cli {
    /// Class file, directory or jar/zip/war/ear archive to analyze.
    #[arg(long = "input", value_name = "PATH", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,
    /// JSON policy; without one only dependency cycles are reported.
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Override the policy's cycle detection mode.
    #[arg(long, value_enum)]
    cycles: Option<CycleMode>,
    /// Exit with status 1 when any result is reported.
    #[arg(long)]
    fail_on_findings: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP/HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<ExitCode> {
    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }

    let telemetry = match cli.otel.clone() {
        Some(endpoint) => Some(Arc::new(Telemetry::new(endpoint)?)),
        None => None,
    };
    let report = with_span(
        telemetry.as_deref(),
        "classgate.run",
        &[KeyValue::new("classgate.input_count", cli.inputs.len() as i64)],
        || analyze(&cli, telemetry.clone()),
    );
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    let report = report?;

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &report.sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} evaluation_ms={} classes={} artifacts={}",
            report.stats.total_duration_ms,
            report.stats.scan_duration_ms,
            report.stats.evaluation_duration_ms,
            report.stats.class_count,
            report.stats.artifact_count
        );
    }

    if cli.fail_on_findings && report.result_count > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

/// SARIF log plus the numbers the CLI reports on.
struct Report {
    sarif: Sarif,
    result_count: usize,
    stats: InvocationStats,
}

fn analyze(cli: &Cli, telemetry: Option<Arc<Telemetry>>) -> Result<Report> {
    let started_at = Instant::now();
    let mut policy = load_cli_policy(cli.policy.as_deref())?;
    if let Some(mode) = cli.cycles {
        policy.set_cycle_mode(mode);
    }

    let scan_started_at = Instant::now();
    let scan = with_span(
        telemetry.as_deref(),
        "scan",
        &[KeyValue::new("classgate.phase", "scan")],
        || scan_inputs(&cli.inputs, telemetry.as_deref()),
    )
    .context("failed to read inputs")?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();

    let evaluation_started_at = Instant::now();
    let package_count = scan.model.package_count();
    let context = build_context(&scan.model, &policy, scan.failures, telemetry)
        .context("failed to evaluate dependency policy")?;
    let output = Engine::new().analyze(&context)?;
    let evaluation_duration_ms = evaluation_started_at.elapsed().as_millis();

    let stats = InvocationStats {
        total_duration_ms: started_at.elapsed().as_millis(),
        scan_duration_ms,
        evaluation_duration_ms,
        class_count: scan.class_count,
        package_count,
        artifact_count: scan.artifacts.len(),
        subject_count: policy.subjects().len(),
        trace_id: current_trace_id(),
    };
    let result_count = output.results.len();
    info!(
        classes = stats.class_count,
        results = result_count,
        "analysis finished"
    );
    let invocation = build_invocation(&stats);
    let sarif = build_sarif(scan.artifacts, invocation, output.rules, output.results);
    Ok(Report {
        sarif,
        result_count,
        stats,
    })
}

fn load_cli_policy(path: Option<&Path>) -> Result<Policy> {
    match path {
        Some(path) => {
            load_policy(path).with_context(|| format!("failed to load policy {}", path.display()))
        }
        None => Ok(PolicyBuilder::allow_all().build()?),
    }
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    total_duration_ms: u128,
    scan_duration_ms: u128,
    evaluation_duration_ms: u128,
    class_count: usize,
    package_count: usize,
    artifact_count: usize,
    subject_count: usize,
    trace_id: Option<String>,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "classgate.scan_ms".to_string(),
        json!(stats.scan_duration_ms),
    );
    properties.insert(
        "classgate.evaluation_ms".to_string(),
        json!(stats.evaluation_duration_ms),
    );
    properties.insert("classgate.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "classgate.package_count".to_string(),
        json!(stats.package_count),
    );
    properties.insert(
        "classgate.artifact_count".to_string(),
        json!(stats.artifact_count),
    );
    properties.insert(
        "classgate.subject_count".to_string(),
        json!(stats.subject_count),
    );
    if let Some(trace_id) = &stats.trace_id {
        properties.insert("classgate.trace_id".to_string(), json!(trace_id));
    }

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<serde_sarif::sarif::Result>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("classgate")
            .build()
    } else {
        ToolComponent::builder()
            .name("classgate")
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
