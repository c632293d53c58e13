// Command handler for: Verify

use std::path::PathBuf;

use miette::IntoDiagnostic;
use tracing::info;

use unwind_engine::registry::InvocationRegistry;
use unwind_engine::result::SessionReport;
use unwind_engine::session::ProgramTree;
use unwind_engine::visualization::render_dot;

use super::helpers::{
    load_target, parse_output_format, unwind_options, write_json_artifact, write_text_artifact,
    OutputFormat,
};
use crate::cli::{TargetArgs, UnwindArgs};

pub(crate) fn run_verify_command(
    target: TargetArgs,
    unwind: UnwindArgs,
    format: String,
    dot: Option<PathBuf>,
    report_out: Option<PathBuf>,
) -> miette::Result<()> {
    let output_format = parse_output_format(&format)?;
    let options = unwind_options(&unwind)?;
    let loaded = load_target(&target)?;
    let registry = InvocationRegistry::new();

    let mut tree = ProgramTree::new(
        &loaded.program,
        &loaded.function,
        &loaded.policy,
        &registry,
        options,
    )
    .map_err(|e| miette::miette!("{e}"))?;
    tree.unwind().map_err(|e| miette::miette!("{e}"))?;
    let report = tree.report();
    info!(
        function = %report.function,
        result = report.verdict.verdict_class(),
        "verification finished"
    );

    if let Some(path) = &dot {
        let cfg = loaded
            .program
            .find(&loaded.function)
            .ok_or_else(|| miette::miette!("function {} vanished", loaded.function))?;
        write_text_artifact(path, &render_dot(tree.graph(), tree.cover(), cfg))?;
        if output_format == OutputFormat::Text {
            println!("Unwinding tree written to {}", path.display());
        }
    }
    if let Some(path) = &report_out {
        write_json_artifact(path, &report)?;
        if output_format == OutputFormat::Text {
            println!("Session report written to {}", path.display());
        }
    }

    print_report(&report, output_format)
}

fn print_report(report: &SessionReport, format: OutputFormat) -> miette::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).into_diagnostic()?)
        }
    }
    Ok(())
}
