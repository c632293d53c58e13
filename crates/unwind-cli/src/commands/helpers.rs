// Shared helpers: input loading, option parsing, artifact writing.

use std::fs;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;
use serde::Serialize;

use unwind_engine::session::{FastForward, UnwindOptions};
use unwind_ir::cfg::Program;
use unwind_ir::policy::SignaturePolicy;

use crate::cli::{TargetArgs, UnwindArgs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => miette::bail!("Unknown output format: {other}. Use 'text' or 'json'."),
    }
}

pub(crate) fn parse_fast_forward(raw: &str) -> miette::Result<FastForward> {
    match raw {
        "defer" => Ok(FastForward::Defer),
        "discard" => Ok(FastForward::Discard),
        "off" => Ok(FastForward::Off),
        other => miette::bail!(
            "Unknown fast-forward policy: {other}. Use 'defer', 'discard', or 'off'."
        ),
    }
}

pub(crate) fn unwind_options(args: &UnwindArgs) -> miette::Result<UnwindOptions> {
    Ok(UnwindOptions {
        covering: !args.no_covering,
        fast_forward: parse_fast_forward(&args.fast_forward)?,
        timeout_secs: args.timeout,
        max_vertices: args.max_vertices,
        solver_timeout_secs: args.solver_timeout,
    })
}

pub(crate) fn read_program(path: &Path) -> miette::Result<Program> {
    let source = fs::read_to_string(path)
        .map_err(|e| miette::miette!("Cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&source)
        .map_err(|e| miette::miette!("Invalid program {}: {e}", path.display()))
}

/// Policy from `--policy`, extended with every `--error-method`.
pub(crate) fn load_policy(
    policy: Option<&Path>,
    error_methods: &[String],
) -> miette::Result<SignaturePolicy> {
    let mut loaded = match policy {
        Some(path) => {
            let source = fs::read_to_string(path)
                .map_err(|e| miette::miette!("Cannot read {}: {e}", path.display()))?;
            serde_json::from_str::<SignaturePolicy>(&source)
                .map_err(|e| miette::miette!("Invalid policy {}: {e}", path.display()))?
        }
        None => SignaturePolicy::new(),
    };
    for method in error_methods {
        loaded = loaded.error_method(method.clone());
    }
    if loaded.error_methods.is_empty() {
        miette::bail!("No error methods given. Pass --error-method or a --policy file.");
    }
    Ok(loaded)
}

/// The procedure named by `--function`, or the only one in the program.
pub(crate) fn resolve_function(program: &Program, function: Option<&str>) -> miette::Result<String> {
    if let Some(signature) = function {
        return Ok(signature.to_string());
    }
    let signatures: Vec<&str> = program.signatures().collect();
    match signatures.as_slice() {
        [only] => Ok(only.to_string()),
        [] => miette::bail!("The program has no procedures."),
        many => miette::bail!(
            "The program has {} procedures; pick one with --function:\n  {}",
            many.len(),
            many.join("\n  ")
        ),
    }
}

/// Everything a session needs, loaded from the command line.
pub(crate) struct LoadedTarget {
    pub program: Program,
    pub policy: SignaturePolicy,
    pub function: String,
}

pub(crate) fn load_target(target: &TargetArgs) -> miette::Result<LoadedTarget> {
    let program = read_program(&target.file)?;
    let policy = load_policy(target.policy.as_deref(), &target.error_methods)?;
    let function = resolve_function(&program, target.function.as_deref())?;
    Ok(LoadedTarget {
        program,
        policy,
        function,
    })
}

pub(crate) fn write_text_artifact(path: &PathBuf, contents: &str) -> miette::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, contents).into_diagnostic()
}

pub(crate) fn write_json_artifact<T: Serialize>(path: &PathBuf, value: &T) -> miette::Result<()> {
    write_text_artifact(path, &serde_json::to_string_pretty(value).into_diagnostic()?)
}
