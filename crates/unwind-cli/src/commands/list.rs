// Command handler for: List

use std::path::PathBuf;

use unwind_ir::cfg::ControlFlowGraph;
use unwind_ir::policy::{SignaturePolicy, UnitClassifier};

use super::helpers::{load_policy, read_program};

pub(crate) fn run_list_command(
    file: PathBuf,
    policy: Option<PathBuf>,
    error_methods: Vec<String>,
) -> miette::Result<()> {
    let program = read_program(&file)?;
    // Listing works without a policy; nothing is marked then.
    let policy = if policy.is_some() || !error_methods.is_empty() {
        load_policy(policy.as_deref(), &error_methods)?
    } else {
        SignaturePolicy::new()
    };
    for procedure in &program.procedures {
        let marker = if policy.has_error_unit(procedure) {
            "error"
        } else {
            "-"
        };
        println!(
            "{:<6} {:>4} units  {}",
            marker,
            procedure.unit_count(),
            procedure.signature()
        );
    }
    Ok(())
}
