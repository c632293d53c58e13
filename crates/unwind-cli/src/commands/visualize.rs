// Command handler for: Visualize

use std::path::PathBuf;

use unwind_engine::registry::InvocationRegistry;
use unwind_engine::session::ProgramTree;
use unwind_engine::visualization::{render_dot, render_error_paths_dot};

use super::helpers::{load_target, unwind_options, write_text_artifact};
use crate::cli::{TargetArgs, UnwindArgs};

pub(crate) fn run_visualize_command(
    target: TargetArgs,
    unwind: UnwindArgs,
    errors_only: bool,
    out: Option<PathBuf>,
) -> miette::Result<()> {
    let options = unwind_options(&unwind)?;
    let loaded = load_target(&target)?;
    let cfg = loaded
        .program
        .find(&loaded.function)
        .ok_or_else(|| miette::miette!("function {} not found in the program", loaded.function))?;
    let registry = InvocationRegistry::new();

    let mut tree = ProgramTree::new(
        &loaded.program,
        &loaded.function,
        &loaded.policy,
        &registry,
        options,
    )
    .map_err(|e| miette::miette!("{e}"))?;
    let verdict = tree.unwind().map_err(|e| miette::miette!("{e}"))?;

    let dot = if errors_only {
        render_error_paths_dot(tree.graph(), tree.cover(), cfg, tree.error_roots())
    } else {
        render_dot(tree.graph(), tree.cover(), cfg)
    };
    match out {
        Some(path) => {
            write_text_artifact(&path, &dot)?;
            println!("{} ({})", verdict.verdict_class(), path.display());
        }
        None => print!("{dot}"),
    }
    Ok(())
}
