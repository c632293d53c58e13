//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Lazy backward-unwinding safety verifier with interpolation-based refinement.\n\n\
    Typical use:\n  \
    1. unwind list program.json\n  \
    2. unwind verify program.json --function '<demo.Main: void run()>' --error-method '<demo.Log: void leak()>'\n  \
    3. unwind visualize program.json --function '<demo.Main: void run()>' --policy policy.json --out tree.dot\n\n\
    Programs are JSON documents of the form {\"procedures\": [...]}. Error units are the\n\
    invocations named by --error-method or by the error_methods of a --policy file.";

#[derive(Parser)]
#[command(name = "unwind")]
#[command(about = "Lazy backward-unwinding safety verifier")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Prove a procedure safe or report a feasible error path
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        unwind: UnwindArgs,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,

        /// Write the unwinding tree to this file (Graphviz DOT)
        #[arg(long)]
        dot: Option<PathBuf>,

        /// Write the full session report to this file (JSON)
        #[arg(long)]
        report_out: Option<PathBuf>,
    },

    /// Unwind a procedure and print its unwinding tree as Graphviz DOT
    Visualize {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        unwind: UnwindArgs,

        /// Only draw the paths from error roots to the return point
        #[arg(long, default_value_t = false)]
        errors_only: bool,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List the procedures of a program and whether each has an error unit
    List {
        /// Path to the program JSON file
        file: PathBuf,

        /// Policy JSON file classifying invocations
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Signature of a method whose invocation is an error (repeatable)
        #[arg(long = "error-method")]
        error_methods: Vec<String>,
    },
}

/// Which procedure to analyze, and what counts as an error in it.
#[derive(Args, Debug, Clone)]
pub(crate) struct TargetArgs {
    /// Path to the program JSON file
    pub(crate) file: PathBuf,

    /// Signature of the procedure to verify (optional when the program has
    /// exactly one procedure)
    #[arg(long)]
    pub(crate) function: Option<String>,

    /// Policy JSON file classifying invocations
    #[arg(long)]
    pub(crate) policy: Option<PathBuf>,

    /// Signature of a method whose invocation is an error (repeatable)
    #[arg(long = "error-method")]
    pub(crate) error_methods: Vec<String>,
}

/// Knobs of the unwinding session.
#[derive(Args, Debug, Clone)]
pub(crate) struct UnwindArgs {
    /// Disable the cover relation (unwinds loops until a budget runs out)
    #[arg(long, default_value_t = false)]
    pub(crate) no_covering: bool,

    /// Frontier policy on reaching an error edge: defer | discard | off
    #[arg(long, default_value = "defer")]
    pub(crate) fast_forward: String,

    /// Wall-clock timeout in seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub(crate) timeout: u64,

    /// Per-query solver timeout in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub(crate) solver_timeout: u64,

    /// Maximum number of unwinding vertices (0 disables)
    #[arg(long, default_value_t = 0)]
    pub(crate) max_vertices: usize,
}
