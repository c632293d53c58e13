use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use unwind_ir::cfg::UnitId;

use crate::cover::CoverStats;
use crate::graph::VertexId;

/// One executed statement of a feasible error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WitnessStep {
    pub vertex: VertexId,
    pub unit: UnitId,
    pub statement: String,
    pub distance: usize,
    pub error: bool,
    /// Program variables before the statement executes.
    pub state: IndexMap<String, i64>,
}

/// A feasible path from the procedure entry through an error unit to the
/// return point, with concrete values from the solver model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Witness {
    pub root: VertexId,
    pub steps: Vec<WitnessStep>,
    /// Program variables at the return point.
    pub final_state: IndexMap<String, i64>,
}

impl Witness {
    pub fn units(&self) -> Vec<UnitId> {
        self.steps.iter().map(|s| s.unit).collect()
    }

    /// Statements executed before the first error unit fires.
    pub fn length(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.error)
            .unwrap_or(self.steps.len())
    }

    /// How many times `unit` executes along the path.
    pub fn occurrences(&self, unit: UnitId) -> usize {
        self.steps.iter().filter(|s| s.unit == unit).count()
    }

    pub fn error_step(&self) -> Option<&WitnessStep> {
        self.steps.iter().find(|s| s.error)
    }
}

impl fmt::Display for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            let state: Vec<String> = step
                .state
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            let marker = if step.error { "  <-- error" } else { "" };
            writeln!(
                f,
                "  {} {:<32} [{}]{marker}",
                step.unit,
                step.statement,
                state.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Outcome of one unwinding session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verdict {
    /// Every error path is infeasible.
    Safe,
    /// A feasible error path exists.
    Unsafe { witness: Witness },
    /// Neither proved nor refuted (solver gave up, budget exhausted, or
    /// part of the frontier was dropped).
    Unresolved { reason: String },
}

impl Verdict {
    /// Stable machine-readable class of the verdict.
    pub fn verdict_class(&self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Unsafe { .. } => "unsafe",
            Verdict::Unresolved { .. } => "unresolved",
        }
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            Verdict::Unsafe { witness } => Some(witness),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Safe => write!(f, "RESULT: SAFE"),
            Verdict::Unsafe { witness } => {
                writeln!(f, "RESULT: UNSAFE")?;
                writeln!(f, "Feasible error path ({} steps):", witness.steps.len())?;
                write!(f, "{witness}")
            }
            Verdict::Unresolved { reason } => {
                writeln!(f, "RESULT: UNRESOLVED")?;
                write!(f, "Reason: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// Refuted; `strengthened` labels changed.
    Infeasible { strengthened: usize },
    Feasible,
    Unresolved { reason: String },
}

/// An interpolant as applied to a vertex label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedInterpolant {
    pub vertex: VertexId,
    pub formula: String,
}

/// One checked error root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    pub root: VertexId,
    pub distance: usize,
    pub outcome: CandidateOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interpolants: Vec<RecordedInterpolant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnwindStats {
    /// Expansions that created at least one vertex.
    pub expansions: usize,
    pub vertices: usize,
    pub edges: usize,
    pub max_distance: usize,
    pub candidates: usize,
    pub refinements: usize,
    pub unresolved_candidates: usize,
    /// Queue entries skipped because they were covered.
    pub covered_skips: usize,
    /// Queue entries skipped because their label is `false`.
    pub refuted_skips: usize,
    /// Frontier vertices dropped by fast-forward.
    pub discarded: usize,
    pub oracle_checks: usize,
    pub interpolation_requests: usize,
    pub elapsed_ms: u64,
}

/// Everything one session produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub signature: String,
    pub function: String,
    /// `_{function}_{invocation}`
    pub definition: String,
    pub verdict: Verdict,
    pub error_roots: Vec<VertexId>,
    pub error_vertices: Vec<VertexId>,
    pub candidates: Vec<CandidateRecord>,
    pub stats: CoverStats,
    pub unwind: UnwindStats,
}

impl SessionReport {
    /// Human-readable summary, one block per checked error root.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} ({})\n", self.signature, self.definition));
        for candidate in &self.candidates {
            let outcome = match &candidate.outcome {
                CandidateOutcome::Infeasible { strengthened } => {
                    format!("infeasible, {strengthened} labels strengthened")
                }
                CandidateOutcome::Feasible => "feasible".to_string(),
                CandidateOutcome::Unresolved { reason } => format!("unresolved: {reason}"),
            };
            out.push_str(&format!(
                "  error root {} (distance {}): {outcome}\n",
                candidate.root, candidate.distance
            ));
        }
        out.push_str(&format!("{}\n", self.verdict));
        out.push_str(&format!(
            "vertices={} expansions={} candidates={} refinements={} covered={} covering={} elapsed={}ms\n",
            self.unwind.vertices,
            self.unwind.expansions,
            self.unwind.candidates,
            self.unwind.refinements,
            self.stats.covered,
            self.stats.covering,
            self.unwind.elapsed_ms,
        ));
        out
    }
}
