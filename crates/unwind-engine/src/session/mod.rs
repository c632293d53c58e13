//! The unwind/refine driver.
//!
//! A [`ProgramTree`] unwinds one procedure backward from its return point.
//! Uncovered vertices are expanded in FIFO order; each new error root's
//! path is encoded and handed to the oracle. Infeasible paths strengthen
//! the labels along the path with interpolants, feasible ones end the
//! session with a witness, and an empty frontier proves the procedure safe.

mod timeout;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use unwind_ir::cfg::{method_name, ControlFlowGraph, Program};
use unwind_ir::policy::UnitClassifier;
use unwind_smt::backends::z3_backend::Z3Solver;
use unwind_smt::oracle::{
    InterpolantResult, InterpolatingOracle, OracleError, OracleStats, SolverOracle, Vocabulary,
};
use unwind_smt::solver::SatResult;
use unwind_smt::terms::SmtTerm;

use crate::cover::CoverRelation;
use crate::encoder::{versioned, EncodeError, PathEncoder, PathEncoding};
use crate::graph::{Expansion, UnwindingGraph, VertexId};
use crate::registry::{definition_name, InvocationRegistry};
use crate::result::{
    CandidateOutcome, CandidateRecord, RecordedInterpolant, SessionReport, UnwindStats, Verdict,
    Witness, WitnessStep,
};

use timeout::{deadline_exceeded, deadline_from_timeout_secs, timeout_unresolved_reason};

/// What happens to the frontier when an error edge is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastForward {
    /// Pursue the error vertex first; resume the displaced frontier after.
    #[default]
    Defer,
    /// Drop the displaced frontier. A run that dropped vertices and found
    /// no feasible path ends unresolved.
    Discard,
    /// Plain FIFO.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnwindOptions {
    pub covering: bool,
    pub fast_forward: FastForward,
    /// Wall-clock budget for the whole session; 0 disables it.
    pub timeout_secs: u64,
    /// Vertex budget; 0 disables it.
    pub max_vertices: usize,
    /// Per-query solver timeout; 0 disables it.
    pub solver_timeout_secs: u64,
}

impl Default for UnwindOptions {
    fn default() -> Self {
        Self {
            covering: true,
            fast_forward: FastForward::Defer,
            timeout_secs: 0,
            max_vertices: 0,
            solver_timeout_secs: 0,
        }
    }
}

/// Running verdict of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictState {
    Unresolved,
    ProvedInfeasible,
    ProvedFeasible(Witness),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("function {0} not found in the program")]
    MainFunctionNotFound(String),
    #[error("function {0} has no error location")]
    ErrorLocationNotFound(String),
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),
    #[error("oracle error: {0}")]
    Oracle(String),
    #[error("vertex {0} is not an error root of this session")]
    NotAnErrorRoot(VertexId),
}

fn oracle_failure(err: OracleError) -> SessionError {
    SessionError::Oracle(err.to_string())
}

/// One unwinding session over one procedure.
pub struct ProgramTree<'a, O: InterpolatingOracle = SolverOracle<Z3Solver>> {
    cfg: &'a dyn ControlFlowGraph,
    classifier: &'a dyn UnitClassifier,
    options: UnwindOptions,
    function: String,
    definition: String,
    graph: UnwindingGraph,
    root: VertexId,
    cover: CoverRelation,
    encoder: PathEncoder,
    vocabulary: Vocabulary,
    oracle: O,
    queue: VecDeque<VertexId>,
    deferred: VecDeque<VertexId>,
    error_roots: IndexSet<VertexId>,
    error_root_queue: VecDeque<VertexId>,
    error_vertices: IndexSet<VertexId>,
    candidates: Vec<CandidateRecord>,
    state: VerdictState,
    unresolved: Option<String>,
    stats: UnwindStats,
    finished: Option<Verdict>,
}

impl<'a> ProgramTree<'a> {
    /// Session for `signature` in `program`, backed by Z3.
    pub fn new(
        program: &'a Program,
        signature: &str,
        classifier: &'a dyn UnitClassifier,
        registry: &InvocationRegistry,
        options: UnwindOptions,
    ) -> Result<Self, SessionError> {
        let cfg = program
            .find(signature)
            .ok_or_else(|| SessionError::MainFunctionNotFound(signature.to_string()))?;
        let oracle = SolverOracle::z3(options.solver_timeout_secs);
        Self::with_oracle(cfg, classifier, registry, options, oracle)
    }
}

impl<'a, O: InterpolatingOracle> ProgramTree<'a, O> {
    pub fn with_oracle(
        cfg: &'a dyn ControlFlowGraph,
        classifier: &'a dyn UnitClassifier,
        registry: &InvocationRegistry,
        options: UnwindOptions,
        oracle: O,
    ) -> Result<Self, SessionError> {
        if !classifier.has_error_unit(cfg) {
            return Err(SessionError::ErrorLocationNotFound(
                cfg.signature().to_string(),
            ));
        }
        let encoder = PathEncoder::for_cfg(cfg)?;
        let function = method_name(cfg.signature()).to_string();
        let definition = definition_name(&function, registry.register(&function));
        let (graph, root) = UnwindingGraph::seed(cfg, classifier);
        let mut vocabulary = Vocabulary::new();
        encoder.declare_state(&mut vocabulary, 0);

        Ok(Self {
            cfg,
            classifier,
            cover: CoverRelation::new(options.covering),
            options,
            function,
            definition,
            graph,
            root,
            encoder,
            vocabulary,
            oracle,
            queue: VecDeque::from([root]),
            deferred: VecDeque::new(),
            error_roots: IndexSet::new(),
            error_root_queue: VecDeque::new(),
            error_vertices: IndexSet::new(),
            candidates: Vec::new(),
            state: VerdictState::Unresolved,
            unresolved: None,
            stats: UnwindStats::default(),
            finished: None,
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// `_{function}_{invocation}`
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn options(&self) -> &UnwindOptions {
        &self.options
    }

    pub fn graph(&self) -> &UnwindingGraph {
        &self.graph
    }

    pub fn root(&self) -> VertexId {
        self.root
    }

    pub fn cover(&self) -> &CoverRelation {
        &self.cover
    }

    pub fn encoder(&self) -> &PathEncoder {
        &self.encoder
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn state(&self) -> &VerdictState {
        &self.state
    }

    pub fn candidates(&self) -> &[CandidateRecord] {
        &self.candidates
    }

    pub fn error_roots(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.error_roots.iter().copied()
    }

    pub fn error_vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.error_vertices.iter().copied()
    }

    pub fn stats(&self) -> UnwindStats {
        self.stats
    }

    pub fn oracle_stats(&self) -> OracleStats {
        self.oracle.stats()
    }

    /// Run the session to a verdict. Calling it again returns the same
    /// verdict without further work.
    pub fn unwind(&mut self) -> Result<Verdict, SessionError> {
        if let Some(verdict) = &self.finished {
            return Ok(verdict.clone());
        }
        let started = Instant::now();
        let deadline = deadline_from_timeout_secs(self.options.timeout_secs);
        info!(
            function = %self.function,
            definition = %self.definition,
            covering = self.options.covering,
            fast_forward = ?self.options.fast_forward,
            "unwinding"
        );

        let verdict = loop {
            if let VerdictState::ProvedFeasible(witness) = &self.state {
                break Verdict::Unsafe {
                    witness: witness.clone(),
                };
            }
            if deadline_exceeded(deadline) {
                break Verdict::Unresolved {
                    reason: timeout_unresolved_reason("unwinding"),
                };
            }
            if self.options.max_vertices > 0
                && self.graph.vertex_count() >= self.options.max_vertices
            {
                break Verdict::Unresolved {
                    reason: format!("vertex budget of {} exhausted", self.options.max_vertices),
                };
            }
            let Some(w) = self.next_vertex() else {
                if !self.error_root_queue.is_empty() {
                    self.check_candidates()?;
                    continue;
                }
                break self.exhausted_verdict();
            };
            if !self.should_expand(w)? {
                continue;
            }
            let expansion = self
                .graph
                .expand(w, self.cfg, self.classifier, &mut self.cover);
            self.absorb(expansion);
            self.check_candidates()?;
        };

        let oracle_stats = self.oracle.stats();
        self.stats.oracle_checks = oracle_stats.sat_checks;
        self.stats.interpolation_requests = oracle_stats.interpolation_requests;
        self.stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let cover_stats = self.cover.stats();
        info!(
            verdict = verdict.verdict_class(),
            vertices = self.stats.vertices,
            expansions = self.stats.expansions,
            candidates = self.stats.candidates,
            refinements = self.stats.refinements,
            covering = cover_stats.covering,
            covered = cover_stats.covered,
            indexed_units = cover_stats.indexed_units,
            elapsed_ms = self.stats.elapsed_ms,
            "unwinding finished"
        );
        self.cover.log_unit_vertex_map();
        self.finished = Some(verdict.clone());
        Ok(verdict)
    }

    /// Re-encode and re-check the path of an error root. On a path that was
    /// already refuted the labels imply the interpolants, so neither labels
    /// nor cover pairs change.
    pub fn resubmit(&mut self, root: VertexId) -> Result<CandidateRecord, SessionError> {
        if !self.error_roots.contains(&root) {
            return Err(SessionError::NotAnErrorRoot(root));
        }
        let record = self.check_candidate(root)?;
        self.candidates.push(record.clone());
        Ok(record)
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            signature: self.cfg.signature().to_string(),
            function: self.function.clone(),
            definition: self.definition.clone(),
            verdict: self.finished.clone().unwrap_or_else(|| Verdict::Unresolved {
                reason: "unwinding has not run".into(),
            }),
            error_roots: self.error_roots.iter().copied().collect(),
            error_vertices: self.error_vertices.iter().copied().collect(),
            candidates: self.candidates.clone(),
            stats: self.cover.stats(),
            unwind: self.stats,
        }
    }

    fn next_vertex(&mut self) -> Option<VertexId> {
        if self.queue.is_empty() && !self.deferred.is_empty() {
            debug!(resumed = self.deferred.len(), "resuming deferred frontier");
            self.queue = std::mem::take(&mut self.deferred);
        }
        self.queue.pop_front()
    }

    fn should_expand(&mut self, w: VertexId) -> Result<bool, SessionError> {
        let vertex = self.graph.vertex(w);
        if vertex.expanded {
            return Ok(false);
        }
        if vertex.label.is_false() {
            self.stats.refuted_skips += 1;
            return Ok(false);
        }
        let covered = self
            .cover
            .is_covered(w, &self.graph, &mut self.oracle, &self.vocabulary)
            .map_err(oracle_failure)?;
        let released = self.cover.take_uncovered();
        self.requeue(released);
        if covered {
            self.stats.covered_skips += 1;
        }
        Ok(!covered)
    }

    fn absorb(&mut self, expansion: Expansion) {
        if !expansion.created.is_empty() {
            self.stats.expansions += 1;
        }
        for created in &expansion.created {
            let distance = self.graph.vertex(created.vertex).distance;
            self.encoder.declare_state(&mut self.vocabulary, distance);
            self.stats.max_distance = self.stats.max_distance.max(distance);
            self.queue.push_back(created.vertex);
            if created.fast_forward {
                self.fast_forward(created.vertex);
            }
        }
        for root in expansion.error_roots {
            if self.error_roots.insert(root) {
                debug!(root = %root, "error root found");
                self.error_root_queue.push_back(root);
            }
        }
        self.error_vertices.extend(expansion.error_vertices);
        self.stats.vertices = self.graph.vertex_count();
        self.stats.edges = self.graph.edge_count();
    }

    fn fast_forward(&mut self, v: VertexId) {
        match self.options.fast_forward {
            FastForward::Off => {}
            FastForward::Defer => {
                let displaced: Vec<VertexId> = self.queue.drain(..).filter(|&x| x != v).collect();
                if !displaced.is_empty() {
                    debug!(vertex = %v, deferred = displaced.len(), "fast-forward");
                }
                self.deferred.extend(displaced);
                self.queue.push_back(v);
            }
            FastForward::Discard => {
                let dropped = self.queue.iter().filter(|&&x| x != v).count();
                if dropped > 0 {
                    debug!(vertex = %v, dropped, "fast-forward discarding frontier");
                }
                self.stats.discarded += dropped;
                self.queue.clear();
                self.queue.push_back(v);
            }
        }
    }

    fn requeue(&mut self, vertices: Vec<VertexId>) {
        for v in vertices {
            // A released error root skipped while covered still needs a check.
            if self.error_roots.contains(&v)
                && !self.error_root_queue.contains(&v)
                && !self.candidates.iter().any(|c| c.root == v)
            {
                self.error_root_queue.push_back(v);
            }
            if !self.queue.contains(&v) {
                self.queue.push_back(v);
            }
        }
    }

    fn exhausted_verdict(&mut self) -> Verdict {
        if self.stats.discarded > 0 {
            return Verdict::Unresolved {
                reason: format!(
                    "fast-forward discarded {} frontier vertices",
                    self.stats.discarded
                ),
            };
        }
        if let Some(reason) = &self.unresolved {
            return Verdict::Unresolved {
                reason: reason.clone(),
            };
        }
        self.state = VerdictState::ProvedInfeasible;
        Verdict::Safe
    }

    fn check_candidates(&mut self) -> Result<(), SessionError> {
        while let Some(root) = self.error_root_queue.pop_front() {
            if matches!(self.state, VerdictState::ProvedFeasible(_)) {
                break;
            }
            let covered = self
                .cover
                .is_covered(root, &self.graph, &mut self.oracle, &self.vocabulary)
                .map_err(oracle_failure)?;
            let released = self.cover.take_uncovered();
            self.requeue(released);
            if covered {
                debug!(root = %root, "error root covered; not checked");
                continue;
            }
            let record = self.check_candidate(root)?;
            self.candidates.push(record);
        }
        Ok(())
    }

    fn check_candidate(&mut self, root: VertexId) -> Result<CandidateRecord, SessionError> {
        self.stats.candidates += 1;
        let encoding = self.encoder.encode_path(&self.graph, self.cfg, root)?;
        let distance = self.graph.vertex(root).distance;
        debug!(root = %root, distance, "checking error path");

        let mut interpolants = Vec::new();
        let outcome = match self.oracle.interpolate(&self.vocabulary, &encoding.partitions) {
            Ok(InterpolantResult::Feasible) => match self.extract_witness(root, &encoding) {
                Ok(Some(witness)) => {
                    info!(root = %root, steps = witness.steps.len(), "feasible error path");
                    self.state = VerdictState::ProvedFeasible(witness);
                    CandidateOutcome::Feasible
                }
                Ok(None) => self.unresolved_candidate(root, "no model for a feasible path".into()),
                Err(OracleError::Solver(reason)) => self.unresolved_candidate(root, reason),
                Err(err) => return Err(oracle_failure(err)),
            },
            Ok(InterpolantResult::Interpolants(seq)) => {
                let (strengthened, recorded) = self.refine(&encoding, seq)?;
                interpolants = recorded;
                CandidateOutcome::Infeasible { strengthened }
            }
            Ok(InterpolantResult::Unknown(reason)) => self.unresolved_candidate(root, reason),
            Err(OracleError::Solver(reason)) => self.unresolved_candidate(root, reason),
            Err(err) => return Err(oracle_failure(err)),
        };
        Ok(CandidateRecord {
            root,
            distance,
            outcome,
            interpolants,
        })
    }

    fn unresolved_candidate(&mut self, root: VertexId, reason: String) -> CandidateOutcome {
        warn!(root = %root, %reason, "error path unresolved");
        self.stats.unresolved_candidates += 1;
        if self.unresolved.is_none() {
            self.unresolved = Some(format!("error path from {root} unresolved: {reason}"));
        }
        CandidateOutcome::Unresolved { reason }
    }

    /// Conjoin each interpolant to its vertex label unless already implied,
    /// then repair the cover relation.
    fn refine(
        &mut self,
        encoding: &PathEncoding,
        interpolants: Vec<SmtTerm>,
    ) -> Result<(usize, Vec<RecordedInterpolant>), SessionError> {
        self.stats.refinements += 1;
        let mut strengthened = Vec::new();
        let mut recorded = Vec::new();
        for (&v, itp) in encoding.vertices.iter().zip(interpolants) {
            let itp = itp.simplify();
            recorded.push(RecordedInterpolant {
                vertex: v,
                formula: itp.to_string(),
            });
            let label = self.graph.vertex(v).label.clone();
            let implied = match self.oracle.implies(&self.vocabulary, &label, &itp) {
                Ok(Some(holds)) => holds,
                Ok(None) => false,
                Err(OracleError::Solver(reason)) => {
                    warn!(vertex = %v, %reason, "label implication check failed");
                    false
                }
                Err(err) => return Err(oracle_failure(err)),
            };
            if implied {
                continue;
            }
            self.graph
                .set_label(v, SmtTerm::and(vec![label, itp]).simplify());
            strengthened.push(v);
        }

        let released = self
            .cover
            .update_cover(&strengthened, &self.graph, &mut self.oracle, &self.vocabulary)
            .map_err(oracle_failure)?;
        debug!(
            strengthened = strengthened.len(),
            requeued = released.len(),
            "labels refined"
        );
        self.requeue(released);
        Ok((strengthened.len(), recorded))
    }

    fn extract_witness(
        &mut self,
        root: VertexId,
        encoding: &PathEncoding,
    ) -> Result<Option<Witness>, OracleError> {
        let n = self.graph.vertex(root).distance;
        let symbols: Vec<String> = (0..=n)
            .flat_map(|d| self.encoder.state_symbols(d))
            .collect();
        let (result, model) =
            self.oracle
                .check_sat_with_model(&self.vocabulary, &encoding.formula(), &symbols)?;
        let (SatResult::Sat, Some(model)) = (result, model) else {
            return Ok(None);
        };

        let state_at = |distance: usize| -> IndexMap<String, i64> {
            self.encoder
                .variables()
                .filter_map(|name| {
                    model
                        .get_int(&versioned(name, distance))
                        .map(|value| (name.to_string(), value))
                })
                .collect()
        };

        let mut steps = Vec::with_capacity(n);
        for &v in &encoding.vertices[..encoding.vertices.len() - 1] {
            let vertex = self.graph.vertex(v);
            let Some(edge) = vertex.outgoing.map(|e| self.graph.edge(e)) else {
                continue;
            };
            steps.push(WitnessStep {
                vertex: v,
                unit: edge.unit,
                statement: self
                    .cfg
                    .statement(edge.unit)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                distance: vertex.distance,
                error: edge.class.error,
                state: state_at(vertex.distance),
            });
        }
        Ok(Some(Witness {
            root,
            steps,
            final_state: state_at(0),
        }))
    }
}

/// Run one session over `signature` and return its report.
pub fn verify(
    program: &Program,
    signature: &str,
    classifier: &dyn UnitClassifier,
    registry: &InvocationRegistry,
    options: UnwindOptions,
) -> Result<SessionReport, SessionError> {
    let mut tree = ProgramTree::new(program, signature, classifier, registry, options)?;
    tree.unwind()?;
    Ok(tree.report())
}
