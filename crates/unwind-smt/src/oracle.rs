//! The oracle boundary between the unwinding engine and the solver.
//!
//! The engine only needs three questions answered: is this formula
//! satisfiable (with a model, for witnesses), does one label imply another,
//! and why is this path infeasible (a sequence interpolant). Every query is
//! self-contained: it declares its own symbols inside a solver scope that is
//! popped before returning, so no query observes another's assertions.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::backends::smtlib_printer::to_smtlib_script;
use crate::backends::z3_backend::Z3Solver;
use crate::interpolation::sequence_interpolants;
use crate::solver::{Model, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("solver failure: {0}")]
    Solver(String),
    #[error("symbol `{0}` is not declared in the vocabulary")]
    Undeclared(String),
}

/// Sorts of every symbol a query may mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    sorts: IndexMap<String, SmtSort>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name`; re-declaring with the same sort is a no-op.
    pub fn declare(&mut self, name: impl Into<String>, sort: SmtSort) {
        self.sorts.entry(name.into()).or_insert(sort);
    }

    pub fn sort_of(&self, name: &str) -> Option<SmtSort> {
        self.sorts.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sorts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SmtSort)> {
        self.sorts.iter().map(|(name, sort)| (name.as_str(), *sort))
    }

    /// Declarations needed by `terms`, in first-occurrence order.
    pub fn declarations_for<'a>(
        &self,
        terms: impl IntoIterator<Item = &'a SmtTerm>,
    ) -> Result<Vec<(String, SmtSort)>, OracleError> {
        let mut seen: IndexMap<String, SmtSort> = IndexMap::new();
        for term in terms {
            for name in term.free_vars() {
                if seen.contains_key(&name) {
                    continue;
                }
                let sort = self
                    .sort_of(&name)
                    .ok_or_else(|| OracleError::Undeclared(name.clone()))?;
                seen.insert(name, sort);
            }
        }
        Ok(seen.into_iter().collect())
    }
}

/// Outcome of an interpolation request.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpolantResult {
    /// One interpolant per cut: entry `k - 1` separates partitions `..k`
    /// from `k..`.
    Interpolants(Vec<SmtTerm>),
    /// The conjunction of the partitions is satisfiable.
    Feasible,
    /// The path may be infeasible but no interpolant sequence was found.
    Unknown(String),
}

/// Counters kept by an oracle over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OracleStats {
    pub sat_checks: usize,
    pub interpolation_requests: usize,
    pub interpolation_failures: usize,
}

pub trait InterpolatingOracle {
    fn check_sat(
        &mut self,
        vocabulary: &Vocabulary,
        formula: &SmtTerm,
    ) -> Result<SatResult, OracleError>;

    /// Check `formula` and, when satisfiable, evaluate the named symbols.
    fn check_sat_with_model(
        &mut self,
        vocabulary: &Vocabulary,
        formula: &SmtTerm,
        symbols: &[String],
    ) -> Result<(SatResult, Option<Model>), OracleError>;

    /// Interpolants for an unsatisfiable sequence of partitions, using the
    /// backward convention: `partitions[k..]` implies `I_k`, and `I_k` is
    /// inconsistent with `partitions[..k]`.
    fn interpolate(
        &mut self,
        vocabulary: &Vocabulary,
        partitions: &[SmtTerm],
    ) -> Result<InterpolantResult, OracleError>;

    fn stats(&self) -> OracleStats;

    /// `Some(true)` when `lhs ⇒ rhs` is valid, `Some(false)` when refuted,
    /// `None` when the solver could not decide.
    fn implies(
        &mut self,
        vocabulary: &Vocabulary,
        lhs: &SmtTerm,
        rhs: &SmtTerm,
    ) -> Result<Option<bool>, OracleError> {
        if lhs.is_false() || rhs.is_true() || lhs == rhs {
            return Ok(Some(true));
        }
        let query = SmtTerm::and(vec![lhs.clone(), rhs.clone().not()]);
        Ok(match self.check_sat(vocabulary, &query)? {
            SatResult::Unsat => Some(true),
            SatResult::Sat => Some(false),
            SatResult::Unknown(_) => None,
        })
    }
}

/// Oracle answering every query with one scoped solver.
pub struct SolverOracle<S: SmtSolver> {
    solver: S,
    stats: OracleStats,
}

impl SolverOracle<Z3Solver> {
    /// Z3-backed oracle; `timeout_secs == 0` disables the per-check limit.
    pub fn z3(timeout_secs: u64) -> Self {
        Self::new(Z3Solver::with_timeout_secs(timeout_secs))
    }
}

impl<S: SmtSolver> SolverOracle<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            stats: OracleStats::default(),
        }
    }

    pub fn into_inner(self) -> S {
        self.solver
    }

    fn scoped<T>(
        &mut self,
        vocabulary: &Vocabulary,
        formula: &SmtTerm,
        run: impl FnOnce(&mut S) -> Result<T, S::Error>,
    ) -> Result<T, OracleError> {
        let declarations = vocabulary.declarations_for([formula])?;
        trace!(
            script = %to_smtlib_script(
                declarations.iter().map(|(name, sort)| (name.as_str(), *sort)),
                std::slice::from_ref(formula),
            ),
            "oracle query"
        );
        self.stats.sat_checks += 1;
        self.solver.push().map_err(solver_error)?;
        let outcome = declarations
            .iter()
            .try_for_each(|(name, sort)| self.solver.declare_var(name, sort))
            .and_then(|()| self.solver.assert(formula))
            .and_then(|()| run(&mut self.solver));
        // Pop even when the query failed so the next one starts clean.
        self.solver.pop().map_err(solver_error)?;
        outcome.map_err(solver_error)
    }
}

fn solver_error<E: std::error::Error>(err: E) -> OracleError {
    OracleError::Solver(err.to_string())
}

impl<S: SmtSolver> InterpolatingOracle for SolverOracle<S> {
    fn check_sat(
        &mut self,
        vocabulary: &Vocabulary,
        formula: &SmtTerm,
    ) -> Result<SatResult, OracleError> {
        if formula.is_false() {
            return Ok(SatResult::Unsat);
        }
        self.scoped(vocabulary, formula, |solver| solver.check_sat())
    }

    fn check_sat_with_model(
        &mut self,
        vocabulary: &Vocabulary,
        formula: &SmtTerm,
        symbols: &[String],
    ) -> Result<(SatResult, Option<Model>), OracleError> {
        let mut wanted = Vec::with_capacity(symbols.len());
        for name in symbols {
            let sort = vocabulary
                .sort_of(name)
                .ok_or_else(|| OracleError::Undeclared(name.clone()))?;
            wanted.push((name.clone(), sort));
        }
        // Symbols the formula does not mention are declared through a
        // trivially true conjunct so the model can still report them.
        let mentioned = formula.free_vars();
        let mut conjuncts = vec![formula.clone()];
        for (name, sort) in &wanted {
            if !mentioned.contains(name) {
                let var = SmtTerm::var(name.clone());
                conjuncts.push(match sort {
                    SmtSort::Int => var.clone().eq(var),
                    SmtSort::Bool => SmtTerm::or(vec![var.clone(), var.not()]),
                });
            }
        }
        let query = SmtTerm::and(conjuncts);
        self.scoped(vocabulary, &query, |solver| {
            let refs: Vec<(&str, &SmtSort)> =
                wanted.iter().map(|(name, sort)| (name.as_str(), sort)).collect();
            solver.check_sat_with_model(&refs)
        })
    }

    fn interpolate(
        &mut self,
        vocabulary: &Vocabulary,
        partitions: &[SmtTerm],
    ) -> Result<InterpolantResult, OracleError> {
        self.stats.interpolation_requests += 1;
        let result = sequence_interpolants(partitions, |formula| {
            self.check_sat(vocabulary, formula)
        })?;
        if let InterpolantResult::Unknown(reason) = &result {
            self.stats.interpolation_failures += 1;
            debug!(%reason, cuts = partitions.len().saturating_sub(1), "interpolation failed");
        }
        Ok(result)
    }

    fn stats(&self) -> OracleStats {
        self.stats
    }
}
