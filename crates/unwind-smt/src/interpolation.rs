//! Sequence interpolation by projection.
//!
//! A path formula is a conjunction of partitions in which each partition
//! defines the next state's symbols by equalities (assignments and frame
//! conditions). Projecting a conjunction onto a cut's shared symbols
//! therefore mostly reduces to substitution. Symbols without a defining
//! equality (nondeterministic inputs) cannot be eliminated exactly; the
//! conjuncts mentioning them are dropped, which over-approximates the
//! projection and keeps the result a valid consequence.
//!
//! Two passes are tried:
//!
//! - backward, projecting each suffix onto its cut (weakest
//!   preconditions), accepted when the first interpolant refutes the first
//!   partition;
//! - forward, projecting each prefix (strongest postconditions) and
//!   negating, accepted when the last projection refutes the last
//!   partition.
//!
//! Both passes build each element from its neighbour, so the resulting
//! sequence is inductive. A path neither pass can refute yields
//! [`InterpolantResult::Unknown`].

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::oracle::{InterpolantResult, OracleError};
use crate::solver::SatResult;
use crate::terms::SmtTerm;

/// Interpolants for `partitions` (one per cut, `partitions.len() - 1` in
/// total), using `check` to decide satisfiability.
pub fn sequence_interpolants<C>(
    partitions: &[SmtTerm],
    mut check: C,
) -> Result<InterpolantResult, OracleError>
where
    C: FnMut(&SmtTerm) -> Result<SatResult, OracleError>,
{
    if partitions.len() < 2 {
        return Ok(InterpolantResult::Interpolants(Vec::new()));
    }
    match check(&SmtTerm::and(partitions.to_vec()))? {
        SatResult::Sat => return Ok(InterpolantResult::Feasible),
        SatResult::Unknown(reason) => return Ok(InterpolantResult::Unknown(reason)),
        SatResult::Unsat => {}
    }

    let shared = shared_symbols(partitions);
    if let Some(seq) = backward_pass(partitions, &shared, &mut check)? {
        trace!(cuts = seq.len(), "backward projection refutes the path");
        return Ok(InterpolantResult::Interpolants(seq));
    }
    if let Some(seq) = forward_pass(partitions, &shared, &mut check)? {
        trace!(cuts = seq.len(), "forward projection refutes the path");
        return Ok(InterpolantResult::Interpolants(seq));
    }
    Ok(InterpolantResult::Unknown(
        "projection lost the facts refuting the path".into(),
    ))
}

/// For each cut `k` in `1..len`, the symbols occurring both in
/// `partitions[..k]` and in `partitions[k..]`.
pub fn shared_symbols(partitions: &[SmtTerm]) -> Vec<IndexSet<String>> {
    let vars: Vec<IndexSet<String>> = partitions.iter().map(SmtTerm::free_vars).collect();
    let mut prefix: IndexSet<String> = IndexSet::new();
    let mut cuts = Vec::with_capacity(partitions.len().saturating_sub(1));
    for k in 1..partitions.len() {
        prefix.extend(vars[k - 1].iter().cloned());
        let suffix: IndexSet<&String> = vars[k..].iter().flatten().collect();
        cuts.push(
            prefix
                .iter()
                .filter(|name| suffix.contains(name))
                .cloned()
                .collect(),
        );
    }
    cuts
}

fn backward_pass<C>(
    partitions: &[SmtTerm],
    shared: &[IndexSet<String>],
    check: &mut C,
) -> Result<Option<Vec<SmtTerm>>, OracleError>
where
    C: FnMut(&SmtTerm) -> Result<SatResult, OracleError>,
{
    let cuts = partitions.len() - 1;
    let mut seq = vec![SmtTerm::bool(true); cuts];
    let mut carried = SmtTerm::bool(true);
    for k in (1..=cuts).rev() {
        let phi = SmtTerm::and(vec![partitions[k].clone(), carried]);
        carried = project(&phi, &shared[k - 1], check)?;
        seq[k - 1] = carried.clone();
    }
    let refutation = SmtTerm::and(vec![partitions[0].clone(), carried]);
    Ok(match check(&refutation)? {
        SatResult::Unsat => Some(seq),
        _ => None,
    })
}

fn forward_pass<C>(
    partitions: &[SmtTerm],
    shared: &[IndexSet<String>],
    check: &mut C,
) -> Result<Option<Vec<SmtTerm>>, OracleError>
where
    C: FnMut(&SmtTerm) -> Result<SatResult, OracleError>,
{
    let cuts = partitions.len() - 1;
    let mut projected = Vec::with_capacity(cuts);
    let mut carried = SmtTerm::bool(true);
    for k in 1..=cuts {
        let phi = SmtTerm::and(vec![carried, partitions[k - 1].clone()]);
        carried = project(&phi, &shared[k - 1], check)?;
        projected.push(carried.clone());
    }
    let refutation = SmtTerm::and(vec![carried, partitions[cuts].clone()]);
    Ok(match check(&refutation)? {
        SatResult::Unsat => Some(
            projected
                .into_iter()
                .map(|p| p.not().simplify())
                .collect(),
        ),
        _ => None,
    })
}

/// Over-approximate `∃ (vars(phi) \ keep). phi` as a formula over `keep`.
/// Unsatisfiable inputs project to `false`.
pub fn project<C>(
    phi: &SmtTerm,
    keep: &IndexSet<String>,
    check: &mut C,
) -> Result<SmtTerm, OracleError>
where
    C: FnMut(&SmtTerm) -> Result<SatResult, OracleError>,
{
    let mut conjuncts = phi.simplify().conjuncts();
    if conjuncts.iter().any(SmtTerm::is_false) {
        return Ok(SmtTerm::bool(false));
    }

    while let Some((idx, name, definition)) = find_definition(&conjuncts, keep) {
        conjuncts.remove(idx);
        let subst: IndexMap<String, SmtTerm> = [(name, definition)].into_iter().collect();
        let mut next = Vec::with_capacity(conjuncts.len());
        for conjunct in conjuncts {
            let rewritten = conjunct.substitute(&subst).simplify();
            if rewritten.is_false() {
                return Ok(SmtTerm::bool(false));
            }
            next.extend(rewritten.conjuncts());
        }
        conjuncts = next;
    }

    let (kept, local): (Vec<SmtTerm>, Vec<SmtTerm>) = conjuncts
        .into_iter()
        .partition(|c| c.free_vars().iter().all(|name| keep.contains(name)));
    let result = SmtTerm::and(kept).simplify();
    if (result.is_true() && local.is_empty()) || result.is_false() {
        return Ok(result);
    }

    // Exact when nothing was dropped, so the result alone decides emptiness.
    let witness = if local.is_empty() { &result } else { phi };
    Ok(match check(witness)? {
        SatResult::Unsat => SmtTerm::bool(false),
        _ => result,
    })
}

/// First conjunct of the form `v = t` (or a bare Boolean `v` / `¬v`) with
/// `v` outside `keep` and not occurring in `t`.
fn find_definition(
    conjuncts: &[SmtTerm],
    keep: &IndexSet<String>,
) -> Option<(usize, String, SmtTerm)> {
    let eliminable = |name: &str| !keep.contains(name);
    conjuncts
        .iter()
        .enumerate()
        .find_map(|(idx, conjunct)| match conjunct {
            SmtTerm::Eq(lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
                (SmtTerm::Var(v), t) | (t, SmtTerm::Var(v))
                    if eliminable(v) && !t.mentions(v) =>
                {
                    Some((idx, v.clone(), t.clone()))
                }
                _ => None,
            },
            SmtTerm::Var(v) if eliminable(v) => Some((idx, v.clone(), SmtTerm::bool(true))),
            SmtTerm::Not(inner) => match inner.as_ref() {
                SmtTerm::Var(v) if eliminable(v) => Some((idx, v.clone(), SmtTerm::bool(false))),
                _ => None,
            },
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::z3_backend::Z3Solver;
    use crate::oracle::{InterpolatingOracle, SolverOracle, Vocabulary};
    use crate::sorts::SmtSort;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn v(name: &str) -> SmtTerm {
        SmtTerm::var(name)
    }

    fn vocabulary(ints: &[&str], bools: &[&str]) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for name in ints {
            vocab.declare(*name, SmtSort::Int);
        }
        for name in bools {
            vocab.declare(*name, SmtSort::Bool);
        }
        vocab
    }

    fn oracle() -> SolverOracle<Z3Solver> {
        SolverOracle::z3(0)
    }

    /// `x = *; assume x > 0; assume x < 0; error()` reaching the goal.
    fn contradictory_guards() -> (Vocabulary, Vec<SmtTerm>) {
        let vocab = vocabulary(
            &["x@4", "x@3", "x@2", "x@1", "x@0"],
            &["err@4", "err@3", "err@2", "err@1", "err@0"],
        );
        let frame = |name: &str, d: usize| {
            v(&format!("{name}@{}", d - 1)).eq(v(&format!("{name}@{d}")))
        };
        let partitions = vec![
            v("err@4").not(),
            frame("err", 4),
            SmtTerm::and(vec![v("x@3").gt(SmtTerm::int(0)), frame("x", 3), frame("err", 3)]),
            SmtTerm::and(vec![v("x@2").lt(SmtTerm::int(0)), frame("x", 2), frame("err", 2)]),
            SmtTerm::and(vec![v("err@0").eq(SmtTerm::bool(true)), frame("x", 1)]),
            v("err@0"),
        ];
        (vocab, partitions)
    }

    #[test]
    fn shared_symbols_per_cut() {
        let partitions = vec![
            v("a").gt(SmtTerm::int(0)),
            v("b").eq(v("a")),
            v("b").lt(SmtTerm::int(0)),
        ];
        let shared = shared_symbols(&partitions);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(shared[1].iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn interpolants_separate_contradictory_guards() -> TestResult {
        let (vocab, partitions) = contradictory_guards();
        let mut oracle = oracle();
        let InterpolantResult::Interpolants(seq) = oracle.interpolate(&vocab, &partitions)? else {
            return Err("expected interpolants".into());
        };
        assert_eq!(seq.len(), partitions.len() - 1);

        // The cut between the two guards mentions only x@2 and refutes x@2 > 0.
        let between = &seq[2];
        assert!(between.free_vars().iter().all(|name| name == "x@2"));
        let with_first_guard = SmtTerm::and(vec![between.clone(), v("x@2").gt(SmtTerm::int(0))]);
        assert_eq!(oracle.check_sat(&vocab, &with_first_guard)?, SatResult::Unsat);
        assert_eq!(oracle.implies(&vocab, &v("x@2").lt(SmtTerm::int(0)), between)?, Some(true));
        Ok(())
    }

    #[test]
    fn interpolant_sequence_is_valid_and_inductive() -> TestResult {
        let (vocab, partitions) = contradictory_guards();
        let mut oracle = oracle();
        let InterpolantResult::Interpolants(seq) = oracle.interpolate(&vocab, &partitions)? else {
            return Err("expected interpolants".into());
        };
        for k in 1..partitions.len() {
            let itp = &seq[k - 1];
            let suffix = SmtTerm::and(partitions[k..].to_vec());
            assert_eq!(oracle.implies(&vocab, &suffix, itp)?, Some(true), "suffix implies I_{k}");
            let prefix = SmtTerm::and(partitions[..k].to_vec());
            let clash = SmtTerm::and(vec![prefix, itp.clone()]);
            assert_eq!(oracle.check_sat(&vocab, &clash)?, SatResult::Unsat, "I_{k} refutes prefix");
            if k + 1 < partitions.len() {
                let step = SmtTerm::and(vec![partitions[k].clone(), seq[k].clone()]);
                assert_eq!(oracle.implies(&vocab, &step, itp)?, Some(true), "inductive at {k}");
            }
        }
        Ok(())
    }

    #[test]
    fn forward_pass_recovers_facts_lost_to_nondeterminism() -> TestResult {
        // a@2 = 5, z@2 = 5; y@1 = * ; assume y@1 > a@1 && y@1 < z@1
        let vocab = vocabulary(&["a@2", "z@2", "a@1", "z@1", "y@1"], &[]);
        let partitions = vec![
            SmtTerm::and(vec![v("a@2").eq(SmtTerm::int(5)), v("z@2").eq(SmtTerm::int(5))]),
            SmtTerm::and(vec![v("a@1").eq(v("a@2")), v("z@1").eq(v("z@2"))]),
            SmtTerm::and(vec![v("y@1").gt(v("a@1")), v("y@1").lt(v("z@1"))]),
        ];
        let mut oracle = oracle();
        let InterpolantResult::Interpolants(seq) = oracle.interpolate(&vocab, &partitions)? else {
            return Err("expected interpolants".into());
        };
        let last = &seq[1];
        let clash = SmtTerm::and(vec![partitions[0].clone(), partitions[1].clone(), last.clone()]);
        assert_eq!(oracle.check_sat(&vocab, &clash)?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn project_substitutes_definitions() -> TestResult {
        let vocab = vocabulary(&["x@1", "x@0"], &[]);
        let mut oracle = oracle();
        let keep: IndexSet<String> = ["x@1".to_string()].into_iter().collect();
        let phi = SmtTerm::and(vec![
            v("x@0").eq(v("x@1").add(SmtTerm::int(1))),
            v("x@0").gt(SmtTerm::int(3)),
        ]);
        let projected = project(&phi, &keep, &mut |f: &SmtTerm| oracle.check_sat(&vocab, f))?;
        assert_eq!(projected, v("x@1").add(SmtTerm::int(1)).gt(SmtTerm::int(3)));
        Ok(())
    }

    #[test]
    fn single_partition_has_no_cuts() -> TestResult {
        let result = sequence_interpolants(&[SmtTerm::bool(false)], |_| Ok(SatResult::Unsat))?;
        assert_eq!(result, InterpolantResult::Interpolants(Vec::new()));
        Ok(())
    }
}
