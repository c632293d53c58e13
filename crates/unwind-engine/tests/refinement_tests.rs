mod common;

use common::*;
use unwind_engine::graph::VertexId;
use unwind_engine::registry::InvocationRegistry;
use unwind_engine::result::{CandidateOutcome, Verdict};
use unwind_engine::session::{ProgramTree, UnwindOptions, VerdictState};
use unwind_ir::cfg::{ProcedureGraph, Program};
use unwind_ir::statement::Cond;

fn label_snapshot(tree: &ProgramTree<'_>) -> Vec<(VertexId, String)> {
    tree.graph()
        .vertices()
        .map(|v| (v.id, v.label.to_string()))
        .collect()
}

fn cover_snapshot(tree: &ProgramTree<'_>) -> Vec<(VertexId, VertexId)> {
    let mut pairs: Vec<_> = tree.cover().pairs().collect();
    pairs.sort();
    pairs
}

fn assert_resubmission_is_a_no_op(cfg: ProcedureGraph) -> TestResult {
    let program = Program::new().with_procedure(cfg);
    let policy = leak_policy();
    let registry = InvocationRegistry::new();
    let mut tree = session(&program, &policy, &registry, UnwindOptions::default());
    assert_eq!(tree.unwind()?, Verdict::Safe);
    assert_eq!(tree.state(), &VerdictState::ProvedInfeasible);

    let refuted: Vec<VertexId> = tree
        .candidates()
        .iter()
        .filter(|c| matches!(c.outcome, CandidateOutcome::Infeasible { .. }))
        .map(|c| c.root)
        .collect();
    assert!(!refuted.is_empty());

    let labels = label_snapshot(&tree);
    let pairs = cover_snapshot(&tree);
    for root in refuted {
        let record = tree.resubmit(root)?;
        assert_eq!(
            record.outcome,
            CandidateOutcome::Infeasible { strengthened: 0 },
            "resubmitting {root}"
        );
    }
    assert_eq!(label_snapshot(&tree), labels);
    assert_eq!(cover_snapshot(&tree), pairs);
    Ok(())
}

#[test]
fn resubmitting_refuted_guards_changes_nothing() -> TestResult {
    assert_resubmission_is_a_no_op(contradictory_guards())
}

#[test]
fn resubmitting_refuted_loop_paths_changes_nothing() -> TestResult {
    assert_resubmission_is_a_no_op(counting_loop(Cond::lt(x(), int(0))))
}

#[test]
fn labels_stay_well_formed_after_refinement() -> TestResult {
    let program = Program::new().with_procedure(counting_loop(Cond::lt(x(), int(0))));
    let policy = leak_policy();
    let registry = InvocationRegistry::new();
    let mut tree = session(&program, &policy, &registry, UnwindOptions::default());
    tree.unwind()?;

    for vertex in tree.graph().vertices() {
        for name in vertex.label.free_vars() {
            assert!(
                name.ends_with(&format!("@{}", vertex.distance)),
                "label of {} mentions {name}",
                vertex.id
            );
        }
    }
    let graph = tree.graph();
    for (covered, coverer) in tree.cover().pairs() {
        assert_eq!(graph.unit_of(covered), graph.unit_of(coverer));
        assert!(!graph.in_subtree(covered, coverer), "{coverer} below {covered}");
    }
    Ok(())
}

#[test]
fn every_error_root_is_checked_or_covered_when_safe() -> TestResult {
    let program = Program::new().with_procedure(counting_loop(Cond::lt(x(), int(0))));
    let policy = leak_policy();
    let registry = InvocationRegistry::new();
    let mut tree = session(&program, &policy, &registry, UnwindOptions::default());
    assert_eq!(tree.unwind()?, Verdict::Safe);

    let checked: Vec<VertexId> = tree.candidates().iter().map(|c| c.root).collect();
    assert_eq!(tree.stats().candidates, checked.len());
    for root in tree.error_roots() {
        assert!(
            checked.contains(&root)
                || tree.cover().chain_covered(tree.graph(), root)
                || tree.graph().vertex(root).label.is_false(),
            "error root {root} was neither checked nor covered"
        );
    }
    Ok(())
}
