//! Proptest strategies for generating well-formed acyclic procedures.

use proptest::prelude::*;

use crate::cfg::{ProcedureBuilder, ProcedureGraph, UnitId};
use crate::statement::{CmpOp, Cond, Expr, Statement};

/// Signature of the error call planted in generated procedures.
pub const GENERATED_ERROR_METHOD: &str = "<generated.Policy: void error()>";

const VARS: [&str; 2] = ["x", "y"];

#[derive(Debug, Clone)]
enum Segment {
    Assign(usize, i64),
    Guard(usize, CmpOp, i64),
    /// `if (v op c) { v += a } else { v -= a }`
    Diamond(usize, CmpOp, i64, i64),
}

fn arb_cmp_op() -> impl Strategy<Value = CmpOp> {
    prop_oneof![
        Just(CmpOp::Ge),
        Just(CmpOp::Gt),
        Just(CmpOp::Le),
        Just(CmpOp::Lt),
        Just(CmpOp::Eq),
    ]
}

fn arb_segment(allow_diamonds: bool) -> BoxedStrategy<Segment> {
    let assign = (0..VARS.len(), -3i64..=3).prop_map(|(v, c)| Segment::Assign(v, c));
    let guard = (0..VARS.len(), arb_cmp_op(), -3i64..=3)
        .prop_map(|(v, op, c)| Segment::Guard(v, op, c));
    if allow_diamonds {
        let diamond = (0..VARS.len(), arb_cmp_op(), -3i64..=3, 1i64..=2)
            .prop_map(|(v, op, c, a)| Segment::Diamond(v, op, c, a));
        prop_oneof![assign, guard, diamond].boxed()
    } else {
        prop_oneof![assign, guard].boxed()
    }
}

/// Straight-line procedure: `x = 0; y = 0; <1..=6 segments>; error(); return`,
/// with the error call placed at a random segment boundary.
pub fn arb_straight_line_procedure() -> impl Strategy<Value = ProcedureGraph> {
    arb_procedure(false)
}

/// Acyclic procedure built from straight segments and if/else diamonds.
pub fn arb_acyclic_procedure() -> impl Strategy<Value = ProcedureGraph> {
    arb_procedure(true)
}

fn arb_procedure(allow_diamonds: bool) -> impl Strategy<Value = ProcedureGraph> {
    proptest::collection::vec(arb_segment(allow_diamonds), 1..=6)
        .prop_flat_map(|segments| {
            let len = segments.len();
            (Just(segments), 0..=len)
        })
        .prop_map(|(segments, error_at)| build_procedure(&segments, error_at))
}

fn link(b: &mut ProcedureBuilder, frontier: &mut Vec<UnitId>, unit: UnitId) {
    for prev in frontier.drain(..) {
        b.edge(prev, unit);
    }
    frontier.push(unit);
}

fn build_procedure(segments: &[Segment], error_at: usize) -> ProcedureGraph {
    let mut b = ProcedureGraph::builder("<generated.Main: void run()>");
    let mut frontier: Vec<UnitId> = Vec::new();

    for var in VARS {
        let unit = b.unit(Statement::assign(var, Expr::int(0)));
        link(&mut b, &mut frontier, unit);
    }
    for (idx, segment) in segments.iter().enumerate() {
        if idx == error_at {
            let unit = b.unit(Statement::invoke(GENERATED_ERROR_METHOD, vec![]));
            link(&mut b, &mut frontier, unit);
        }
        match *segment {
            Segment::Assign(v, c) => {
                let unit = b.unit(Statement::assign(
                    VARS[v],
                    Expr::var(VARS[v]).add(Expr::int(c)),
                ));
                link(&mut b, &mut frontier, unit);
            }
            Segment::Guard(v, op, c) => {
                let cond = Cond::cmp(op, Expr::var(VARS[v]), Expr::int(c));
                let unit = b.unit(Statement::assume(cond));
                link(&mut b, &mut frontier, unit);
            }
            Segment::Diamond(v, op, c, a) => {
                let cond = Cond::cmp(op, Expr::var(VARS[v]), Expr::int(c));
                let then_guard = b.unit(Statement::assume(cond.clone()));
                let else_guard = b.unit(Statement::assume(cond.negate()));
                let then_body = b.unit(Statement::assign(
                    VARS[v],
                    Expr::var(VARS[v]).add(Expr::int(a)),
                ));
                let else_body = b.unit(Statement::assign(
                    VARS[v],
                    Expr::var(VARS[v]).sub(Expr::int(a)),
                ));
                for prev in frontier.drain(..) {
                    b.edge(prev, then_guard);
                    b.edge(prev, else_guard);
                }
                b.edge(then_guard, then_body);
                b.edge(else_guard, else_body);
                frontier.push(then_body);
                frontier.push(else_body);
            }
        }
    }
    if error_at >= segments.len() {
        let unit = b.unit(Statement::invoke(GENERATED_ERROR_METHOD, vec![]));
        link(&mut b, &mut frontier, unit);
    }
    let exit = b.unit(Statement::ret(None));
    link(&mut b, &mut frontier, exit);

    // Only the generator's own edges are used, so construction cannot fail.
    match b.build() {
        Ok(graph) => graph,
        Err(err) => panic!("generated procedure is malformed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::ControlFlowGraph;
    use crate::policy::{SignaturePolicy, UnitClassifier};

    proptest! {
        #[test]
        fn generated_procedures_have_one_entry_one_exit_and_an_error(cfg in arb_acyclic_procedure()) {
            let entries: Vec<UnitId> = cfg
                .units()
                .into_iter()
                .filter(|&u| cfg.unexceptional_preds_of(u).is_empty())
                .collect();
            prop_assert_eq!(entries.len(), 1);
            prop_assert_eq!(cfg.tails().len(), 1);
            let policy = SignaturePolicy::new().error_method(GENERATED_ERROR_METHOD);
            prop_assert!(policy.has_error_unit(&cfg));
        }
    }
}
