#![allow(dead_code)]

use unwind_engine::registry::InvocationRegistry;
use unwind_engine::result::{SessionReport, Verdict};
use unwind_engine::session::{verify, ProgramTree, UnwindOptions};
use unwind_ir::cfg::{ControlFlowGraph, ProcedureGraph, Program, UnitId};
use unwind_ir::policy::SignaturePolicy;
use unwind_ir::statement::{Cond, Expr, Statement};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const LEAK: &str = "<demo.Log: void leak()>";
pub const RUN: &str = "<demo.Main: void run()>";

pub fn leak_policy() -> SignaturePolicy {
    SignaturePolicy::new().error_method(LEAK)
}

pub fn leak() -> Statement {
    Statement::invoke(LEAK, vec![])
}

pub fn x() -> Expr {
    Expr::var("x")
}

pub fn int(n: i64) -> Expr {
    Expr::int(n)
}

/// Units in order, each flowing into the next.
pub fn straight_line(statements: Vec<Statement>) -> ProcedureGraph {
    let mut b = ProcedureGraph::builder(RUN);
    let units: Vec<UnitId> = statements.into_iter().map(|s| b.unit(s)).collect();
    b.chain(&units);
    b.build().unwrap_or_else(|e| panic!("straight-line procedure: {e}"))
}

/// `branch; { leak() | nop }; return`, with no guard on either arm.
pub fn unconditional_branch() -> ProcedureGraph {
    let mut b = ProcedureGraph::builder(RUN);
    let branch = b.unit(Statement::Nop);
    let error = b.unit(leak());
    let other = b.unit(Statement::Nop);
    let exit = b.unit(Statement::ret(None));
    b.edge(branch, error)
        .edge(branch, other)
        .edge(error, exit)
        .edge(other, exit);
    b.build().unwrap_or_else(|e| panic!("branch procedure: {e}"))
}

/// `x = *; assume x > 0; assume x < 0; leak(); return`
pub fn contradictory_guards() -> ProcedureGraph {
    straight_line(vec![
        Statement::havoc("x"),
        Statement::assume(Cond::gt(x(), int(0))),
        Statement::assume(Cond::lt(x(), int(0))),
        leak(),
        Statement::ret(None),
    ])
}

/// `x = 0; while (*) { x = x + 1 }; assume x == target; leak(); return`
///
/// Units: 0 init, 1 body (self loop), 2 guard, 3 leak, 4 return. The loop
/// may run zero times (0 -> 2).
pub fn counting_loop(guard: Cond) -> ProcedureGraph {
    let mut b = ProcedureGraph::builder(RUN);
    let init = b.unit(Statement::assign("x", int(0)));
    let body = b.unit(Statement::assign("x", x().add(int(1))));
    let check = b.unit(Statement::assume(guard));
    let error = b.unit(leak());
    let exit = b.unit(Statement::ret(None));
    b.edge(init, body)
        .edge(body, body)
        .edge(init, check)
        .edge(body, check)
        .edge(check, error)
        .edge(error, exit);
    b.build().unwrap_or_else(|e| panic!("loop procedure: {e}"))
}

pub fn run(cfg: ProcedureGraph, options: UnwindOptions) -> SessionReport {
    let signature = cfg.signature().to_string();
    let program = Program::new().with_procedure(cfg);
    let registry = InvocationRegistry::new();
    verify(&program, &signature, &leak_policy(), &registry, options)
        .unwrap_or_else(|e| panic!("session failed: {e}"))
}

pub fn run_default(cfg: ProcedureGraph) -> SessionReport {
    run(cfg, UnwindOptions::default())
}

pub fn expect_unsafe(verdict: &Verdict) -> &unwind_engine::result::Witness {
    match verdict {
        Verdict::Unsafe { witness } => witness,
        other => panic!("expected unsafe, got {other:?}"),
    }
}

/// Session over `cfg` kept alive for inspection.
pub fn session<'a>(
    program: &'a Program,
    policy: &'a SignaturePolicy,
    registry: &InvocationRegistry,
    options: UnwindOptions,
) -> ProgramTree<'a> {
    ProgramTree::new(program, RUN, policy, registry, options)
        .unwrap_or_else(|e| panic!("session setup failed: {e}"))
}
