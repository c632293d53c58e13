//! Randomized checks over generated acyclic procedures: the unwinding
//! terminates within the size of the procedure and covering never changes
//! the verdict.

use std::env;

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, RngAlgorithm, RngSeed};
use unwind_engine::registry::InvocationRegistry;
use unwind_engine::result::{SessionReport, Verdict};
use unwind_engine::session::{verify, UnwindOptions};
use unwind_ir::cfg::{ControlFlowGraph, ProcedureGraph, Program};
use unwind_ir::policy::SignaturePolicy;
use unwind_ir::proptest_generators::{
    arb_acyclic_procedure, arb_straight_line_procedure, GENERATED_ERROR_METHOD,
};

fn property_cases() -> u32 {
    env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(32)
}

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: property_cases(),
        failure_persistence: None,
        rng_algorithm: RngAlgorithm::ChaCha,
        rng_seed: RngSeed::Fixed(0x0C0F_FEE5_u64),
        ..ProptestConfig::default()
    }
}

fn verify_generated(cfg: &ProcedureGraph, covering: bool) -> SessionReport {
    let signature = cfg.signature().to_string();
    let program = Program::new().with_procedure(cfg.clone());
    let policy = SignaturePolicy::new().error_method(GENERATED_ERROR_METHOD);
    let registry = InvocationRegistry::new();
    let options = UnwindOptions {
        covering,
        ..UnwindOptions::default()
    };
    verify(&program, &signature, &policy, &registry, options)
        .unwrap_or_else(|e| panic!("session failed on {cfg:?}: {e}"))
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn straight_line_unwinding_expands_each_unit_at_most_once(
        cfg in arb_straight_line_procedure()
    ) {
        let report = verify_generated(&cfg, true);
        prop_assert!(
            !matches!(report.verdict, Verdict::Unresolved { .. }),
            "unresolved on {:?}", cfg
        );
        prop_assert!(report.unwind.expansions <= cfg.unit_count());
    }

    #[test]
    fn acyclic_unwinding_is_bounded_by_the_longest_path(cfg in arb_acyclic_procedure()) {
        let report = verify_generated(&cfg, true);
        prop_assert!(
            matches!(report.verdict, Verdict::Safe | Verdict::Unsafe { .. }),
            "unresolved on {:?}", cfg
        );
        prop_assert!(report.unwind.max_distance <= cfg.unit_count());
    }

    #[test]
    fn covering_does_not_change_acyclic_verdicts(cfg in arb_acyclic_procedure()) {
        let with = verify_generated(&cfg, true);
        let without = verify_generated(&cfg, false);
        prop_assert_eq!(with.verdict.verdict_class(), without.verdict.verdict_class());
        prop_assert_eq!(without.stats.covered, 0);
    }

    #[test]
    fn covering_does_not_change_straight_line_witnesses(cfg in arb_straight_line_procedure()) {
        let with = verify_generated(&cfg, true);
        let without = verify_generated(&cfg, false);
        prop_assert_eq!(with.verdict.verdict_class(), without.verdict.verdict_class());
        let paths = (
            with.verdict.witness().map(|w| (w.units(), w.length())),
            without.verdict.witness().map(|w| (w.units(), w.length())),
        );
        prop_assert_eq!(paths.0, paths.1);
    }
}
