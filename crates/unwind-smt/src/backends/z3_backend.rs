use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Sort mismatch for variable {0}")]
    SortMismatch(String),
}

pub struct Z3Solver {
    solver: z3::Solver,
    int_vars: HashMap<String, z3::ast::Int>,
    bool_vars: HashMap<String, z3::ast::Bool>,
    params: Option<z3::Params>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self {
            solver: z3::Solver::new(),
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            params: None,
        }
    }

    /// Solver whose individual checks give up after `timeout_secs`
    /// (reported as `SatResult::Unknown`). Zero disables the limit.
    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        if timeout_secs == 0 {
            return Self::new();
        }
        let solver = z3::Solver::new();
        let mut params = z3::Params::new();
        let timeout_ms = u32::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(u32::MAX);
        params.set_u32("timeout", timeout_ms);
        solver.set_params(&params);
        Self {
            solver,
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            params: Some(params),
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.params.is_some()
    }

    fn translate_term(&self, term: &SmtTerm) -> Result<Z3Term, Z3Error> {
        match term {
            SmtTerm::Var(name) => {
                if let Some(v) = self.int_vars.get(name) {
                    Ok(Z3Term::Int(v.clone()))
                } else if let Some(v) = self.bool_vars.get(name) {
                    Ok(Z3Term::Bool(v.clone()))
                } else {
                    Err(Z3Error::UnknownVariable(name.clone()))
                }
            }
            SmtTerm::IntLit(n) => Ok(Z3Term::Int(z3::ast::Int::from_i64(*n))),
            SmtTerm::BoolLit(b) => Ok(Z3Term::Bool(z3::ast::Bool::from_bool(*b))),
            SmtTerm::Add(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Int(&l + &r))
            }
            SmtTerm::Sub(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Int(&l - &r))
            }
            SmtTerm::Mul(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Int(&l * &r))
            }
            SmtTerm::Eq(lhs, rhs) => {
                let l = self.translate_term(lhs)?;
                let r = self.translate_term(rhs)?;
                match (l, r) {
                    (Z3Term::Int(li), Z3Term::Int(ri)) => Ok(Z3Term::Bool(li.eq(&ri))),
                    (Z3Term::Bool(lb), Z3Term::Bool(rb)) => Ok(Z3Term::Bool(lb.eq(&rb))),
                    _ => Err(Z3Error::SortMismatch(term.to_string())),
                }
            }
            SmtTerm::Lt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.lt(&r)))
            }
            SmtTerm::Le(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.le(&r)))
            }
            SmtTerm::Gt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.gt(&r)))
            }
            SmtTerm::Ge(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.ge(&r)))
            }
            SmtTerm::And(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::and(&refs)))
            }
            SmtTerm::Or(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::or(&refs)))
            }
            SmtTerm::Not(inner) => {
                let b = self.translate_term(inner)?.into_bool()?;
                Ok(Z3Term::Bool(b.not()))
            }
            SmtTerm::Implies(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_bool()?;
                let r = self.translate_term(rhs)?.into_bool()?;
                Ok(Z3Term::Bool(l.implies(&r)))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_term(cond)?.into_bool()?;
                let t = self.translate_term(then)?;
                let e = self.translate_term(els)?;
                match (t, e) {
                    (Z3Term::Int(ti), Z3Term::Int(ei)) => Ok(Z3Term::Int(c.ite(&ti, &ei))),
                    (Z3Term::Bool(tb), Z3Term::Bool(eb)) => Ok(Z3Term::Bool(c.ite(&tb, &eb))),
                    _ => Err(Z3Error::SortMismatch(term.to_string())),
                }
            }
        }
    }

    fn translate_bools(&self, terms: &[SmtTerm]) -> Result<Vec<z3::ast::Bool>, Z3Error> {
        terms
            .iter()
            .map(|t| self.translate_term(t).and_then(Z3Term::into_bool))
            .collect()
    }

    fn map_result(result: Z3SatResult) -> SatResult {
        match result {
            Z3SatResult::Sat => SatResult::Sat,
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => SatResult::Unknown("Z3 returned unknown".into()),
        }
    }
}

enum Z3Term {
    Int(z3::ast::Int),
    Bool(z3::ast::Bool),
}

impl Z3Term {
    fn into_int(self) -> Result<z3::ast::Int, Z3Error> {
        match self {
            Z3Term::Int(i) => Ok(i),
            Z3Term::Bool(_) => Err(Z3Error::Internal("Expected Int, got Bool".into())),
        }
    }

    fn into_bool(self) -> Result<z3::ast::Bool, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            Z3Term::Int(_) => Err(Z3Error::Internal("Expected Bool, got Int".into())),
        }
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        match sort {
            SmtSort::Int => {
                if self.bool_vars.contains_key(name) {
                    return Err(Z3Error::SortMismatch(name.to_string()));
                }
                let v = z3::ast::Int::new_const(name);
                self.int_vars.insert(name.to_string(), v);
            }
            SmtSort::Bool => {
                if self.int_vars.contains_key(name) {
                    return Err(Z3Error::SortMismatch(name.to_string()));
                }
                let v = z3::ast::Bool::new_const(name);
                self.bool_vars.insert(name.to_string(), v);
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let z3_term = self.translate_term(term)?.into_bool()?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        Ok(Self::map_result(self.solver.check()))
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => {
                let z3_model = self
                    .solver
                    .get_model()
                    .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
                let mut values = IndexMap::new();

                for &(name, sort) in var_names {
                    match sort {
                        SmtSort::Int => {
                            if let Some(v) = self.int_vars.get(name) {
                                if let Some(val) = z3_model.eval::<z3::ast::Int>(v, true) {
                                    if let Some(n) = val.as_i64() {
                                        values.insert(name.to_string(), ModelValue::Int(n));
                                    }
                                }
                            }
                        }
                        SmtSort::Bool => {
                            if let Some(v) = self.bool_vars.get(name) {
                                if let Some(val) = z3_model.eval::<z3::ast::Bool>(v, true) {
                                    if let Some(b) = val.as_bool() {
                                        values.insert(name.to_string(), ModelValue::Bool(b));
                                    }
                                }
                            }
                        }
                    }
                }

                Ok((SatResult::Sat, Some(Model { values })))
            }
            other => Ok((Self::map_result(other), None)),
        }
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply timeout if configured.
        if let Some(params) = &self.params {
            self.solver.set_params(params);
        }
        self.int_vars.clear();
        self.bool_vars.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn z3_versioned_path_is_unsat() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x@2", &SmtSort::Int)?;
        solver.declare_var("x@1", &SmtSort::Int)?;

        // x@2 > 0 && x@1 = x@2 && x@1 < 0
        let term = SmtTerm::and(vec![
            SmtTerm::var("x@2").gt(SmtTerm::int(0)),
            SmtTerm::var("x@1").eq(SmtTerm::var("x@2")),
            SmtTerm::var("x@1").lt(SmtTerm::int(0)),
        ]);
        solver.assert(&term)?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn z3_model_extraction_with_ite() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("a", &SmtSort::Int)?;
        solver.declare_var("b", &SmtSort::Int)?;
        solver.declare_var("m", &SmtSort::Int)?;
        solver.declare_var("err", &SmtSort::Bool)?;

        let max = SmtTerm::ite(
            SmtTerm::var("a").ge(SmtTerm::var("b")),
            SmtTerm::var("a"),
            SmtTerm::var("b"),
        );
        solver.assert(&SmtTerm::and(vec![
            SmtTerm::var("a").eq(SmtTerm::int(-4)),
            SmtTerm::var("b").eq(SmtTerm::int(9)),
            SmtTerm::var("m").eq(max),
            SmtTerm::var("err"),
        ]))?;

        let vars = vec![("m", &SmtSort::Int), ("err", &SmtSort::Bool)];
        let (result, model) = solver.check_sat_with_model(&vars)?;
        assert_eq!(result, SatResult::Sat);
        let model = model.ok_or_else(|| std::io::Error::other("expected model for SAT result"))?;
        assert_eq!(model.get_int("m"), Some(9));
        assert_eq!(model.get_bool("err"), Some(true));
        Ok(())
    }

    #[test]
    fn z3_push_pop_scopes_assertions() -> TestResult {
        let mut solver = Z3Solver::new();
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").gt(SmtTerm::int(0)))?;

        solver.push()?;
        solver.assert(&SmtTerm::var("x").lt(SmtTerm::int(0)))?;
        assert_eq!(solver.check_sat()?, SatResult::Unsat);
        solver.pop()?;

        assert_eq!(solver.check_sat()?, SatResult::Sat);
        Ok(())
    }

    #[test]
    fn z3_timeout_configuration_survives_reset() -> TestResult {
        let mut solver = Z3Solver::with_timeout_secs(2);
        assert!(solver.has_timeout());

        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(1)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);

        solver.reset()?;
        solver.declare_var("x", &SmtSort::Int)?;
        solver.assert(&SmtTerm::var("x").eq(SmtTerm::int(2)))?;
        assert_eq!(solver.check_sat()?, SatResult::Sat);
        assert!(solver.has_timeout());
        Ok(())
    }

    #[test]
    fn z3_rejects_undeclared_and_mismatched_variables() -> TestResult {
        let mut solver = Z3Solver::new();
        let err = solver
            .assert(&SmtTerm::var("ghost").gt(SmtTerm::int(0)))
            .expect_err("undeclared variable");
        assert!(matches!(err, Z3Error::UnknownVariable(name) if name == "ghost"));

        solver.declare_var("flag", &SmtSort::Bool)?;
        assert!(matches!(
            solver.declare_var("flag", &SmtSort::Int),
            Err(Z3Error::SortMismatch(_))
        ));
        assert!(solver.assert(&SmtTerm::var("flag").gt(SmtTerm::int(0))).is_err());
        Ok(())
    }
}
