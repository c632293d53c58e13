//! Path encoding: turns a head-to-return path of the unwinding graph into a
//! sequence of SMT partitions.
//!
//! Program variable `x` in the state at a vertex of distance `d` is the
//! constant `x@d`. The statement executed at distance `d` reads `@d` and
//! writes `@(d-1)`; variables it does not write are framed. A Boolean
//! error flag records whether an error unit has executed.

use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use unwind_ir::cfg::{ControlFlowGraph, UnitId};
use unwind_ir::statement::{CmpOp, Cond, Expr, Statement};
use unwind_smt::oracle::Vocabulary;
use unwind_smt::sorts::SmtSort;
use unwind_smt::terms::SmtTerm;

use crate::graph::{UnwindingGraph, VertexId};

/// Name of the error flag. The leading underscores keep it apart from
/// program locals.
pub const ERROR_FLAG: &str = "__err";

pub const MATH_MAX_INT: &str = "<java.lang.Math: int max(int,int)>";
pub const MATH_MIN_INT: &str = "<java.lang.Math: int min(int,int)>";
pub const MATH_MAX_LONG: &str = "<java.lang.Math: long max(long,long)>";
pub const MATH_MIN_LONG: &str = "<java.lang.Math: long min(long,long)>";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unit {0} has no statement")]
    MissingStatement(UnitId),
    #[error("vertex {0} has no outgoing edge")]
    Detached(VertexId),
    #[error("intrinsic {method} expects {expected} arguments, got {found}")]
    Arity {
        method: String,
        expected: usize,
        found: usize,
    },
    #[error("program variable `{0}` clashes with the error flag")]
    ReservedName(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Versioned constant name for `name` at `distance`.
pub fn versioned(name: &str, distance: usize) -> String {
    format!("{name}@{distance}")
}

/// The error flag at `distance`.
pub fn error_flag(distance: usize) -> String {
    versioned(ERROR_FLAG, distance)
}

/// Split `x@d` into `("x", d)`.
pub fn split_versioned(name: &str) -> Option<(&str, usize)> {
    let (base, distance) = name.rsplit_once('@')?;
    distance.parse().ok().map(|d| (base, d))
}

/// Rename every `x@from` in `term` to `x@to`; other symbols are kept.
pub fn shift_distance(term: &SmtTerm, from: usize, to: usize) -> SmtTerm {
    if from == to {
        return term.clone();
    }
    term.rename(|name| match split_versioned(name) {
        Some((base, d)) if d == from => Some(versioned(base, to)),
        _ => None,
    })
}

/// One backward step: the statement at `distance` reads `@distance` and
/// writes `@(distance - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub distance: usize,
}

impl Step {
    pub fn new(distance: usize) -> Self {
        Self { distance }
    }

    /// `name` as read by the statement.
    pub fn pre(&self, name: &str) -> SmtTerm {
        SmtTerm::var(versioned(name, self.distance))
    }

    /// `name` as written by the statement.
    pub fn post(&self, name: &str) -> SmtTerm {
        SmtTerm::var(versioned(name, self.distance.saturating_sub(1)))
    }

    pub fn expr(&self, expr: &Expr) -> SmtTerm {
        match expr {
            Expr::Var(name) => self.pre(name),
            Expr::Int(n) => SmtTerm::int(*n),
            Expr::Add(l, r) => self.expr(l).add(self.expr(r)),
            Expr::Sub(l, r) => self.expr(l).sub(self.expr(r)),
            Expr::Mul(l, r) => self.expr(l).mul(self.expr(r)),
            Expr::Neg(inner) => SmtTerm::int(0).sub(self.expr(inner)),
        }
    }

    pub fn cond(&self, cond: &Cond) -> SmtTerm {
        match cond {
            Cond::Bool(b) => SmtTerm::bool(*b),
            Cond::Cmp { op, lhs, rhs } => {
                let (l, r) = (self.expr(lhs), self.expr(rhs));
                match op {
                    CmpOp::Ge => l.ge(r),
                    CmpOp::Le => l.le(r),
                    CmpOp::Gt => l.gt(r),
                    CmpOp::Lt => l.lt(r),
                    CmpOp::Eq => l.eq(r),
                    CmpOp::Ne => l.eq(r).not(),
                }
            }
            Cond::Not(inner) => self.cond(inner).not(),
            Cond::And(cs) => SmtTerm::and(cs.iter().map(|c| self.cond(c)).collect()),
            Cond::Or(cs) => SmtTerm::or(cs.iter().map(|c| self.cond(c)).collect()),
        }
    }
}

/// Encodes the effect of one statement. Frame conditions for variables the
/// statement does not write, and the error flag, are added by
/// [`PathEncoder`].
pub trait StatementTranslator {
    fn translate(&self, statement: &Statement, step: Step) -> Result<SmtTerm, EncodeError>;
}

/// Integer semantics for the statement language. Calls that are not
/// intrinsics are opaque: their result is left unconstrained.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTranslator;

impl StatementTranslator for LinearTranslator {
    fn translate(&self, statement: &Statement, step: Step) -> Result<SmtTerm, EncodeError> {
        Ok(match statement {
            Statement::Assign { target, value } => step.post(target).eq(step.expr(value)),
            Statement::Assume { cond } => step.cond(cond),
            Statement::Nop
            | Statement::Havoc { .. }
            | Statement::Invoke { .. }
            | Statement::Return { .. } => SmtTerm::bool(true),
        })
    }
}

pub type CustomIntrinsic =
    Arc<dyn Fn(&[SmtTerm]) -> Result<SmtTerm, EncodeError> + Send + Sync>;

/// Exact encoding of a library call's result.
#[derive(Clone)]
pub enum IntrinsicRule {
    /// `ite(a >= b, a, b)`
    Max,
    /// `ite(a <= b, a, b)`
    Min,
    Custom(CustomIntrinsic),
}

impl fmt::Debug for IntrinsicRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntrinsicRule::Max => write!(f, "Max"),
            IntrinsicRule::Min => write!(f, "Min"),
            IntrinsicRule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl IntrinsicRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[SmtTerm]) -> Result<SmtTerm, EncodeError> + Send + Sync + 'static,
    {
        IntrinsicRule::Custom(Arc::new(f))
    }

    /// The call's result in terms of its (already versioned) arguments.
    pub fn apply(&self, method: &str, args: &[SmtTerm]) -> Result<SmtTerm, EncodeError> {
        match self {
            IntrinsicRule::Max | IntrinsicRule::Min => {
                let [a, b] = args else {
                    return Err(EncodeError::Arity {
                        method: method.to_string(),
                        expected: 2,
                        found: args.len(),
                    });
                };
                let cond = if matches!(self, IntrinsicRule::Max) {
                    a.clone().ge(b.clone())
                } else {
                    a.clone().le(b.clone())
                };
                Ok(SmtTerm::ite(cond, a.clone(), b.clone()))
            }
            IntrinsicRule::Custom(f) => f(args),
        }
    }
}

/// Intrinsics by fully qualified method signature.
#[derive(Debug, Clone, Default)]
pub struct IntrinsicTable {
    rules: IndexMap<String, IntrinsicRule>,
}

impl IntrinsicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Math.max`/`Math.min` over `int` and `long`.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table
            .register(MATH_MAX_INT, IntrinsicRule::Max)
            .register(MATH_MIN_INT, IntrinsicRule::Min)
            .register(MATH_MAX_LONG, IntrinsicRule::Max)
            .register(MATH_MIN_LONG, IntrinsicRule::Min);
        table
    }

    pub fn register(&mut self, signature: impl Into<String>, rule: IntrinsicRule) -> &mut Self {
        self.rules.insert(signature.into(), rule);
        self
    }

    pub fn get(&self, signature: &str) -> Option<&IntrinsicRule> {
        self.rules.get(signature)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Partitions of one candidate path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEncoding {
    /// Head first, return vertex last. Cut `k` of the partitions lies at
    /// `vertices[k - 1]`.
    pub vertices: Vec<VertexId>,
    /// `[¬err@n, T(v_n), …, T(v_1), err@0]`
    pub partitions: Vec<SmtTerm>,
}

impl PathEncoding {
    pub fn formula(&self) -> SmtTerm {
        SmtTerm::and(self.partitions.clone())
    }

    pub fn head(&self) -> Option<VertexId> {
        self.vertices.first().copied()
    }
}

/// Encoder for one procedure: knows its variables, the statement
/// translator, and the intrinsic table.
pub struct PathEncoder {
    variables: IndexSet<String>,
    translator: Box<dyn StatementTranslator>,
    intrinsics: IntrinsicTable,
}

impl fmt::Debug for PathEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEncoder")
            .field("variables", &self.variables)
            .field("intrinsics", &self.intrinsics)
            .finish_non_exhaustive()
    }
}

impl PathEncoder {
    pub fn new<I, S>(variables: I) -> Result<Self, EncodeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variables: IndexSet<String> = variables.into_iter().map(Into::into).collect();
        if let Some(clash) = variables.iter().find(|v| v.as_str() == ERROR_FLAG) {
            return Err(EncodeError::ReservedName(clash.clone()));
        }
        Ok(Self {
            variables,
            translator: Box::new(LinearTranslator),
            intrinsics: IntrinsicTable::with_defaults(),
        })
    }

    /// Encoder over every variable mentioned by a unit of `cfg`.
    pub fn for_cfg(cfg: &dyn ControlFlowGraph) -> Result<Self, EncodeError> {
        let mut variables: IndexSet<String> = IndexSet::new();
        for unit in cfg.units() {
            let statement = cfg
                .statement(unit)
                .ok_or(EncodeError::MissingStatement(unit))?;
            variables.extend(statement.variables().into_iter().map(str::to_string));
        }
        Self::new(variables)
    }

    pub fn with_translator(mut self, translator: impl StatementTranslator + 'static) -> Self {
        self.translator = Box::new(translator);
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: IntrinsicTable) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn intrinsics_mut(&mut self) -> &mut IntrinsicTable {
        &mut self.intrinsics
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(String::as_str)
    }

    /// Declare the state at `distance` (program variables and error flag).
    pub fn declare_state(&self, vocabulary: &mut Vocabulary, distance: usize) {
        for name in &self.variables {
            vocabulary.declare(versioned(name, distance), SmtSort::Int);
        }
        vocabulary.declare(error_flag(distance), SmtSort::Bool);
    }

    /// Program variable symbols of the state at `distance`.
    pub fn state_symbols(&self, distance: usize) -> Vec<String> {
        self.variables
            .iter()
            .map(|name| versioned(name, distance))
            .collect()
    }

    /// Transition constraint of `statement` executed at `distance`.
    pub fn transition(
        &self,
        statement: &Statement,
        distance: usize,
        is_error: bool,
    ) -> Result<SmtTerm, EncodeError> {
        let step = Step::new(distance);
        let effect = match statement {
            Statement::Invoke {
                result,
                method,
                args,
            } => match self.intrinsics.get(method) {
                Some(rule) => {
                    let args: Vec<SmtTerm> = args.iter().map(|a| step.expr(a)).collect();
                    let value = rule.apply(method, &args)?;
                    match result {
                        Some(target) => step.post(target).eq(value),
                        None => SmtTerm::bool(true),
                    }
                }
                None => self.translator.translate(statement, step)?,
            },
            _ => self.translator.translate(statement, step)?,
        };

        let written = statement.written_var();
        let mut conjuncts = vec![effect];
        for name in &self.variables {
            if written != Some(name.as_str()) {
                conjuncts.push(step.post(name).eq(step.pre(name)));
            }
        }
        let flag_after = step.post(ERROR_FLAG);
        conjuncts.push(if is_error {
            flag_after
        } else {
            flag_after.eq(step.pre(ERROR_FLAG))
        });
        Ok(SmtTerm::and(conjuncts))
    }

    /// Encode the path from `head` to the return vertex.
    pub fn encode_path(
        &self,
        graph: &UnwindingGraph,
        cfg: &dyn ControlFlowGraph,
        head: VertexId,
    ) -> Result<PathEncoding, EncodeError> {
        let vertices = graph.path_to_root(head);
        let n = graph.vertex(head).distance;
        let mut partitions = Vec::with_capacity(vertices.len() + 1);
        partitions.push(SmtTerm::var(error_flag(n)).not());
        for &v in &vertices[..vertices.len() - 1] {
            let edge = graph
                .vertex(v)
                .outgoing
                .map(|e| graph.edge(e))
                .ok_or(EncodeError::Detached(v))?;
            let statement = cfg
                .statement(edge.unit)
                .ok_or(EncodeError::MissingStatement(edge.unit))?;
            partitions.push(self.transition(statement, graph.vertex(v).distance, edge.class.error)?);
        }
        partitions.push(SmtTerm::var(error_flag(0)));
        Ok(PathEncoding {
            vertices,
            partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> PathEncoder {
        PathEncoder::new(["x", "y"]).expect("no reserved names")
    }

    #[test]
    fn versioned_names_round_trip() {
        assert_eq!(versioned("x", 3), "x@3");
        assert_eq!(split_versioned("x@3"), Some(("x", 3)));
        assert_eq!(split_versioned("a@b@12"), Some(("a@b", 12)));
        assert_eq!(split_versioned("plain"), None);
        assert_eq!(error_flag(0), "__err@0");
    }

    #[test]
    fn shift_only_touches_the_source_distance() {
        let term = SmtTerm::var("x@2").gt(SmtTerm::var("y@1"));
        let shifted = shift_distance(&term, 2, 5);
        assert_eq!(shifted, SmtTerm::var("x@5").gt(SmtTerm::var("y@1")));
    }

    #[test]
    fn assignment_reads_current_and_writes_previous_version() {
        let stmt = Statement::assign("x", Expr::var("y").add(Expr::int(1)));
        let t = encoder().transition(&stmt, 4, false).expect("encodes");
        let expected = SmtTerm::and(vec![
            SmtTerm::var("x@3").eq(SmtTerm::var("y@4").add(SmtTerm::int(1))),
            SmtTerm::var("y@3").eq(SmtTerm::var("y@4")),
            SmtTerm::var("__err@3").eq(SmtTerm::var("__err@4")),
        ]);
        assert_eq!(t, expected);
    }

    #[test]
    fn havoc_leaves_target_unframed_and_error_sets_flag() {
        let t = encoder()
            .transition(&Statement::havoc("y"), 2, true)
            .expect("encodes");
        let vars = t.free_vars();
        assert!(vars.contains("x@1"));
        assert!(!vars.contains("y@1"));
        assert!(t.clone().conjuncts().contains(&SmtTerm::var("__err@1")));
    }

    #[test]
    fn max_intrinsic_becomes_ite() {
        let stmt = Statement::invoke_into("x", MATH_MAX_INT, vec![Expr::var("x"), Expr::var("y")]);
        let t = encoder().transition(&stmt, 1, false).expect("encodes");
        let first = t.conjuncts().remove(0);
        let (a, b) = (SmtTerm::var("x@1"), SmtTerm::var("y@1"));
        assert_eq!(
            first,
            SmtTerm::var("x@0").eq(SmtTerm::ite(a.clone().ge(b.clone()), a, b))
        );
    }

    #[test]
    fn intrinsic_arity_is_checked() {
        let stmt = Statement::invoke_into("x", MATH_MIN_LONG, vec![Expr::var("x")]);
        let err = encoder().transition(&stmt, 1, false).expect_err("one argument");
        assert!(matches!(err, EncodeError::Arity { expected: 2, found: 1, .. }));
    }

    #[test]
    fn custom_intrinsics_and_opaque_calls() {
        let mut enc = encoder();
        enc.intrinsics_mut().register(
            "<demo.Util: int abs(int)>",
            IntrinsicRule::custom(|args| match args {
                [a] => Ok(SmtTerm::ite(
                    a.clone().ge(SmtTerm::int(0)),
                    a.clone(),
                    SmtTerm::int(0).sub(a.clone()),
                )),
                _ => Err(EncodeError::Unsupported("abs takes one argument".into())),
            }),
        );
        let abs = Statement::invoke_into("y", "<demo.Util: int abs(int)>", vec![Expr::var("x")]);
        assert!(enc.transition(&abs, 1, false).expect("encodes").mentions("y@0"));

        let opaque = Statement::invoke_into("y", "<demo.Io: int read()>", vec![]);
        let t = enc.transition(&opaque, 1, false).expect("encodes");
        assert!(!t.mentions("y@0"), "opaque calls havoc their result");
    }

    #[test]
    fn error_flag_name_is_reserved() {
        let err = PathEncoder::new([ERROR_FLAG]).expect_err("reserved");
        assert!(matches!(err, EncodeError::ReservedName(_)));
    }
}
