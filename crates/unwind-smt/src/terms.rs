use indexmap::{IndexMap, IndexSet};
use std::fmt;

use crate::backends::smtlib_printer::to_smtlib;

/// Abstract SMT term representation, solver-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(self, other: SmtTerm) -> Self {
        SmtTerm::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        SmtTerm::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(false))
    }

    /// Free variables in first-occurrence order.
    pub fn free_vars(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.collect_vars(&mut out);
        out
    }

    pub fn mentions(&self, name: &str) -> bool {
        match self {
            SmtTerm::Var(v) => v == name,
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => false,
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => l.mentions(name) || r.mentions(name),
            SmtTerm::And(ts) | SmtTerm::Or(ts) => ts.iter().any(|t| t.mentions(name)),
            SmtTerm::Not(inner) => inner.mentions(name),
            SmtTerm::Ite(c, t, e) => c.mentions(name) || t.mentions(name) || e.mentions(name),
        }
    }

    fn collect_vars(&self, out: &mut IndexSet<String>) {
        match self {
            SmtTerm::Var(v) => {
                out.insert(v.clone());
            }
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            SmtTerm::And(ts) | SmtTerm::Or(ts) => {
                for t in ts {
                    t.collect_vars(out);
                }
            }
            SmtTerm::Not(inner) => inner.collect_vars(out),
            SmtTerm::Ite(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
        }
    }

    /// Rebuild the term bottom-up, replacing every variable `v` for which
    /// `f(v)` returns a term.
    pub fn map_vars<F>(&self, f: &F) -> SmtTerm
    where
        F: Fn(&str) -> Option<SmtTerm>,
    {
        let bin = |l: &SmtTerm, r: &SmtTerm| (Box::new(l.map_vars(f)), Box::new(r.map_vars(f)));
        match self {
            SmtTerm::Var(v) => f(v).unwrap_or_else(|| self.clone()),
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => self.clone(),
            SmtTerm::Add(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Add(l, r)
            }
            SmtTerm::Sub(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Sub(l, r)
            }
            SmtTerm::Mul(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Mul(l, r)
            }
            SmtTerm::Eq(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Eq(l, r)
            }
            SmtTerm::Lt(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Lt(l, r)
            }
            SmtTerm::Le(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Le(l, r)
            }
            SmtTerm::Gt(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Gt(l, r)
            }
            SmtTerm::Ge(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Ge(l, r)
            }
            SmtTerm::Implies(l, r) => {
                let (l, r) = bin(l, r);
                SmtTerm::Implies(l, r)
            }
            SmtTerm::And(ts) => SmtTerm::And(ts.iter().map(|t| t.map_vars(f)).collect()),
            SmtTerm::Or(ts) => SmtTerm::Or(ts.iter().map(|t| t.map_vars(f)).collect()),
            SmtTerm::Not(inner) => SmtTerm::Not(Box::new(inner.map_vars(f))),
            SmtTerm::Ite(c, t, e) => SmtTerm::Ite(
                Box::new(c.map_vars(f)),
                Box::new(t.map_vars(f)),
                Box::new(e.map_vars(f)),
            ),
        }
    }

    /// Simultaneous substitution of variables by terms.
    pub fn substitute(&self, subst: &IndexMap<String, SmtTerm>) -> SmtTerm {
        if subst.is_empty() {
            return self.clone();
        }
        self.map_vars(&|name| subst.get(name).cloned())
    }

    /// Rename variables; names for which `f` returns `None` are kept.
    pub fn rename<F>(&self, f: F) -> SmtTerm
    where
        F: Fn(&str) -> Option<String>,
    {
        self.map_vars(&|name| f(name).map(SmtTerm::Var))
    }

    /// Flatten nested conjunctions into a list of conjuncts.
    pub fn conjuncts(self) -> Vec<SmtTerm> {
        let mut out = Vec::new();
        self.push_conjuncts(&mut out);
        out
    }

    fn push_conjuncts(self, out: &mut Vec<SmtTerm>) {
        match self {
            SmtTerm::And(ts) => {
                for t in ts {
                    t.push_conjuncts(out);
                }
            }
            SmtTerm::BoolLit(true) => {}
            other => out.push(other),
        }
    }

    /// Constant folding and Boolean flattening. The result is equivalent to
    /// the input; literals `true`/`false` only survive at the top level.
    pub fn simplify(&self) -> SmtTerm {
        match self {
            SmtTerm::Var(_) | SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => self.clone(),
            SmtTerm::Add(l, r) => match (l.simplify(), r.simplify()) {
                (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => {
                    fold_int(a.checked_add(b), SmtTerm::IntLit(a).add(SmtTerm::IntLit(b)))
                }
                (SmtTerm::IntLit(0), t) | (t, SmtTerm::IntLit(0)) => t,
                (l, r) => l.add(r),
            },
            SmtTerm::Sub(l, r) => match (l.simplify(), r.simplify()) {
                (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => {
                    fold_int(a.checked_sub(b), SmtTerm::IntLit(a).sub(SmtTerm::IntLit(b)))
                }
                (t, SmtTerm::IntLit(0)) => t,
                (l, r) => l.sub(r),
            },
            SmtTerm::Mul(l, r) => match (l.simplify(), r.simplify()) {
                (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => {
                    fold_int(a.checked_mul(b), SmtTerm::IntLit(a).mul(SmtTerm::IntLit(b)))
                }
                (SmtTerm::IntLit(0), _) | (_, SmtTerm::IntLit(0)) => SmtTerm::IntLit(0),
                (SmtTerm::IntLit(1), t) | (t, SmtTerm::IntLit(1)) => t,
                (l, r) => l.mul(r),
            },
            SmtTerm::Eq(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (&l, &r) {
                    (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => SmtTerm::BoolLit(a == b),
                    (SmtTerm::BoolLit(a), SmtTerm::BoolLit(b)) => SmtTerm::BoolLit(a == b),
                    (SmtTerm::BoolLit(true), t) | (t, SmtTerm::BoolLit(true)) if t.is_boolean() => {
                        t.clone()
                    }
                    (SmtTerm::BoolLit(false), t) | (t, SmtTerm::BoolLit(false)) if t.is_boolean() => {
                        t.clone().not().simplify()
                    }
                    _ if l == r => SmtTerm::BoolLit(true),
                    _ => l.eq(r),
                }
            }
            SmtTerm::Lt(l, r) => fold_cmp(l, r, |a, b| a < b, SmtTerm::lt),
            SmtTerm::Le(l, r) => fold_cmp(l, r, |a, b| a <= b, SmtTerm::le),
            SmtTerm::Gt(l, r) => fold_cmp(l, r, |a, b| a > b, SmtTerm::gt),
            SmtTerm::Ge(l, r) => fold_cmp(l, r, |a, b| a >= b, SmtTerm::ge),
            SmtTerm::And(ts) => {
                let mut out: Vec<SmtTerm> = Vec::with_capacity(ts.len());
                for t in ts {
                    match t.simplify() {
                        SmtTerm::BoolLit(true) => {}
                        SmtTerm::BoolLit(false) => return SmtTerm::BoolLit(false),
                        SmtTerm::And(inner) => {
                            for i in inner {
                                if !out.contains(&i) {
                                    out.push(i);
                                }
                            }
                        }
                        other => {
                            if !out.contains(&other) {
                                out.push(other);
                            }
                        }
                    }
                }
                match out.len() {
                    0 => SmtTerm::BoolLit(true),
                    1 => out.pop().unwrap_or(SmtTerm::BoolLit(true)),
                    _ => SmtTerm::And(out),
                }
            }
            SmtTerm::Or(ts) => {
                let mut out: Vec<SmtTerm> = Vec::with_capacity(ts.len());
                for t in ts {
                    match t.simplify() {
                        SmtTerm::BoolLit(false) => {}
                        SmtTerm::BoolLit(true) => return SmtTerm::BoolLit(true),
                        SmtTerm::Or(inner) => {
                            for i in inner {
                                if !out.contains(&i) {
                                    out.push(i);
                                }
                            }
                        }
                        other => {
                            if !out.contains(&other) {
                                out.push(other);
                            }
                        }
                    }
                }
                match out.len() {
                    0 => SmtTerm::BoolLit(false),
                    1 => out.pop().unwrap_or(SmtTerm::BoolLit(false)),
                    _ => SmtTerm::Or(out),
                }
            }
            SmtTerm::Not(inner) => match inner.simplify() {
                SmtTerm::BoolLit(b) => SmtTerm::BoolLit(!b),
                SmtTerm::Not(t) => *t,
                t => t.not(),
            },
            SmtTerm::Implies(l, r) => match (l.simplify(), r.simplify()) {
                (SmtTerm::BoolLit(false), _) | (_, SmtTerm::BoolLit(true)) => {
                    SmtTerm::BoolLit(true)
                }
                (SmtTerm::BoolLit(true), t) => t,
                (t, SmtTerm::BoolLit(false)) => t.not().simplify(),
                (l, r) => l.implies(r),
            },
            SmtTerm::Ite(c, t, e) => match c.simplify() {
                SmtTerm::BoolLit(true) => t.simplify(),
                SmtTerm::BoolLit(false) => e.simplify(),
                c => {
                    let (t, e) = (t.simplify(), e.simplify());
                    if t == e {
                        t
                    } else {
                        SmtTerm::ite(c, t, e)
                    }
                }
            },
        }
    }

    /// Whether the term is syntactically Boolean-valued. Variables are
    /// unknown and report `false`.
    fn is_boolean(&self) -> bool {
        matches!(
            self,
            SmtTerm::BoolLit(_)
                | SmtTerm::Eq(..)
                | SmtTerm::Lt(..)
                | SmtTerm::Le(..)
                | SmtTerm::Gt(..)
                | SmtTerm::Ge(..)
                | SmtTerm::And(_)
                | SmtTerm::Or(_)
                | SmtTerm::Not(_)
                | SmtTerm::Implies(..)
        )
    }
}

fn fold_int(value: Option<i64>, overflowed: SmtTerm) -> SmtTerm {
    value.map(SmtTerm::IntLit).unwrap_or(overflowed)
}

fn fold_cmp(
    l: &SmtTerm,
    r: &SmtTerm,
    op: fn(i64, i64) -> bool,
    build: fn(SmtTerm, SmtTerm) -> SmtTerm,
) -> SmtTerm {
    match (l.simplify(), r.simplify()) {
        (SmtTerm::IntLit(a), SmtTerm::IntLit(b)) => SmtTerm::BoolLit(op(a, b)),
        (l, r) => build(l, r),
    }
}

impl fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_smtlib(self))
    }
}
