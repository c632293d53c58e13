use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Integer expression over program variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Var(String),
    Int(i64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn add(self, other: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn neg(self) -> Self {
        Expr::Neg(Box::new(self))
    }

    fn collect_vars<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Var(name) => {
                out.insert(name.as_str());
            }
            Expr::Int(_) => {}
            Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) | Expr::Mul(lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Expr::Neg(inner) => inner.collect_vars(out),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Add(lhs, rhs) => write!(f, "({lhs} + {rhs})"),
            Expr::Sub(lhs, rhs) => write!(f, "({lhs} - {rhs})"),
            Expr::Mul(lhs, rhs) => write!(f, "({lhs} * {rhs})"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::Ge => write!(f, ">="),
            CmpOp::Le => write!(f, "<="),
            CmpOp::Gt => write!(f, ">"),
            CmpOp::Lt => write!(f, "<"),
            CmpOp::Eq => write!(f, "=="),
            CmpOp::Ne => write!(f, "!="),
        }
    }
}

/// Branch condition. An `Assume` unit carries the condition of the branch
/// direction it sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cond {
    Bool(bool),
    Cmp { op: CmpOp, lhs: Expr, rhs: Expr },
    Not(Box<Cond>),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

impl Cond {
    pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Cond::Cmp { op, lhs, rhs }
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Cond::cmp(CmpOp::Gt, lhs, rhs)
    }

    pub fn ge(lhs: Expr, rhs: Expr) -> Self {
        Cond::cmp(CmpOp::Ge, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Cond::cmp(CmpOp::Lt, lhs, rhs)
    }

    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Cond::cmp(CmpOp::Le, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Cond::cmp(CmpOp::Eq, lhs, rhs)
    }

    pub fn negate(self) -> Self {
        Cond::Not(Box::new(self))
    }

    fn collect_vars<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Cond::Bool(_) => {}
            Cond::Cmp { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Cond::Not(inner) => inner.collect_vars(out),
            Cond::And(conds) | Cond::Or(conds) => {
                for cond in conds {
                    cond.collect_vars(out);
                }
            }
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Bool(b) => write!(f, "{b}"),
            Cond::Cmp { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Cond::Not(inner) => write!(f, "!({inner})"),
            Cond::And(conds) | Cond::Or(conds) => {
                if conds.is_empty() {
                    return write!(f, "{}", matches!(self, Cond::And(_)));
                }
                let sep = if matches!(self, Cond::And(_)) {
                    " && "
                } else {
                    " || "
                };
                let parts: Vec<String> = conds.iter().map(|c| format!("({c})")).collect();
                write!(f, "{}", parts.join(sep))
            }
        }
    }
}

/// One CFG unit's statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Nop,
    Assign {
        target: String,
        value: Expr,
    },
    /// Nondeterministic assignment (unknown input, unmodelled library value).
    Havoc {
        target: String,
    },
    Assume {
        cond: Cond,
    },
    /// Call by fully qualified signature, e.g. `<java.lang.Math: int max(int,int)>`.
    Invoke {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        method: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },
}

impl Statement {
    pub fn assign(target: impl Into<String>, value: Expr) -> Self {
        Statement::Assign {
            target: target.into(),
            value,
        }
    }

    pub fn havoc(target: impl Into<String>) -> Self {
        Statement::Havoc {
            target: target.into(),
        }
    }

    pub fn assume(cond: Cond) -> Self {
        Statement::Assume { cond }
    }

    pub fn invoke(method: impl Into<String>, args: Vec<Expr>) -> Self {
        Statement::Invoke {
            result: None,
            method: method.into(),
            args,
        }
    }

    pub fn invoke_into(
        result: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Expr>,
    ) -> Self {
        Statement::Invoke {
            result: Some(result.into()),
            method: method.into(),
            args,
        }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Statement::Return { value }
    }

    /// The variable this statement writes, if any.
    pub fn written_var(&self) -> Option<&str> {
        match self {
            Statement::Assign { target, .. } | Statement::Havoc { target } => Some(target.as_str()),
            Statement::Invoke {
                result: Some(target),
                ..
            } => Some(target.as_str()),
            _ => None,
        }
    }

    /// The called method signature, for `Invoke` units.
    pub fn invoked_method(&self) -> Option<&str> {
        match self {
            Statement::Invoke { method, .. } => Some(method.as_str()),
            _ => None,
        }
    }

    /// Every program variable read or written by this statement.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        match self {
            Statement::Nop | Statement::Return { value: None } => {}
            Statement::Assign { target, value } => {
                out.insert(target.as_str());
                value.collect_vars(&mut out);
            }
            Statement::Havoc { target } => {
                out.insert(target.as_str());
            }
            Statement::Assume { cond } => cond.collect_vars(&mut out),
            Statement::Invoke { result, args, .. } => {
                if let Some(target) = result {
                    out.insert(target.as_str());
                }
                for arg in args {
                    arg.collect_vars(&mut out);
                }
            }
            Statement::Return { value: Some(value) } => value.collect_vars(&mut out),
        }
        out
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Nop => write!(f, "nop"),
            Statement::Assign { target, value } => write!(f, "{target} = {value}"),
            Statement::Havoc { target } => write!(f, "{target} = *"),
            Statement::Assume { cond } => write!(f, "assume {cond}"),
            Statement::Invoke {
                result,
                method,
                args,
            } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                match result {
                    Some(target) => write!(f, "{target} = {method}({})", args.join(", ")),
                    None => write!(f, "{method}({})", args.join(", ")),
                }
            }
            Statement::Return { value: Some(value) } => write!(f, "return {value}"),
            Statement::Return { value: None } => write!(f, "return"),
        }
    }
}
