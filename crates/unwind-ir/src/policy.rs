//! Unit classification: which statements are error, source, or sink units.
//!
//! This is where a leak/vulnerability policy plugs into the verifier
//! without touching the unwinding core.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::cfg::{ControlFlowGraph, UnitId};
use crate::statement::Statement;

/// Classification flags of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitClass {
    pub error: bool,
    pub source: bool,
    pub sink: bool,
}

pub trait UnitClassifier {
    fn is_error_unit(&self, statement: &Statement) -> bool;

    fn classify(&self, unit: UnitId, cfg: &dyn ControlFlowGraph) -> UnitClass;

    /// Whether any unit of `cfg` is an error unit.
    fn has_error_unit(&self, cfg: &dyn ControlFlowGraph) -> bool {
        cfg.units().into_iter().any(|unit| {
            cfg.statement(unit)
                .map(|stmt| self.is_error_unit(stmt))
                .unwrap_or(false)
        })
    }
}

/// Classifies `Invoke` units by the called method's signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePolicy {
    #[serde(default)]
    pub error_methods: IndexSet<String>,
    #[serde(default)]
    pub source_methods: IndexSet<String>,
    #[serde(default)]
    pub sink_methods: IndexSet<String>,
}

impl SignaturePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_method(mut self, signature: impl Into<String>) -> Self {
        self.error_methods.insert(signature.into());
        self
    }

    pub fn source_method(mut self, signature: impl Into<String>) -> Self {
        self.source_methods.insert(signature.into());
        self
    }

    pub fn sink_method(mut self, signature: impl Into<String>) -> Self {
        self.sink_methods.insert(signature.into());
        self
    }
}

impl UnitClassifier for SignaturePolicy {
    fn is_error_unit(&self, statement: &Statement) -> bool {
        statement
            .invoked_method()
            .is_some_and(|method| self.error_methods.contains(method))
    }

    fn classify(&self, unit: UnitId, cfg: &dyn ControlFlowGraph) -> UnitClass {
        let Some(statement) = cfg.statement(unit) else {
            return UnitClass::default();
        };
        let method = statement.invoked_method();
        UnitClass {
            error: self.is_error_unit(statement),
            source: method.is_some_and(|m| self.source_methods.contains(m)),
            sink: method.is_some_and(|m| self.sink_methods.contains(m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::ProcedureGraph;
    use crate::statement::Expr;

    const LEAK: &str = "<android.util.Log: int i(java.lang.String,java.lang.String)>";
    const IMEI: &str = "<android.telephony.TelephonyManager: java.lang.String getDeviceId()>";

    #[test]
    fn classifies_by_invoked_signature() {
        let policy = SignaturePolicy::new()
            .error_method(LEAK)
            .sink_method(LEAK)
            .source_method(IMEI);

        let mut b = ProcedureGraph::builder("<a.B: void onCreate(android.os.Bundle)>");
        let src = b.unit(Statement::invoke_into("id", IMEI, vec![]));
        let leak = b.unit(Statement::invoke(LEAK, vec![Expr::var("id")]));
        let exit = b.unit(Statement::ret(None));
        b.chain(&[src, leak, exit]);
        let cfg = b.build().expect("well formed");

        assert_eq!(
            policy.classify(src, &cfg),
            UnitClass {
                error: false,
                source: true,
                sink: false
            }
        );
        assert_eq!(
            policy.classify(leak, &cfg),
            UnitClass {
                error: true,
                source: false,
                sink: true
            }
        );
        assert_eq!(policy.classify(exit, &cfg), UnitClass::default());
        assert!(policy.has_error_unit(&cfg));
        assert!(!SignaturePolicy::new().has_error_unit(&cfg));
    }
}
