//! Control-flow graph provider.
//!
//! The engine only ever talks to [`ControlFlowGraph`]; [`ProcedureGraph`] is
//! the in-tree implementation, loadable from JSON and built by hand in tests.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::statement::Statement;

/// Opaque handle of one CFG unit (statement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CfgError {
    #[error("duplicate unit id {0}")]
    DuplicateUnit(UnitId),
    #[error("edge {from} -> {to} references an unknown unit")]
    UnknownUnit { from: UnitId, to: UnitId },
    #[error("procedure {0} has no units")]
    Empty(String),
}

/// An exceptional-aware control-flow graph of one procedure.
pub trait ControlFlowGraph {
    /// Fully qualified signature of the procedure.
    fn signature(&self) -> &str;

    /// All units, in declaration order.
    fn units(&self) -> Vec<UnitId>;

    fn statement(&self, unit: UnitId) -> Option<&Statement>;

    /// Units without normal successors (return points).
    fn tails(&self) -> Vec<UnitId>;

    /// Direct predecessors, exception-handler edges included.
    fn preds_of(&self, unit: UnitId) -> &[UnitId];

    /// Predecessors over normal control flow only. A unit with none of these
    /// is a procedure entry.
    fn unexceptional_preds_of(&self, unit: UnitId) -> &[UnitId];
}

/// One statement with its CFG handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub statement: Statement,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.statement)
    }
}

/// Serialized form of a procedure; validated into [`ProcedureGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawProcedure {
    signature: String,
    units: Vec<Unit>,
    #[serde(default)]
    edges: Vec<(UnitId, UnitId)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exceptional_edges: Vec<(UnitId, UnitId)>,
}

/// Concrete CFG of one procedure with predecessor indices built up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawProcedure", into = "RawProcedure")]
pub struct ProcedureGraph {
    signature: String,
    units: IndexMap<UnitId, Statement>,
    edges: Vec<(UnitId, UnitId)>,
    exceptional_edges: Vec<(UnitId, UnitId)>,
    preds: IndexMap<UnitId, Vec<UnitId>>,
    normal_preds: IndexMap<UnitId, Vec<UnitId>>,
    tails: Vec<UnitId>,
}

impl ProcedureGraph {
    pub fn builder(signature: impl Into<String>) -> ProcedureBuilder {
        ProcedureBuilder {
            signature: signature.into(),
            units: Vec::new(),
            edges: Vec::new(),
            exceptional_edges: Vec::new(),
        }
    }

    pub fn new(
        signature: impl Into<String>,
        units: Vec<Unit>,
        edges: Vec<(UnitId, UnitId)>,
        exceptional_edges: Vec<(UnitId, UnitId)>,
    ) -> Result<Self, CfgError> {
        let signature = signature.into();
        if units.is_empty() {
            return Err(CfgError::Empty(signature));
        }
        let mut unit_map = IndexMap::with_capacity(units.len());
        for unit in units {
            if unit_map.insert(unit.id, unit.statement).is_some() {
                return Err(CfgError::DuplicateUnit(unit.id));
            }
        }
        for &(from, to) in edges.iter().chain(exceptional_edges.iter()) {
            if !unit_map.contains_key(&from) || !unit_map.contains_key(&to) {
                return Err(CfgError::UnknownUnit { from, to });
            }
        }

        let mut preds: IndexMap<UnitId, Vec<UnitId>> =
            unit_map.keys().map(|&id| (id, Vec::new())).collect();
        let mut normal_preds = preds.clone();
        let mut has_normal_succ: IndexSet<UnitId> = IndexSet::new();
        for &(from, to) in &edges {
            push_unique(&mut preds[&to], from);
            push_unique(&mut normal_preds[&to], from);
            has_normal_succ.insert(from);
        }
        for &(from, to) in &exceptional_edges {
            push_unique(&mut preds[&to], from);
        }
        let tails = unit_map
            .keys()
            .copied()
            .filter(|id| !has_normal_succ.contains(id))
            .collect();

        Ok(Self {
            signature,
            units: unit_map,
            edges,
            exceptional_edges,
            preds,
            normal_preds,
            tails,
        })
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Short method name, e.g. `onCreate` for
    /// `<a.B: void onCreate(android.os.Bundle)>`.
    pub fn method_name(&self) -> &str {
        method_name(&self.signature)
    }
}

fn push_unique(list: &mut Vec<UnitId>, id: UnitId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

/// Extract the bare method name from a fully qualified signature.
pub fn method_name(signature: &str) -> &str {
    let head = signature
        .split_once('(')
        .map(|(head, _)| head)
        .unwrap_or(signature);
    head.trim_end_matches('>')
        .rsplit(|c: char| c.is_whitespace() || c == ':')
        .find(|part| !part.is_empty())
        .unwrap_or(signature)
}

impl ControlFlowGraph for ProcedureGraph {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn units(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    fn statement(&self, unit: UnitId) -> Option<&Statement> {
        self.units.get(&unit)
    }

    fn tails(&self) -> Vec<UnitId> {
        self.tails.clone()
    }

    fn preds_of(&self, unit: UnitId) -> &[UnitId] {
        self.preds.get(&unit).map(Vec::as_slice).unwrap_or(&[])
    }

    fn unexceptional_preds_of(&self, unit: UnitId) -> &[UnitId] {
        self.normal_preds
            .get(&unit)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl TryFrom<RawProcedure> for ProcedureGraph {
    type Error = CfgError;

    fn try_from(raw: RawProcedure) -> Result<Self, Self::Error> {
        ProcedureGraph::new(raw.signature, raw.units, raw.edges, raw.exceptional_edges)
    }
}

impl From<ProcedureGraph> for RawProcedure {
    fn from(graph: ProcedureGraph) -> Self {
        RawProcedure {
            signature: graph.signature,
            units: graph
                .units
                .into_iter()
                .map(|(id, statement)| Unit { id, statement })
                .collect(),
            edges: graph.edges,
            exceptional_edges: graph.exceptional_edges,
        }
    }
}

/// Incremental construction of a [`ProcedureGraph`]; unit ids are assigned
/// in insertion order.
#[derive(Debug, Clone)]
pub struct ProcedureBuilder {
    signature: String,
    units: Vec<Unit>,
    edges: Vec<(UnitId, UnitId)>,
    exceptional_edges: Vec<(UnitId, UnitId)>,
}

impl ProcedureBuilder {
    pub fn unit(&mut self, statement: Statement) -> UnitId {
        let id = UnitId(self.units.len());
        self.units.push(Unit { id, statement });
        id
    }

    pub fn edge(&mut self, from: UnitId, to: UnitId) -> &mut Self {
        self.edges.push((from, to));
        self
    }

    pub fn exceptional_edge(&mut self, from: UnitId, to: UnitId) -> &mut Self {
        self.exceptional_edges.push((from, to));
        self
    }

    /// Connect consecutive units with normal edges.
    pub fn chain(&mut self, units: &[UnitId]) -> &mut Self {
        for pair in units.windows(2) {
            self.edges.push((pair[0], pair[1]));
        }
        self
    }

    pub fn build(&self) -> Result<ProcedureGraph, CfgError> {
        ProcedureGraph::new(
            self.signature.clone(),
            self.units.clone(),
            self.edges.clone(),
            self.exceptional_edges.clone(),
        )
    }
}

/// Store of procedure bodies keyed by signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub procedures: Vec<ProcedureGraph>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_procedure(mut self, procedure: ProcedureGraph) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn find(&self, signature: &str) -> Option<&ProcedureGraph> {
        self.procedures
            .iter()
            .find(|procedure| procedure.signature() == signature)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.procedures.iter().map(|procedure| procedure.signature())
    }
}
