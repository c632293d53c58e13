//! The cover relation: a vertex whose label implies the label of an older,
//! uncovered vertex at the same CFG unit need not be expanded.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, trace, warn};

use unwind_ir::cfg::UnitId;
use unwind_smt::oracle::{InterpolatingOracle, OracleError, Vocabulary};
use unwind_smt::terms::SmtTerm;

use crate::encoder::shift_distance;
use crate::graph::{EdgeId, UnwindingGraph, VertexId};

/// Cover state of one vertex, derived from the relation's maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CoverState {
    Uncovered,
    CoveredBy { coverer: VertexId },
    Covering { count: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverStats {
    /// Vertices currently covering at least one other vertex.
    pub covering: usize,
    /// Vertices currently covered.
    pub covered: usize,
    pub indexed_units: usize,
    pub indexed_vertices: usize,
    /// Cover pairs ever established.
    pub closures: usize,
    /// Cover pairs dropped after a label changed or a coverer got covered.
    pub invalidated: usize,
}

#[derive(Debug, Clone)]
pub struct CoverRelation {
    enabled: bool,
    unit_vertices: IndexMap<UnitId, Vec<VertexId>>,
    covered_by: IndexMap<VertexId, VertexId>,
    covering: IndexMap<VertexId, IndexSet<VertexId>>,
    /// Unexpanded vertices that lost their cover and wait to be re-queued.
    uncovered: Vec<VertexId>,
    closures: usize,
    invalidated: usize,
}

impl CoverRelation {
    /// With `enabled == false` no vertex is ever covered; the unit index is
    /// still maintained.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            unit_vertices: IndexMap::new(),
            covered_by: IndexMap::new(),
            covering: IndexMap::new(),
            uncovered: Vec::new(),
            closures: 0,
            invalidated: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Register `edge`'s source vertex against the edge's unit.
    pub fn update_unit_vertex_map(&mut self, graph: &UnwindingGraph, edge: EdgeId) {
        let edge = graph.edge(edge);
        let Some(source) = edge.source else {
            return;
        };
        let vertices = self.unit_vertices.entry(edge.unit).or_default();
        if !vertices.contains(&source) {
            vertices.push(source);
        }
    }

    pub fn unit_vertex_map(&self) -> &IndexMap<UnitId, Vec<VertexId>> {
        &self.unit_vertices
    }

    pub fn covered_by(&self, v: VertexId) -> Option<VertexId> {
        self.covered_by.get(&v).copied()
    }

    pub fn covering(&self, w: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.covering.get(&w).into_iter().flatten().copied()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.covered_by.iter().map(|(&v, &w)| (v, w))
    }

    pub fn pair_count(&self) -> usize {
        self.covered_by.len()
    }

    pub fn cover_state(&self, v: VertexId) -> CoverState {
        if let Some(coverer) = self.covered_by(v) {
            return CoverState::CoveredBy { coverer };
        }
        match self.covering.get(&v) {
            Some(covered) if !covered.is_empty() => CoverState::Covering {
                count: covered.len(),
            },
            _ => CoverState::Uncovered,
        }
    }

    /// Whether `v` or one of its ancestors is covered.
    pub fn chain_covered(&self, graph: &UnwindingGraph, v: VertexId) -> bool {
        let mut cur = Some(v);
        while let Some(x) = cur {
            if self.covered_by.contains_key(&x) {
                return true;
            }
            cur = graph.vertex(x).next;
        }
        false
    }

    /// Whether `v` is covered; if neither `v` nor an ancestor is, try to
    /// close `v` first. Vertices uncovered as a side effect are collected
    /// for [`CoverRelation::take_uncovered`].
    pub fn is_covered(
        &mut self,
        v: VertexId,
        graph: &UnwindingGraph,
        oracle: &mut dyn InterpolatingOracle,
        vocabulary: &Vocabulary,
    ) -> Result<bool, OracleError> {
        if self.chain_covered(graph, v) {
            return Ok(true);
        }
        self.close(v, graph, oracle, vocabulary)
    }

    /// Try to cover `v` by an older uncovered vertex at the same unit whose
    /// label `v`'s label implies.
    pub fn close(
        &mut self,
        v: VertexId,
        graph: &UnwindingGraph,
        oracle: &mut dyn InterpolatingOracle,
        vocabulary: &Vocabulary,
    ) -> Result<bool, OracleError> {
        if !self.enabled {
            return Ok(false);
        }
        let Some(unit) = graph.unit_of(v) else {
            return Ok(false);
        };
        let vertex = graph.vertex(v);
        let candidates: Vec<VertexId> = self
            .unit_vertices
            .get(&unit)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&w| {
                w != v
                    && graph.vertex(w).location_number < vertex.location_number
                    && !graph.in_subtree(v, w)
            })
            .collect();

        for w in candidates {
            if self.chain_covered(graph, w) {
                continue;
            }
            let coverer = graph.vertex(w);
            let lhs = shift_distance(&vertex.label, vertex.distance, coverer.distance);
            if label_implies(oracle, vocabulary, &lhs, &coverer.label)? {
                self.insert_pair(v, w, graph);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Maintain the relation after the labels of `strengthened` changed.
    /// Returns the unexpanded vertices that lost their cover.
    pub fn update_cover(
        &mut self,
        strengthened: &[VertexId],
        graph: &UnwindingGraph,
        oracle: &mut dyn InterpolatingOracle,
        vocabulary: &Vocabulary,
    ) -> Result<Vec<VertexId>, OracleError> {
        if !self.enabled {
            return Ok(self.take_uncovered());
        }

        let mut dropped = Vec::new();
        for &w in strengthened {
            let Some(covered) = self.covering.get(&w).cloned() else {
                continue;
            };
            let coverer = graph.vertex(w);
            for x in covered {
                let vertex = graph.vertex(x);
                let lhs = shift_distance(&vertex.label, vertex.distance, coverer.distance);
                if !label_implies(oracle, vocabulary, &lhs, &coverer.label)? {
                    trace!(covered = %x, coverer = %w, "cover pair no longer holds");
                    self.remove_pair(x);
                    dropped.push(x);
                }
            }
        }
        for x in dropped {
            self.schedule_uncovered(x, graph);
        }

        let mut order = strengthened.to_vec();
        order.sort_by_key(|&v| graph.vertex(v).location_number);
        order.dedup();
        for v in order {
            if graph.vertex(v).next.is_some() && !self.chain_covered(graph, v) {
                self.close(v, graph, oracle, vocabulary)?;
            }
        }
        Ok(self.take_uncovered())
    }

    /// Drain the vertices that lost their cover since the last call.
    pub fn take_uncovered(&mut self) -> Vec<VertexId> {
        std::mem::take(&mut self.uncovered)
    }

    pub fn stats(&self) -> CoverStats {
        CoverStats {
            covering: self.covering.values().filter(|c| !c.is_empty()).count(),
            covered: self.covered_by.len(),
            indexed_units: self.unit_vertices.len(),
            indexed_vertices: self.unit_vertices.values().map(Vec::len).sum(),
            closures: self.closures,
            invalidated: self.invalidated,
        }
    }

    /// Debug dump of the unit index.
    pub fn log_unit_vertex_map(&self) {
        for (unit, vertices) in &self.unit_vertices {
            let list: Vec<String> = vertices.iter().map(ToString::to_string).collect();
            debug!(%unit, vertices = %list.join(","), "unit index");
        }
    }

    fn insert_pair(&mut self, v: VertexId, w: VertexId, graph: &UnwindingGraph) {
        // A covered vertex's subtree can no longer cover anything.
        let subtree: IndexSet<VertexId> = graph.subtree(v).into_iter().collect();
        let stale: Vec<VertexId> = self
            .covering
            .keys()
            .copied()
            .filter(|c| subtree.contains(c))
            .collect();
        let mut released = Vec::new();
        for coverer in stale {
            if let Some(covered) = self.covering.shift_remove(&coverer) {
                for x in covered {
                    self.covered_by.shift_remove(&x);
                    self.invalidated += 1;
                    released.push(x);
                }
            }
        }

        trace!(covered = %v, coverer = %w, "cover pair established");
        self.covered_by.insert(v, w);
        self.covering.entry(w).or_default().insert(v);
        self.closures += 1;

        for x in released {
            self.schedule_uncovered(x, graph);
        }
    }

    fn remove_pair(&mut self, v: VertexId) {
        if let Some(w) = self.covered_by.shift_remove(&v) {
            if let Some(covered) = self.covering.get_mut(&w) {
                covered.shift_remove(&v);
                if covered.is_empty() {
                    self.covering.shift_remove(&w);
                }
            }
            self.invalidated += 1;
        }
    }

    fn schedule_uncovered(&mut self, x: VertexId, graph: &UnwindingGraph) {
        for y in graph.subtree(x) {
            if !graph.vertex(y).expanded
                && !self.chain_covered(graph, y)
                && !self.uncovered.contains(&y)
            {
                self.uncovered.push(y);
            }
        }
    }
}

/// Solver failures count as "does not imply"; only vocabulary errors
/// propagate.
fn label_implies(
    oracle: &mut dyn InterpolatingOracle,
    vocabulary: &Vocabulary,
    lhs: &SmtTerm,
    rhs: &SmtTerm,
) -> Result<bool, OracleError> {
    match oracle.implies(vocabulary, lhs, rhs) {
        Ok(Some(holds)) => Ok(holds),
        Ok(None) => Ok(false),
        Err(OracleError::Solver(reason)) => {
            warn!(%reason, "implication check failed; treating as not covered");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PathEncoder;
    use unwind_ir::cfg::ProcedureGraph;
    use unwind_ir::policy::SignaturePolicy;
    use unwind_ir::statement::{Expr, Statement};
    use unwind_smt::oracle::SolverOracle;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const LEAK: &str = "<demo.Log: void leak()>";

    /// `x = 0; while (*) { x = x + 1 }; leak(); return`
    fn counting_loop() -> ProcedureGraph {
        let mut b = ProcedureGraph::builder("<demo.Main: void spin()>");
        let init = b.unit(Statement::assign("x", Expr::int(0)));
        let body = b.unit(Statement::assign("x", Expr::var("x").add(Expr::int(1))));
        let leak = b.unit(Statement::invoke(LEAK, vec![]));
        let exit = b.unit(Statement::ret(None));
        b.edge(init, body)
            .edge(body, body)
            .edge(init, leak)
            .edge(body, leak)
            .edge(leak, exit);
        b.build().expect("well formed")
    }

    struct Fixture {
        cfg: ProcedureGraph,
        policy: SignaturePolicy,
        graph: UnwindingGraph,
        cover: CoverRelation,
        vocab: Vocabulary,
        encoder: PathEncoder,
        root: VertexId,
    }

    impl Fixture {
        fn new(enabled: bool) -> Self {
            let cfg = counting_loop();
            let policy = SignaturePolicy::new().error_method(LEAK);
            let (graph, root) = UnwindingGraph::seed(&cfg, &policy);
            let encoder = PathEncoder::for_cfg(&cfg).expect("encodable");
            let mut vocab = Vocabulary::new();
            encoder.declare_state(&mut vocab, 0);
            Self {
                cfg,
                policy,
                graph,
                cover: CoverRelation::new(enabled),
                vocab,
                encoder,
                root,
            }
        }

        fn expand(&mut self, w: VertexId) -> Vec<VertexId> {
            let expansion = self
                .graph
                .expand(w, &self.cfg, &self.policy, &mut self.cover);
            let created: Vec<VertexId> = expansion.created.iter().map(|c| c.vertex).collect();
            for &v in &created {
                self.encoder
                    .declare_state(&mut self.vocab, self.graph.vertex(v).distance);
            }
            created
        }

        fn vertex_at(&self, unit: UnitId, distance: usize) -> VertexId {
            self.graph
                .vertices()
                .find(|v| v.distance == distance && self.graph.unit_of(v.id) == Some(unit))
                .map(|v| v.id)
                .expect("vertex exists")
        }
    }

    #[test]
    fn loop_unrolling_is_closed_by_the_older_copy() -> TestResult {
        let mut fx = Fixture::new(true);
        let mut oracle = SolverOracle::z3(0);
        let ret = fx.expand(fx.root)[0];
        let leak = fx.expand(ret)[0];
        fx.expand(leak);
        let body1 = fx.vertex_at(UnitId(1), 3);
        fx.expand(body1);
        let body2 = fx.vertex_at(UnitId(1), 4);

        // Both body copies sit on the error path and start at `true`.
        assert!(fx.cover.is_covered(body2, &fx.graph, &mut oracle, &fx.vocab)?);
        assert_eq!(fx.cover.covered_by(body2), Some(body1));
        assert_eq!(fx.cover.cover_state(body1), CoverState::Covering { count: 1 });
        assert!(!fx.cover.is_covered(body1, &fx.graph, &mut oracle, &fx.vocab)?);
        let stats = fx.cover.stats();
        assert_eq!((stats.covered, stats.covering, stats.closures), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn strengthening_the_coverer_breaks_the_pair() -> TestResult {
        let mut fx = Fixture::new(true);
        let mut oracle = SolverOracle::z3(0);
        let ret = fx.expand(fx.root)[0];
        let leak = fx.expand(ret)[0];
        fx.expand(leak);
        let body1 = fx.vertex_at(UnitId(1), 3);
        fx.expand(body1);
        let body2 = fx.vertex_at(UnitId(1), 4);
        assert!(fx.cover.is_covered(body2, &fx.graph, &mut oracle, &fx.vocab)?);

        fx.graph
            .set_label(body1, SmtTerm::var("x@3").gt(SmtTerm::int(10)));
        let requeue = fx
            .cover
            .update_cover(&[body1], &fx.graph, &mut oracle, &fx.vocab)?;
        assert_eq!(requeue, vec![body2]);
        assert_eq!(fx.cover.covered_by(body2), None);
        assert_eq!(fx.cover.stats().invalidated, 1);
        Ok(())
    }

    #[test]
    fn covered_ancestor_covers_the_subtree() -> TestResult {
        let mut fx = Fixture::new(true);
        let mut oracle = SolverOracle::z3(0);
        let ret = fx.expand(fx.root)[0];
        let leak = fx.expand(ret)[0];
        fx.expand(leak);
        let body1 = fx.vertex_at(UnitId(1), 3);
        fx.expand(body1);
        let body2 = fx.vertex_at(UnitId(1), 4);
        let below = fx.expand(body2);
        assert!(fx.cover.is_covered(body2, &fx.graph, &mut oracle, &fx.vocab)?);
        for v in below {
            assert!(fx.cover.chain_covered(&fx.graph, v));
        }
        Ok(())
    }

    #[test]
    fn incomparable_labels_do_not_cover() -> TestResult {
        let mut fx = Fixture::new(true);
        let mut oracle = SolverOracle::z3(0);
        let ret = fx.expand(fx.root)[0];
        let leak = fx.expand(ret)[0];
        fx.expand(leak);
        let body1 = fx.vertex_at(UnitId(1), 3);
        fx.expand(body1);
        let body2 = fx.vertex_at(UnitId(1), 4);
        fx.graph
            .set_label(body1, SmtTerm::var("x@3").gt(SmtTerm::int(0)));
        fx.graph
            .set_label(body2, SmtTerm::var("x@4").lt(SmtTerm::int(0)));
        assert!(!fx.cover.is_covered(body2, &fx.graph, &mut oracle, &fx.vocab)?);
        assert_eq!(fx.cover.cover_state(body1), CoverState::Uncovered);
        Ok(())
    }

    #[test]
    fn disabled_relation_never_covers() -> TestResult {
        let mut fx = Fixture::new(false);
        let mut oracle = SolverOracle::z3(0);
        let ret = fx.expand(fx.root)[0];
        let leak = fx.expand(ret)[0];
        fx.expand(leak);
        let body1 = fx.vertex_at(UnitId(1), 3);
        fx.expand(body1);
        let body2 = fx.vertex_at(UnitId(1), 4);
        assert!(!fx.cover.is_covered(body2, &fx.graph, &mut oracle, &fx.vocab)?);
        assert!(fx.cover.stats().indexed_vertices > 0);
        Ok(())
    }
}
