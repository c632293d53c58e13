//! The unwinding graph: a tree of vertices grown backward from the return
//! point, one CFG step per expansion.
//!
//! Vertices and edges live in arenas owned by [`UnwindingGraph`]; parent
//! links (`next`) and child lists (`previous`) are plain indices. A CFG loop
//! shows up as distinct vertices at increasing distance.

use serde::Serialize;
use std::fmt;

use unwind_ir::cfg::{ControlFlowGraph, UnitId};
use unwind_ir::policy::UnitClassifier;
use unwind_smt::terms::SmtTerm;

use crate::cover::CoverRelation;
use crate::encoder::error_flag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct VertexId(pub usize);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EdgeId(pub usize);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Structural role of a vertex. Exactly one per vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexRole {
    /// The root: the procedure's return point.
    Return,
    Interior,
    /// Its outgoing unit has no unexceptional predecessor (procedure entry).
    Head,
}

/// Policy markers inherited from the vertex's outgoing edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VertexMarkers {
    pub error: bool,
    pub source: bool,
    pub sink: bool,
}

/// Classification of an edge's unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EdgeClass {
    pub error: bool,
    pub source: bool,
    pub sink: bool,
    /// The unit is an error unit or lies before one on the way to return.
    pub in_error_path: bool,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    /// Creation order; the root is 0.
    pub location_number: usize,
    /// Backward steps from the return vertex.
    pub distance: usize,
    pub role: VertexRole,
    pub markers: VertexMarkers,
    /// Edge toward the return vertex; `None` only for the root.
    pub outgoing: Option<EdgeId>,
    /// One edge per CFG predecessor of the outgoing unit.
    pub incoming: Vec<EdgeId>,
    /// Tree parent.
    pub next: Option<VertexId>,
    /// Tree children.
    pub previous: Vec<VertexId>,
    /// Over-approximation of the states at this vertex from which the
    /// return point is reached with the error flag set.
    pub label: SmtTerm,
    pub expanded: bool,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub unit: UnitId,
    pub target: VertexId,
    /// Filled in when the target is expanded.
    pub source: Option<VertexId>,
    pub class: EdgeClass,
}

/// Result of expanding one vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// New vertices, in creation order.
    pub created: Vec<ExpandedVertex>,
    /// New head vertices on an error path.
    pub error_roots: Vec<VertexId>,
    /// New vertices with an incoming error edge.
    pub error_vertices: Vec<VertexId>,
}

impl Expansion {
    pub fn error_path_found(&self) -> bool {
        !self.error_roots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedVertex {
    pub vertex: VertexId,
    /// The outgoing edge is an error edge; the driver may fast-forward to it.
    pub fast_forward: bool,
}

#[derive(Debug, Clone)]
pub struct UnwindingGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

impl UnwindingGraph {
    /// A graph holding only the return vertex, with one seed edge per tail
    /// unit of `cfg`. The root is labelled with the goal `err@0`.
    pub fn seed(cfg: &dyn ControlFlowGraph, classifier: &dyn UnitClassifier) -> (Self, VertexId) {
        let mut graph = Self {
            vertices: Vec::new(),
            edges: Vec::new(),
        };
        let root = graph.push_vertex(
            0,
            VertexRole::Return,
            VertexMarkers::default(),
            None,
            None,
            SmtTerm::var(error_flag(0)),
        );
        for unit in cfg.tails() {
            let class = classify_edge(cfg, classifier, unit, false);
            let edge = graph.push_edge(unit, root, class);
            graph.vertices[root.0].incoming.push(edge);
        }
        (graph, root)
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn set_label(&mut self, id: VertexId, label: SmtTerm) {
        self.vertices[id.0].label = label;
    }

    /// The CFG unit executed at `id` (its outgoing edge's unit).
    pub fn unit_of(&self, id: VertexId) -> Option<UnitId> {
        self.vertex(id).outgoing.map(|e| self.edge(e).unit)
    }

    /// `id` followed by its ancestors up to and including the root.
    pub fn path_to_root(&self, id: VertexId) -> Vec<VertexId> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(next) = self.vertex(cur).next {
            path.push(next);
            cur = next;
        }
        path
    }

    /// Whether `x` lies in the subtree rooted at `ancestor` (inclusive).
    pub fn in_subtree(&self, ancestor: VertexId, x: VertexId) -> bool {
        let mut cur = Some(x);
        while let Some(v) = cur {
            if v == ancestor {
                return true;
            }
            cur = self.vertex(v).next;
        }
        false
    }

    /// All vertices of the subtree rooted at `id`, breadth first.
    pub fn subtree(&self, id: VertexId) -> Vec<VertexId> {
        let mut out = vec![id];
        let mut idx = 0;
        while idx < out.len() {
            out.extend(self.vertex(out[idx]).previous.iter().copied());
            idx += 1;
        }
        out
    }

    /// Expand `w` one CFG step backward. For each incoming edge of `w` a
    /// child vertex is created, registered in the cover relation's unit
    /// index, and given one incoming edge per CFG predecessor of its unit.
    /// The caller guarantees `w` is not covered.
    pub fn expand(
        &mut self,
        w: VertexId,
        cfg: &dyn ControlFlowGraph,
        classifier: &dyn UnitClassifier,
        cover: &mut CoverRelation,
    ) -> Expansion {
        let mut expansion = Expansion::default();
        let distance = self.vertex(w).distance + 1;
        let incoming = self.vertex(w).incoming.clone();
        self.vertices[w.0].expanded = true;

        for e in incoming {
            let Edge { unit, class, .. } = *self.edge(e);
            let head = cfg.unexceptional_preds_of(unit).is_empty();
            let role = if head {
                VertexRole::Head
            } else {
                VertexRole::Interior
            };
            let label = if class.in_error_path {
                SmtTerm::bool(true)
            } else {
                SmtTerm::var(error_flag(distance))
            };
            let markers = VertexMarkers {
                error: class.error,
                source: class.source,
                sink: class.sink,
            };
            let v = self.push_vertex(distance, role, markers, Some(e), Some(w), label);
            self.edges[e.0].source = Some(v);
            self.vertices[w.0].previous.push(v);
            cover.update_unit_vertex_map(self, e);

            if head && class.in_error_path {
                expansion.error_roots.push(v);
            }

            for &pred in cfg.preds_of(unit) {
                let pred_class = classify_edge(cfg, classifier, pred, class.in_error_path);
                let pe = self.push_edge(pred, v, pred_class);
                self.vertices[v.0].incoming.push(pe);
                if pred_class.error && !expansion.error_vertices.contains(&v) {
                    expansion.error_vertices.push(v);
                }
            }

            expansion.created.push(ExpandedVertex {
                vertex: v,
                fast_forward: class.error,
            });
        }
        expansion
    }

    fn push_vertex(
        &mut self,
        distance: usize,
        role: VertexRole,
        markers: VertexMarkers,
        outgoing: Option<EdgeId>,
        next: Option<VertexId>,
        label: SmtTerm,
    ) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            id,
            location_number: id.0,
            distance,
            role,
            markers,
            outgoing,
            incoming: Vec::new(),
            next,
            previous: Vec::new(),
            label,
            expanded: false,
        });
        id
    }

    fn push_edge(&mut self, unit: UnitId, target: VertexId, class: EdgeClass) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            id,
            unit,
            target,
            source: None,
            class,
        });
        id
    }
}

/// Classify the edge for `unit` whose target's outgoing edge has the given
/// error-path flag.
pub fn classify_edge(
    cfg: &dyn ControlFlowGraph,
    classifier: &dyn UnitClassifier,
    unit: UnitId,
    target_in_error_path: bool,
) -> EdgeClass {
    let class = classifier.classify(unit, cfg);
    EdgeClass {
        error: class.error,
        source: class.source,
        sink: class.sink,
        in_error_path: class.error || target_in_error_path,
    }
}
