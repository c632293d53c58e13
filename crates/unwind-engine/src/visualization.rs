//! Graphviz export of the unwinding tree.

use indexmap::IndexSet;

use unwind_ir::cfg::ControlFlowGraph;

use crate::cover::CoverRelation;
use crate::graph::{UnwindingGraph, Vertex, VertexId, VertexRole};

fn dot_escape(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn vertex_label(vertex: &Vertex, graph: &UnwindingGraph, cfg: &dyn ControlFlowGraph) -> String {
    let statement = graph
        .unit_of(vertex.id)
        .and_then(|unit| cfg.statement(unit).map(|s| format!("{unit}: {s}")))
        .unwrap_or_else(|| "return".to_string());
    format!(
        "{} d={}\\n{}\\n{}",
        vertex.id,
        vertex.distance,
        dot_escape(&statement),
        dot_escape(&vertex.label.to_string())
    )
}

fn vertex_attrs(vertex: &Vertex) -> &'static str {
    match vertex.role {
        VertexRole::Return => "shape=doublecircle",
        VertexRole::Head if vertex.markers.error => "shape=box, color=red",
        VertexRole::Head => "shape=box",
        VertexRole::Interior if vertex.markers.error => "color=red",
        VertexRole::Interior => "shape=ellipse",
    }
}

fn render(
    graph: &UnwindingGraph,
    cover: &CoverRelation,
    cfg: &dyn ControlFlowGraph,
    keep: impl Fn(VertexId) -> bool,
    name: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", dot_escape(name)));
    out.push_str("  rankdir=BT;\n");
    for vertex in graph.vertices().filter(|v| keep(v.id)) {
        out.push_str(&format!(
            "  {} [label=\"{}\", {}];\n",
            vertex.id,
            vertex_label(vertex, graph, cfg),
            vertex_attrs(vertex)
        ));
    }
    for vertex in graph.vertices().filter(|v| keep(v.id)) {
        if let Some(next) = vertex.next.filter(|&n| keep(n)) {
            out.push_str(&format!("  {} -> {};\n", vertex.id, next));
        }
    }
    for (covered, coverer) in cover.pairs() {
        if keep(covered) && keep(coverer) {
            out.push_str(&format!(
                "  {covered} -> {coverer} [style=dashed, constraint=false, label=\"covered\"];\n"
            ));
        }
    }
    out.push_str("}\n");
    out
}

/// The whole unwinding tree, with cover pairs drawn dashed.
pub fn render_dot(
    graph: &UnwindingGraph,
    cover: &CoverRelation,
    cfg: &dyn ControlFlowGraph,
) -> String {
    render(graph, cover, cfg, |_| true, cfg.signature())
}

/// Only the paths from `error_roots` to the return vertex.
pub fn render_error_paths_dot(
    graph: &UnwindingGraph,
    cover: &CoverRelation,
    cfg: &dyn ControlFlowGraph,
    error_roots: impl IntoIterator<Item = VertexId>,
) -> String {
    let on_path: IndexSet<VertexId> = error_roots
        .into_iter()
        .flat_map(|root| graph.path_to_root(root))
        .collect();
    render(
        graph,
        cover,
        cfg,
        |v| on_path.contains(&v),
        &format!("{} error paths", cfg.signature()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use unwind_ir::cfg::ProcedureGraph;
    use unwind_ir::policy::SignaturePolicy;
    use unwind_ir::statement::{Expr, Statement};

    const LEAK: &str = "<demo.Log: void leak()>";

    #[test]
    fn dot_output_contains_tree_and_error_paths() {
        let mut b = ProcedureGraph::builder("<demo.Main: void run()>");
        let entry = b.unit(Statement::assign("x", Expr::int(1)));
        let leak = b.unit(Statement::invoke(LEAK, vec![]));
        let exit = b.unit(Statement::ret(None));
        b.edge(entry, leak).edge(leak, exit).edge(entry, exit);
        let cfg = b.build().expect("well formed");
        let policy = SignaturePolicy::new().error_method(LEAK);
        let (mut graph, root) = UnwindingGraph::seed(&cfg, &policy);
        let mut cover = CoverRelation::new(true);
        let mut roots = Vec::new();
        let mut queue = vec![root];
        while let Some(w) = queue.pop() {
            let expansion = graph.expand(w, &cfg, &policy, &mut cover);
            roots.extend(expansion.error_roots.iter().copied());
            queue.extend(expansion.created.iter().map(|c| c.vertex));
        }

        let all = render_dot(&graph, &cover, &cfg);
        assert!(all.starts_with("digraph \"<demo.Main: void run()>\""));
        assert!(all.contains("shape=doublecircle"));
        assert!(all.contains("leak()"));
        assert_eq!(all.matches(" -> ").count(), graph.vertex_count() - 1);

        let errors = render_error_paths_dot(&graph, &cover, &cfg, roots);
        // entry -> leak -> return-unit -> root
        assert_eq!(errors.matches(" -> ").count(), 3);
        assert!(errors.contains("color=red"));
    }
}
