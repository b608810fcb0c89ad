use anyhow::Result;
use colored::Colorize;
use converge::DependencyGraph;
use std::fmt::Write as _;

use crate::Context;
use crate::cli::{GraphArgs, GraphFormat};
use crate::config::Manifest;
use crate::ui;

pub fn run(ctx: &Context, args: &GraphArgs) -> Result<()> {
    let manifest = Manifest::load(&ctx.file)?;
    let graph = DependencyGraph::build(manifest.declarations())?;

    match args.format {
        GraphFormat::Dot => print!("{}", to_dot(&graph)),
        GraphFormat::Text => print_layers(&graph),
    }
    Ok(())
}

fn print_layers(graph: &DependencyGraph) {
    ui::header(&format!("{} resources", graph.len()));
    for (index, layer) in graph.topological_layers().iter().enumerate() {
        ui::section(&format!("Layer {}", index + 1));
        for decl in layer {
            let deps = if decl.depends_on.is_empty() {
                String::new()
            } else {
                format!(" <- {}", decl.depends_on.join(", "))
            };
            println!(
                "  {} {}{}",
                decl.id.bold(),
                format!("[{}]", decl.kind).dimmed(),
                deps.dimmed()
            );
        }
    }
}

/// Graphviz rendering, edges pointing from a dependency to its dependent
pub fn to_dot(graph: &DependencyGraph) -> String {
    let mut out = String::from("digraph stratum {\n    rankdir=LR;\n");
    for decl in graph.declarations() {
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\\n{}\"];",
            decl.id, decl.id, decl.kind
        );
    }
    for decl in graph.declarations() {
        for dep in graph.dependencies(&decl.id) {
            let _ = writeln!(out, "    \"{dep}\" -> \"{}\";", decl.id);
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::Declaration;

    #[test]
    fn test_dot_has_nodes_and_edges() {
        let graph = DependencyGraph::build(vec![
            Declaration::new("cluster", "eks_cluster"),
            Declaration::new("nodegroup", "eks_nodegroup").depends_on("cluster"),
        ])
        .unwrap();

        let dot = to_dot(&graph);
        assert!(dot.starts_with("digraph stratum {"));
        assert!(dot.contains("\"cluster\" [label=\"cluster\\neks_cluster\"];"));
        assert!(dot.contains("\"cluster\" -> \"nodegroup\";"));
        assert!(dot.ends_with("}\n"));
    }
}
