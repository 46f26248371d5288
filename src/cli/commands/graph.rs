use std::path::PathBuf;

use anyhow::Context as _;
use depgraph::graph::{Graph, Node};
use depgraph::lock::Lockfile;
use serde_json::json;

use super::CommonArgs;

/// Arguments for `kiln graph`.
#[derive(clap::Args)]
pub struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Write the resolved pins to this lockfile
    #[arg(long, value_name = "PATH")]
    lockfile_out: Option<PathBuf>,

    /// Emit the graph as JSON instead of the text report
    #[arg(long)]
    json: bool,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let cache = super::open_cache()?;
    let remotes = super::open_remotes(&args.common.remotes)?;
    let graph = super::resolve_graph(&cache, &remotes, &args.common)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&render_json(&graph))?);
    } else {
        render_text(&graph);
    }

    if let Some(path) = &args.lockfile_out {
        Lockfile::create(&graph)
            .save(path)
            .with_context(|| format!("could not write lockfile `{}`", path.display()))?;
        tracing::info!(path = %path.display(), "lockfile written");
    }

    super::ensure_buildable(&graph)
}

fn render_text(graph: &Graph) {
    for node in graph.nodes.iter().filter(|n| !n.is_root) {
        let binary = node
            .binary
            .map(|b| format!("{b:?}"))
            .unwrap_or_else(|| "-".to_string());
        let package_id = node
            .package_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:5} {:40} {:40} {}",
            node.context.to_string(),
            node.ref_.repr_with_revision(),
            package_id,
            binary
        );
    }
}

fn render_json(graph: &Graph) -> serde_json::Value {
    let nodes: Vec<serde_json::Value> = graph
        .nodes
        .iter()
        .filter(|n| !n.is_root)
        .map(render_node)
        .collect();
    json!({
        "graph": {
            "nodes": nodes,
            "replaced_requires": graph.replaced_requires,
        }
    })
}

fn render_node(node: &Node) -> serde_json::Value {
    json!({
        "ref": node.ref_,
        "context": node.context,
        "package_id": node.package_id,
        "binary": node.binary,
        "settings": node.settings,
        "options": node.options,
        "python_requires": node.python_requires,
        "dependencies": node
            .edges
            .iter()
            .map(|e| e.require.display_ref())
            .collect::<Vec<_>>(),
    })
}
