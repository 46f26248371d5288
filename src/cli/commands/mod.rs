mod graph;
mod list;
mod lock;
mod upload;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::Subcommand;
use config::CONFIG;
use depgraph::binid::{BinaryAnnotator, BuildPolicy};
use depgraph::graph::{BinaryStatus, Graph, GraphBuilder};
use depgraph::loader::RemoteLookup;
use depgraph::lock::Lockfile;
use depgraph::require::{Requirement, RequirementKind};

use super::Args;
use crate::cli::store::FileStore;

#[derive(Subcommand)]
pub(super) enum Commands {
    /// Resolve the dependency graph and report binary availability.
    ///
    /// Expands the given requirements into a full host/build graph,
    /// computes every package id, and reports where each binary will
    /// come from. Fails when a requirement cannot be resolved, when two
    /// branches conflict, or when a binary is missing and the build
    /// policy forbids building it.
    #[command(verbatim_doc_comment)]
    Graph(graph::Args),
    /// Create, merge and clean lockfiles.
    ///
    /// Lockfiles pin the exact versions and revisions of one
    /// resolution so later resolutions reproduce it. Separate
    /// configurations are locked independently and merged into a single
    /// file covering all of them.
    #[command(verbatim_doc_comment)]
    Lock(lock::Args),
    /// List recipes and binaries in the cache or a remote.
    #[command(verbatim_doc_comment)]
    List(list::Args),
    /// Upload recipe revisions to a remote.
    ///
    /// Computes the difference between the local cache and the remote
    /// for the selected pattern and transfers only what the remote is
    /// missing, manifests last.
    #[command(verbatim_doc_comment)]
    Upload(upload::Args),
}

/// Arguments shared by every command that resolves a graph.
#[derive(clap::Args, Clone)]
pub(crate) struct CommonArgs {
    /// Direct requirements, e.g. `zlib/[>=1.2 <2]` (repeatable)
    #[arg(long = "requires", value_name = "REQUIREMENT")]
    requires: Vec<String>,

    /// Build-context tool requirements (repeatable)
    #[arg(long = "tool-requires", value_name = "REQUIREMENT")]
    tool_requires: Vec<String>,

    /// Profile settings as `key=value` (repeatable)
    #[arg(short = 's', long = "settings", value_name = "KEY=VALUE")]
    settings: Vec<String>,

    /// Profile options as `key=value`, or `pkg:key=value` to target one
    /// package (repeatable)
    #[arg(short = 'o', long = "options", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Resolve against this lockfile
    #[arg(long, value_name = "PATH")]
    lockfile: Option<PathBuf>,

    /// Tolerate requirements that have no entry in the lockfile
    #[arg(long)]
    lockfile_partial: bool,

    /// Build policy: `never`, `missing`, `cascade`, `editable`, or a
    /// reference glob (repeatable)
    #[arg(long = "build", value_name = "POLICY")]
    build: Vec<String>,

    /// Check remotes for newer versions and revisions
    #[arg(long)]
    update: bool,

    /// Consult only these remotes, in the given order (repeatable)
    #[arg(short = 'r', long = "remote", value_name = "NAME")]
    remotes: Vec<String>,

    /// Substitute matching requirements: `pattern=replacement`
    /// (repeatable)
    #[arg(long = "replace-requires", value_name = "PATTERN=REF")]
    replace: Vec<String>,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Graph(args) => graph::run(args),
        Commands::Lock(args) => lock::run(args),
        Commands::List(args) => list::run(args),
        Commands::Upload(args) => upload::run(args).await,
    }
}

/// Opens the local cache store from the configured root.
pub(crate) fn open_cache() -> anyhow::Result<FileStore> {
    FileStore::open("Local Cache", &CONFIG.cache.root)
        .with_context(|| format!("could not open cache at `{}`", CONFIG.cache.root.display()))
}

/// Opens the configured remotes, restricted and reordered by `-r` flags
/// when given.
pub(crate) fn open_remotes(selected: &[String]) -> anyhow::Result<Vec<FileStore>> {
    let mut configured: Vec<(&str, PathBuf)> = CONFIG
        .remotes
        .iter()
        .map(|r| (r.name.as_str(), remote_path(&r.url)))
        .collect();
    if !selected.is_empty() {
        let mut picked = Vec::new();
        for name in selected {
            let entry = configured
                .iter()
                .position(|(n, _)| n == name)
                .with_context(|| format!("remote `{name}` is not configured"))?;
            picked.push(configured.remove(entry));
        }
        configured = picked;
    }
    configured
        .into_iter()
        .map(|(name, path)| {
            FileStore::open(name, &path)
                .with_context(|| format!("could not open remote `{name}`"))
        })
        .collect()
}

/// Finds one configured remote by name.
pub(crate) fn open_remote(name: &str) -> anyhow::Result<FileStore> {
    let remote = CONFIG
        .remotes
        .iter()
        .find(|r| r.name == name)
        .with_context(|| format!("remote `{name}` is not configured"))?;
    FileStore::open(&remote.name, &remote_path(&remote.url))
        .with_context(|| format!("could not open remote `{name}`"))
}

/// Resolves and annotates a graph from the shared arguments.
pub(crate) fn resolve_graph(
    cache: &FileStore,
    remotes: &[FileStore],
    args: &CommonArgs,
) -> anyhow::Result<Graph> {
    let requires = parse_requirements(&args.requires, RequirementKind::Requires)?;
    let tool_requires = parse_requirements(&args.tool_requires, RequirementKind::Tool)?;
    let settings = parse_kv(&args.settings)?;
    let options = parse_kv(&args.options)?;
    let lockfile = args
        .lockfile
        .as_deref()
        .map(Lockfile::load)
        .transpose()
        .context("could not load lockfile")?;

    let lookups: Vec<&dyn RemoteLookup> =
        remotes.iter().map(|r| r as &dyn RemoteLookup).collect();
    let mut builder = GraphBuilder::new(cache, cache)
        .remotes(lookups.clone())
        .profile(settings, options)
        .update(args.update, CONFIG.update_policy)
        .resplit(CONFIG.graph.build_resplit);
    if let Some(lockfile) = &lockfile {
        builder = builder.lockfile(lockfile, !args.lockfile_partial);
    }
    for rule in &args.replace {
        let (pattern, replacement) = rule
            .split_once('=')
            .with_context(|| format!("`{rule}` is not of the form `pattern=replacement`"))?;
        let replacement: Requirement = replacement
            .parse()
            .with_context(|| format!("invalid replacement `{replacement}`"))?;
        builder = builder.replace_requires(pattern, replacement);
    }

    let mut graph = builder.expand(requires, tool_requires)?;
    if graph.has_errors() {
        bail!("resolution failed:\n{}", graph.error_report());
    }

    BinaryAnnotator::new(cache, lookups)
        .policy(BuildPolicy::parse(&args.build))
        .update(args.update)
        .skip(CONFIG.graph.skip_test, CONFIG.graph.skip_build)
        .annotate(&mut graph)?;
    Ok(graph)
}

/// Fails when a binary is absent everywhere and not permitted to build.
pub(crate) fn ensure_buildable(graph: &Graph) -> anyhow::Result<()> {
    let missing: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.binary == Some(BinaryStatus::Missing))
        .map(|n| n.ref_.repr_with_revision())
        .collect();
    if !missing.is_empty() {
        bail!(
            "missing binaries for: {} (pass `--build missing` to build them)",
            missing.join(", ")
        );
    }
    Ok(())
}

fn parse_requirements(
    texts: &[String],
    kind: RequirementKind,
) -> anyhow::Result<Vec<Requirement>> {
    texts
        .iter()
        .map(|t| {
            Requirement::parse(t, kind).with_context(|| format!("invalid requirement `{t}`"))
        })
        .collect()
}

fn parse_kv(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("`{pair}` is not of the form `key=value`"))
        })
        .collect()
}

fn remote_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}
