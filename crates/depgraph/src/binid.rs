//! # Binary Identity and Status
//!
//! The second resolution pass: once the graph shape is final, every node
//! gets a deterministic package id derived from its settings, options and
//! the package-id-relevant subset of its dependencies, and a binary
//! status describing where (or whether) the matching binary exists.
//!
//! The digest is a blake3 hash of a canonical, sorted `key=value`
//! rendering, hex-encoded. It is a persisted identifier shared across
//! machines and CI, so the rendering must stay byte-for-byte stable.
//!
//! Dependency contributions honor the per-requirement [`DepIdMode`]
//! (falling back to the consumer recipe's default, then to
//! [`DepIdMode::Semver`]). A mode is deliberately not transitive: the
//! dependency's own mode choices never leak into the consumer beyond the
//! declared contribution.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{BinaryStatus, Graph, NodeIndex, NodeState};
use crate::loader::{LoaderError, PackageType, RemoteLookup};
use crate::refs::{PackageId, PkgReference};


//================================================================================================
// Types
//================================================================================================

/// How much of a dependency flows into the consumer's package id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepIdMode {
    /// The dependency does not affect the consumer's binary at all.
    Unrelated,
    /// Only the dependency's major version.
    Major,
    /// Major and minor.
    Minor,
    /// Major, minor and patch.
    Patch,
    /// The full version, all segments.
    FullVersion,
    /// The full reference including the recipe revision.
    RecipeRevision,
    /// Reference, revision and the dependency's own package id.
    Full,
    /// The default: major+minor, treating patch releases as compatible.
    Semver,
}

/// The `--build` policy controlling which binaries are (re)built.
#[derive(Debug, Clone, Default)]
pub struct BuildPolicy {
    /// Never build anything, even if missing.
    pub never: bool,
    /// Build whatever is missing from cache and remotes.
    pub missing: bool,
    /// Rebuild consumers of anything rebuilt.
    pub cascade: bool,
    /// Rebuild packages in editable mode from their local source trees.
    pub editable: bool,
    /// Build references matching any of these glob patterns.
    pub patterns: Vec<String>,
}

/// Annotates a resolved graph with package ids and binary statuses.
pub struct BinaryAnnotator<'a> {
    cache: &'a dyn RemoteLookup,
    remotes: Vec<&'a dyn RemoteLookup>,
    policy: BuildPolicy,
    update: bool,
    skip_test: bool,
    skip_build: bool,
}

//================================================================================================
// Impls
//================================================================================================

impl DepIdMode {
    /// Renders one dependency's contribution line, or `None` for
    /// [`DepIdMode::Unrelated`].
    fn contribution(self, graph: &Graph, target: NodeIndex) -> Option<String> {
        let node = &graph.nodes[target];
        let ref_ = &node.ref_;
        match self {
            DepIdMode::Unrelated => None,
            DepIdMode::Major => Some(format!("{}/{}", ref_.name, ref_.version.truncate(1))),
            DepIdMode::Minor | DepIdMode::Semver => {
                Some(format!("{}/{}", ref_.name, ref_.version.truncate(2)))
            },
            DepIdMode::Patch => Some(format!("{}/{}", ref_.name, ref_.version.truncate(3))),
            DepIdMode::FullVersion => Some(format!("{}/{}", ref_.name, ref_.version)),
            DepIdMode::RecipeRevision => Some(ref_.repr_with_revision()),
            DepIdMode::Full => {
                let mut line = ref_.repr_with_revision();
                if let Some(id) = &node.package_id {
                    line.push(':');
                    line.push_str(id.as_str());
                }
                Some(line)
            },
        }
    }
}

impl BuildPolicy {
    /// Parses repeated `--build` values: `never`, `missing`, `cascade`,
    /// `editable`, or a reference glob pattern.
    pub fn parse(values: &[String]) -> Self {
        let mut policy = BuildPolicy::default();
        for value in values {
            match value.as_str() {
                "never" => policy.never = true,
                "missing" => policy.missing = true,
                "cascade" => policy.cascade = true,
                "editable" => policy.editable = true,
                pattern => policy.patterns.push(pattern.to_string()),
            }
        }
        policy
    }

    fn wants(&self, node: &crate::graph::Node) -> bool {
        !self.never
            && self
                .patterns
                .iter()
                .any(|p| node.ref_.matches(p, node.is_root))
    }
}

impl<'a> BinaryAnnotator<'a> {
    /// Creates an annotator over the cache and ordered remotes.
    pub fn new(cache: &'a dyn RemoteLookup, remotes: Vec<&'a dyn RemoteLookup>) -> Self {
        BinaryAnnotator {
            cache,
            remotes,
            policy: BuildPolicy::default(),
            update: false,
            skip_test: true,
            skip_build: true,
        }
    }

    /// Sets the build policy.
    pub fn policy(mut self, policy: BuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checks remotes for newer binaries even when the cache has one.
    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Skip policies for test and build requirements.
    pub fn skip(mut self, skip_test: bool, skip_build: bool) -> Self {
        self.skip_test = skip_test;
        self.skip_build = skip_build;
        self
    }

    /// Computes every node's package id, then its binary status.
    ///
    /// Both passes run dependency-first so that `Full`-mode
    /// contributions and cascade rebuilds see their dependencies already
    /// annotated.
    pub fn annotate(&self, graph: &mut Graph) -> Result<(), LoaderError> {
        let order = post_order(graph);
        for &idx in &order {
            if graph.nodes[idx].is_root || graph.nodes[idx].state != NodeState::Expanded {
                continue;
            }
            graph.nodes[idx].package_type = deduce_package_type(&graph.nodes[idx]);
            let id = compute_package_id(graph, idx);
            debug!(node = %graph.nodes[idx].ref_, package_id = %id, "package id computed");
            graph.nodes[idx].package_id = Some(id);
        }

        let skipped = self.skipped_nodes(graph);
        for &idx in &order {
            if graph.nodes[idx].is_root || graph.nodes[idx].state != NodeState::Expanded {
                continue;
            }
            let status = if skipped[idx] {
                BinaryStatus::Skip
            } else {
                self.status_of(graph, idx)?
            };
            graph.nodes[idx].binary = Some(status);
        }
        Ok(())
    }

    /// Marks nodes unreachable through non-skippable edges.
    ///
    /// A test requirement (under `skip_test`), a build requirement of an
    /// already satisfied consumer (under `skip_build`), and a private
    /// dependency that exposes neither headers, libs nor a runtime need
    /// are all skippable; a node every path to which is skippable gets
    /// the Skip status.
    fn skipped_nodes(&self, graph: &Graph) -> Vec<bool> {
        let mut needed = vec![false; graph.nodes.len()];
        let mut queue = std::collections::VecDeque::from([0usize]);
        needed[0] = true;
        while let Some(idx) = queue.pop_front() {
            for edge in &graph.nodes[idx].edges {
                let skippable = (edge.traits.test && self.skip_test && !graph.nodes[idx].is_root)
                    || (edge.traits.build && self.skip_build && !graph.nodes[idx].is_root)
                    || (!edge.traits.headers
                        && !edge.traits.libs
                        && !edge.traits.run
                        && !edge.traits.build
                        && !edge.traits.test
                        && !edge.traits.visible);
                if !skippable && !needed[edge.target] {
                    needed[edge.target] = true;
                    queue.push_back(edge.target);
                }
            }
        }
        needed.iter().map(|n| !n).collect()
    }

    /// Availability lookup for one node, honoring the build policy.
    fn status_of(&self, graph: &Graph, idx: NodeIndex) -> Result<BinaryStatus, LoaderError> {
        let node = &graph.nodes[idx];
        if node.recipe.platform {
            return Ok(BinaryStatus::Platform);
        }
        if node.recipe.editable {
            if self.policy.editable && !self.policy.never {
                return Ok(BinaryStatus::Build);
            }
            return Ok(BinaryStatus::Editable);
        }
        if !node.recipe.validity_errors.is_empty() {
            return Ok(BinaryStatus::Invalid);
        }
        if self.policy.wants(node) {
            return Ok(BinaryStatus::Build);
        }
        if self.policy.cascade {
            let rebuilt = node.dependencies().any(|dep| {
                matches!(graph.nodes[dep].binary, Some(BinaryStatus::Build))
            });
            if rebuilt {
                return Ok(BinaryStatus::Build);
            }
        }

        let package_id = node
            .package_id
            .clone()
            .unwrap_or_else(|| PackageId::new(""));
        let pref = PkgReference::new(node.ref_.clone(), package_id);
        if self.cache.has_package(&pref)? {
            if self.update && self.newer_on_remote(&pref)? {
                return Ok(BinaryStatus::Update);
            }
            return Ok(BinaryStatus::Cache);
        }
        for remote in &self.remotes {
            if remote.has_package(&pref)? {
                return Ok(BinaryStatus::Download);
            }
        }
        if self.policy.missing && !self.policy.never {
            return Ok(BinaryStatus::Build);
        }
        Ok(BinaryStatus::Missing)
    }

    /// Whether any remote holds a package revision newer than the
    /// cache's.
    fn newer_on_remote(&self, pref: &PkgReference) -> Result<bool, LoaderError> {
        let local = self
            .cache
            .package_revisions(pref)?
            .into_iter()
            .next()
            .and_then(|p| p.timestamp)
            .unwrap_or(0.0);
        for remote in &self.remotes {
            if let Some(latest) = remote.package_revisions(pref)?.into_iter().next() {
                if latest.timestamp.unwrap_or(0.0) > local {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Dependency-first traversal order over the (acyclic) graph.
fn post_order(graph: &Graph) -> Vec<NodeIndex> {
    fn visit(graph: &Graph, idx: NodeIndex, seen: &mut Vec<bool>, out: &mut Vec<NodeIndex>) {
        seen[idx] = true;
        for dep in graph.nodes[idx].dependencies() {
            if !seen[dep] {
                visit(graph, dep, seen, out);
            }
        }
        out.push(idx);
    }
    let mut seen = vec![false; graph.nodes.len()];
    let mut out = Vec::new();
    visit(graph, 0, &mut seen, &mut out);
    // Nodes detached by branch errors still deserve deterministic output.
    for idx in 0..graph.nodes.len() {
        if !seen[idx] {
            visit(graph, idx, &mut seen, &mut out);
        }
    }
    out
}

/// Deduces the package type from `shared`/`header_only` options unless
/// the recipe declares one or manages its own options.
fn deduce_package_type(node: &crate::graph::Node) -> PackageType {
    if let Some(declared) = node.recipe.package_type {
        return declared;
    }
    if node.recipe.manages_options {
        return PackageType::Unknown;
    }
    match (
        node.options.get("header_only").map(String::as_str),
        node.options.get("shared").map(String::as_str),
    ) {
        (Some("True"), _) => PackageType::HeaderLibrary,
        (_, Some("True")) => PackageType::SharedLibrary,
        (_, Some("False")) => PackageType::StaticLibrary,
        _ => PackageType::Unknown,
    }
}

/// Renders the canonical identity text for one node and hashes it.
///
/// The rendering is sorted and line-oriented; any change to it changes
/// every persisted package id in the world, so treat it as a wire
/// format.
fn compute_package_id(graph: &Graph, idx: NodeIndex) -> PackageId {
    let node = &graph.nodes[idx];
    let mut text = String::new();

    // Header-only libraries collapse all configurations into one binary
    // unless the recipe opted out by declaring its own package type.
    let header_collapse =
        node.package_type == PackageType::HeaderLibrary && node.recipe.package_type.is_none();

    if !header_collapse {
        let _ = writeln!(text, "[settings]");
        for (key, value) in &node.settings {
            if node.recipe.settings_irrelevant.iter().any(|s| s == key) {
                continue;
            }
            let _ = writeln!(text, "{key}={value}");
        }
        let _ = writeln!(text, "[options]");
        for (key, value) in &node.options {
            let _ = writeln!(text, "{key}={value}");
        }
        let _ = writeln!(text, "[requires]");
        let mut lines: Vec<String> = Vec::new();
        for edge in &node.edges {
            // Tool and test requirements do not shape the binary.
            if edge.traits.build || edge.traits.test {
                continue;
            }
            let mode = edge
                .require
                .package_id_mode
                .or(node.recipe.default_id_mode)
                .unwrap_or(DepIdMode::Semver);
            if let Some(line) = mode.contribution(graph, edge.target) {
                lines.push(line);
            }
        }
        lines.sort();
        for line in lines {
            let _ = writeln!(text, "{line}");
        }
    }

    let digest = blake3::hash(text.as_bytes());
    PackageId::new(hex::encode(&digest.as_bytes()[..20]))
}
