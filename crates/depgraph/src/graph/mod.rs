//! # The Dependency Graph
//!
//! A resolved graph is a flat arena of [`Node`]s (index 0 is the root)
//! with outgoing [`Edge`]s carrying the requirement traits. Nodes are
//! deduplicated by `(reference, package_id, context)`; the same library
//! resolved for the host and for a build tool are distinct nodes that may
//! legitimately carry different versions.
//!
//! Expansion is a synchronous, single-threaded worklist: conflict
//! resolution is order-dependent (first-seen wins, closest to the root),
//! so requirements are processed in stable declaration order and the
//! algorithm is deliberately not parallel.
//!
//! Errors local to one branch (a recipe that fails to load, a range with
//! no satisfying candidate) are collected on the graph so a single pass
//! surfaces every independent problem; errors that leave the graph shape
//! ill-defined (cycles, duplicated requirements) abort immediately.

mod build;
#[cfg(test)]
mod test;

pub use build::GraphBuilder;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::loader::{Options, PackageType, RecipeInfo, Settings};
use crate::refs::{PackageId, RecipeReference};
use crate::require::{Requirement, RequirementTraits};

//================================================================================================
// Types
//================================================================================================

/// Which configuration a node is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// The machine the final artifacts run on.
    Host,
    /// The machine the build itself runs on (tool requirements).
    Build,
}

/// The availability of a node's binary after annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryStatus {
    /// Present in the local cache.
    Cache,
    /// Will be built locally per the build policy.
    Build,
    /// Present on a remote, to be downloaded.
    Download,
    /// A newer revision is available remotely under the update policy.
    Update,
    /// Absent everywhere and not permitted to build.
    Missing,
    /// Transitively unreachable at run time; not needed.
    Skip,
    /// The configuration contradicts the recipe's validity rules.
    Invalid,
    /// Locally editable source, no server-storable artifact.
    Editable,
    /// Provided by the platform, never fetched or built.
    Platform,
}

/// The lifecycle of a node during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created, not yet expanded.
    Pending,
    /// Currently having its requirements processed.
    Expanding,
    /// Fully expanded.
    Expanded,
    /// Expansion failed; the error lives on the graph.
    Error,
}

/// Index of a node within its graph.
pub type NodeIndex = usize;

/// An outgoing dependency edge.
#[derive(Debug, Clone)]
pub struct Edge {
    /// The requirement that produced this edge.
    pub require: Requirement,
    /// The target node.
    pub target: NodeIndex,
    /// Effective propagation traits after trait merging.
    pub traits: RequirementTraits,
}

/// One resolved package occurrence.
#[derive(Debug, Clone)]
pub struct Node {
    /// The resolved reference, with revision once known.
    pub ref_: RecipeReference,
    /// Host or build context.
    pub context: Context,
    /// Expansion state.
    pub state: NodeState,
    /// Loaded recipe metadata; empty for synthetic roots.
    pub recipe: RecipeInfo,
    /// The settings snapshot this node is resolved for.
    pub settings: Settings,
    /// The effective options (profile over recipe defaults).
    pub options: Options,
    /// Deduced or declared package type.
    pub package_type: PackageType,
    /// Computed in the second pass by the package id computer.
    pub package_id: Option<PackageId>,
    /// Determined alongside the package id.
    pub binary: Option<BinaryStatus>,
    /// How many times the build context may still re-split below this
    /// node.
    pub resplit_budget: u32,
    /// Outgoing edges in declaration order.
    pub edges: Vec<Edge>,
    /// Resolved recipe-only requirements; tracked per node, never nodes
    /// themselves.
    pub python_requires: Vec<RecipeReference>,
    /// True for the synthetic consumer/root node.
    pub is_root: bool,
}

/// A shape-level error that aborts expansion immediately.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Two branches require incompatible versions of one package.
    #[error(
        "version conflict on `{name}`: `{requirement1}` required by `{branch1}` \
         conflicts with `{requirement2}` required by `{branch2}`"
    )]
    Conflict {
        /// The conflicted package name.
        name: String,
        /// First requirement display form.
        requirement1: String,
        /// Node that declared the first requirement.
        branch1: String,
        /// Second requirement display form.
        requirement2: String,
        /// Node that declared the second requirement.
        branch2: String,
    },
    /// A requirement cycle between package nodes.
    #[error("dependency cycle detected:\n{}", edges.iter().map(|(a, b)| format!("    {a} requires {b}")).collect::<Vec<_>>().join("\n"))]
    Cycle {
        /// Every edge of the cycle, in traversal order.
        edges: Vec<(String, String)>,
    },
    /// Two requirements to the same reference with non-mergeable traits.
    #[error("duplicated requirement `{reference}` in `{node}`: {reason}")]
    DuplicatedRequirement {
        /// The doubly-required reference.
        reference: String,
        /// The node declaring both.
        node: String,
        /// Why the traits cannot merge.
        reason: String,
    },
    /// A lockfile in strict mode had no entry for a requirement.
    #[error(transparent)]
    Lockfile(#[from] crate::lock::LockfileError),
}

/// A branch-local failure recorded on the graph without stopping sibling
/// branches.
#[derive(Debug)]
pub struct BranchError {
    /// The requirement that failed to resolve.
    pub requirement: String,
    /// The chain of requiring nodes from the failure up to the root.
    pub required_by: Vec<String>,
    /// The underlying failure.
    pub reason: String,
}

/// The resolved dependency graph. Root is node 0.
#[derive(Debug, Default)]
pub struct Graph {
    /// All nodes; immutable once expansion finishes.
    pub nodes: Vec<Node>,
    /// Requirement substitutions applied by `replace_requires` rules,
    /// original pattern to actually used reference.
    pub replaced_requires: BTreeMap<String, String>,
    /// Branch-local failures gathered during the pass.
    pub errors: Vec<BranchError>,
}

//================================================================================================
// Impls
//================================================================================================

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Host => f.write_str("host"),
            Context::Build => f.write_str("build"),
        }
    }
}

impl BinaryStatus {
    /// Statuses with no server-storable artifact behind them.
    pub fn is_synthetic(self) -> bool {
        matches!(
            self,
            BinaryStatus::Editable | BinaryStatus::Platform | BinaryStatus::Invalid
        )
    }
}

impl Node {
    /// A synthetic root node carrying the command line (or consumer
    /// recipe) requirements.
    pub fn root(recipe: RecipeInfo, settings: Settings, options: Options, resplit: u32) -> Self {
        Node {
            ref_: RecipeReference::new("_", "0".parse().unwrap_or_else(|_| unreachable!())),
            context: Context::Host,
            state: NodeState::Pending,
            recipe,
            settings,
            options,
            package_type: PackageType::Unknown,
            package_id: None,
            binary: None,
            resplit_budget: resplit,
            edges: Vec::new(),
            python_requires: Vec::new(),
            is_root: true,
        }
    }

    /// Display name used in "required by" chains.
    pub fn display(&self) -> String {
        if self.is_root {
            "consumer".to_string()
        } else {
            self.ref_.repr()
        }
    }

    /// Direct dependencies, in edge order.
    pub fn dependencies(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.edges.iter().map(|e| e.target)
    }
}

impl Graph {
    /// The root node.
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Whether any branch error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Nodes in the given context, excluding the root.
    pub fn nodes_in(&self, context: Context) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter(move |(_, n)| n.context == context)
    }

    /// Finds a non-root node by name and context.
    pub fn find(&self, name: &str, context: Context) -> Option<(NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, n)| n.ref_.name == name && n.context == context)
    }

    /// The indices of all nodes reachable from `start`, including itself,
    /// in breadth-first order.
    pub fn reachable(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = std::collections::VecDeque::from([start]);
        let mut out = Vec::new();
        seen[start] = true;
        while let Some(idx) = queue.pop_front() {
            out.push(idx);
            for dep in self.nodes[idx].dependencies() {
                if !seen[dep] {
                    seen[dep] = true;
                    queue.push_back(dep);
                }
            }
        }
        out
    }

    /// Renders every branch error with its "required by" chain.
    pub fn error_report(&self) -> String {
        self.errors
            .iter()
            .map(|e| {
                let chain = e
                    .required_by
                    .iter()
                    .map(|n| format!("required by {n}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {} ({chain})", e.requirement, e.reason)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
