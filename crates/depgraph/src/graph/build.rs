//! # Worklist Graph Expansion
//!
//! [`GraphBuilder`] turns a root set of requirements into a resolved
//! [`Graph`]. The expansion is breadth-first over a worklist of pending
//! nodes; requirements are processed in declaration order, and the
//! first-seen resolution of a name within a context wins later
//! tie-breaks. That order dependence is an intentional, load-bearing
//! property: changing the traversal order silently changes resolution
//! outcomes for existing recipes.
//!
//! Per requirement, resolution applies, in order:
//!
//! 1. `replace_requires` substitution rules,
//! 2. ancestor `override`/`force` requirements,
//! 3. the lockfile (pinning ranges to locked revisions; failing in
//!    strict mode),
//! 4. version-range resolution against cache and remote candidates,
//! 5. reconciliation against the already-expanded graph: requirements
//!    contend only within one name, user/channel namespace and context,
//!    and only when visible; two disagreeing ranges are re-resolved
//!    against their intersection, while a pin on either side conflicts.

use std::collections::{BTreeMap, VecDeque};

use config::UpdatePolicy;
use tracing::debug;

use super::{BranchError, Context, Edge, Graph, GraphError, Node, NodeIndex, NodeState};
use crate::loader::{
    self, Options, PackageType, RecipeLoader, RemoteLookup, Settings, gather_candidates,
};
use crate::lock::Lockfile;
use crate::refs::RecipeReference;
use crate::require::Requirement;
use crate::version::VersionSpec;

//================================================================================================
// Types
//================================================================================================

/// A `replace_requires` profile rule.
#[derive(Debug, Clone)]
struct ReplaceRule {
    pattern: String,
    replacement: Requirement,
}

/// Per-name resolution record for conflict detection, scoped by
/// user/channel namespace and context.
struct ResolvedName {
    node: NodeIndex,
    /// The accumulated version constraint: the first pin, or the
    /// intersection of every range seen so far.
    spec: VersionSpec,
    /// The requirement display form that first resolved this name.
    first_requirement: String,
    /// The node that declared it.
    first_branch: String,
}

/// Key of the winning-resolution map: requirements only contend when
/// name, user/channel namespace and context all agree.
type ResolvedKey = (String, Option<String>, Option<String>, Context);

/// Builds dependency graphs against injected loader and lookup
/// collaborators.
pub struct GraphBuilder<'a> {
    loader: &'a dyn RecipeLoader,
    cache: &'a dyn RemoteLookup,
    remotes: Vec<&'a dyn RemoteLookup>,
    lockfile: Option<&'a Lockfile>,
    lockfile_strict: bool,
    update: bool,
    update_policy: UpdatePolicy,
    settings: Settings,
    options: Options,
    replace: Vec<ReplaceRule>,
    resplit: u32,
}

/// Builder-internal per-node bookkeeping that does not belong on the
/// public [`Node`].
struct NodeMeta {
    parent: Option<NodeIndex>,
    /// Overrides inherited from ancestors plus this node's own.
    overrides: BTreeMap<String, Requirement>,
}

//================================================================================================
// Impls
//================================================================================================

impl<'a> GraphBuilder<'a> {
    /// Creates a builder over a loader and the local cache lookup.
    pub fn new(loader: &'a dyn RecipeLoader, cache: &'a dyn RemoteLookup) -> Self {
        GraphBuilder {
            loader,
            cache,
            remotes: Vec::new(),
            lockfile: None,
            lockfile_strict: false,
            update: false,
            update_policy: UpdatePolicy::NewestTimestamp,
            settings: Settings::new(),
            options: Options::new(),
            replace: Vec::new(),
            resplit: 1,
        }
    }

    /// Adds remote lookups, in query order.
    pub fn remotes(mut self, remotes: Vec<&'a dyn RemoteLookup>) -> Self {
        self.remotes = remotes;
        self
    }

    /// Applies a lockfile during resolution.
    pub fn lockfile(mut self, lockfile: &'a Lockfile, strict: bool) -> Self {
        self.lockfile = Some(lockfile);
        self.lockfile_strict = strict;
        self
    }

    /// Forces candidate gathering across all sources instead of
    /// short-circuiting on the first hit.
    pub fn update(mut self, update: bool, policy: UpdatePolicy) -> Self {
        self.update = update;
        self.update_policy = policy;
        self
    }

    /// The active profile settings and options.
    pub fn profile(mut self, settings: Settings, options: Options) -> Self {
        self.settings = settings;
        self.options = options;
        self
    }

    /// Adds a `replace_requires` rule: requirements matching `pattern`
    /// (a `name/version` glob) are substituted by `replacement` before
    /// conflict detection.
    pub fn replace_requires(
        mut self,
        pattern: impl Into<String>,
        replacement: Requirement,
    ) -> Self {
        self.replace.push(ReplaceRule {
            pattern: pattern.into(),
            replacement,
        });
        self
    }

    /// How many times the build context may re-split into nested tool
    /// requirements (default 1).
    pub fn resplit(mut self, budget: u32) -> Self {
        self.resplit = budget;
        self
    }

    /// Expands the full graph from the root requirement lists.
    ///
    /// # Errors
    ///
    /// Shape-level problems (cycles, duplicated requirements, strict
    /// lockfile misses, conflicts) fail immediately; branch-local
    /// problems are collected on [`Graph::errors`] so every independent
    /// failure surfaces in one pass.
    pub fn expand(
        self,
        requires: Vec<Requirement>,
        tool_requires: Vec<Requirement>,
    ) -> Result<Graph, GraphError> {
        let recipe = crate::loader::RecipeInfo {
            requires,
            tool_requires,
            ..Default::default()
        };
        let mut graph = Graph::default();
        graph.nodes.push(Node::root(
            recipe,
            self.settings.clone(),
            self.options.clone(),
            self.resplit,
        ));
        let mut meta = vec![NodeMeta {
            parent: None,
            overrides: BTreeMap::new(),
        }];
        // Winning resolution per name/namespace/context, for conflict
        // tie-breaks and range narrowing.
        let mut resolved: BTreeMap<ResolvedKey, ResolvedName> = BTreeMap::new();

        let mut worklist: VecDeque<NodeIndex> = VecDeque::from([0]);
        while let Some(idx) = worklist.pop_front() {
            graph.nodes[idx].state = NodeState::Expanding;

            if !graph.nodes[idx].is_root {
                let node = &graph.nodes[idx];
                match self.loader.load(&node.ref_, &node.settings, &node.options) {
                    Ok(info) => {
                        let node = &mut graph.nodes[idx];
                        node.options = effective_options(
                            &node.ref_.name,
                            &info.default_options,
                            &self.options,
                        );
                        node.recipe = info;
                    },
                    Err(e) => {
                        graph.nodes[idx].state = NodeState::Error;
                        let chain = match meta[idx].parent {
                            Some(parent) => requirement_chain(&graph, &meta, parent),
                            None => Vec::new(),
                        };
                        graph.errors.push(BranchError {
                            requirement: graph.nodes[idx].ref_.repr(),
                            required_by: chain,
                            reason: e.to_string(),
                        });
                        continue;
                    },
                }
            }

            // Collect this node's own overrides before expanding edges so
            // they apply to its entire subtree.
            let own_overrides: Vec<Requirement> = graph.nodes[idx]
                .recipe
                .all_requires()
                .filter(|r| r.traits.override_)
                .cloned()
                .collect();
            for o in own_overrides {
                meta[idx].overrides.insert(o.name.clone(), o);
            }

            self.resolve_python_requires(&mut graph, &mut meta, idx)?;

            let declared: Vec<Requirement> = graph.nodes[idx]
                .recipe
                .all_requires()
                .filter(|r| !r.traits.override_)
                .cloned()
                .collect();

            let mut declared_names: BTreeMap<String, String> = BTreeMap::new();
            for require in declared {
                // Two requirements to the same name from one node must
                // agree; differing pins are not mergeable.
                let display = require.display_ref();
                if let Some(previous) = declared_names.get(&require.name) {
                    if previous != &display {
                        return Err(GraphError::DuplicatedRequirement {
                            reference: require.name.clone(),
                            node: graph.nodes[idx].display(),
                            reason: format!("`{previous}` vs `{display}`"),
                        });
                    }
                    continue;
                }
                declared_names.insert(require.name.clone(), display);

                match self.expand_edge(&mut graph, &mut meta, &mut resolved, idx, require)? {
                    Some(child) => worklist.push_back(child),
                    None => {},
                }
            }

            if graph.nodes[idx].state != NodeState::Error {
                graph.nodes[idx].state = NodeState::Expanded;
            }
        }
        Ok(graph)
    }

    /// Processes one declared requirement of `parent`, creating or
    /// reusing the target node. Returns the index of a newly created
    /// (pending) node.
    fn expand_edge(
        &self,
        graph: &mut Graph,
        meta: &mut Vec<NodeMeta>,
        resolved: &mut BTreeMap<ResolvedKey, ResolvedName>,
        parent: NodeIndex,
        mut require: Requirement,
    ) -> Result<Option<NodeIndex>, GraphError> {
        // Tool requirements always recurse in build context. Below the
        // first re-split the build context stops splitting further.
        let parent_node = &graph.nodes[parent];
        let (context, budget) = if require.traits.build {
            if parent_node.context == Context::Build && parent_node.resplit_budget == 0 {
                debug!(requirement = %require, "build context re-split budget exhausted, skipping");
                return Ok(None);
            }
            let budget = if parent_node.context == Context::Build {
                parent_node.resplit_budget - 1
            } else {
                parent_node.resplit_budget
            };
            (Context::Build, budget)
        } else {
            (parent_node.context, parent_node.resplit_budget)
        };

        self.apply_replacements(graph, &mut require);
        apply_override(&meta[parent].overrides, &mut require);
        let locked_timestamp = self.apply_lockfile(&mut require)?;

        // Resolve the concrete version.
        let version = match &require.spec {
            VersionSpec::Exact(v) => v.clone(),
            VersionSpec::Range(range) => {
                let candidates = match gather_candidates(
                    &require.name,
                    self.cache,
                    &self.remotes,
                    self.update,
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        self.record_branch_error(graph, meta, parent, &require, e.to_string());
                        return Ok(None);
                    },
                };
                match range.resolve(candidates.iter()) {
                    Ok(v) => v.clone(),
                    Err(e) => {
                        self.record_branch_error(graph, meta, parent, &require, e.to_string());
                        return Ok(None);
                    },
                }
            },
        };

        let mut ref_ = RecipeReference {
            name: require.name.clone(),
            version,
            user: require.user.clone(),
            channel: require.channel.clone(),
            revision: require.revision.clone(),
            timestamp: locked_timestamp,
        };
        if ref_.revision.is_none() {
            if let Ok(Some(latest)) = loader::select_latest_revision(
                &ref_,
                self.cache,
                &self.remotes,
                self.update_policy,
            ) {
                ref_.revision = latest.revision;
                ref_.timestamp = latest.timestamp;
            }
        }

        // Non-visible requirements are private to the requiring branch:
        // they reuse an identical resolution when one exists but never
        // contend with (or narrow) other branches' choices.
        if !require.traits.visible {
            let existing = graph
                .nodes
                .iter()
                .position(|n| !n.is_root && n.context == context && n.ref_ == ref_);
            if let Some(target) = existing {
                self.check_cycle(graph, parent, target)?;
                let traits = require.traits;
                graph.nodes[parent].edges.push(Edge {
                    require,
                    target,
                    traits,
                });
                return Ok(None);
            }
        } else {
            let key = (
                require.name.clone(),
                require.user.clone(),
                require.channel.clone(),
                context,
            );
            if let Some(winner) = resolved.get_mut(&key) {
                let target = winner.node;
                let conflict = GraphError::Conflict {
                    name: require.name.clone(),
                    requirement1: winner.first_requirement.clone(),
                    branch1: winner.first_branch.clone(),
                    requirement2: require.display_ref(),
                    branch2: graph.nodes[parent].display(),
                };
                if require.satisfied_by(&graph.nodes[target].ref_) {
                    // Keep narrowing the accumulated range so a later
                    // sibling is checked against every constraint.
                    if let (VersionSpec::Range(a), VersionSpec::Range(b)) =
                        (&winner.spec, &require.spec)
                    {
                        winner.spec = VersionSpec::Range(a.intersect(b));
                    }
                } else {
                    // Two ranges that disagree on the resolved version are
                    // re-resolved against their intersection; a pin on
                    // either side is non-negotiable.
                    let merged = match (&winner.spec, &require.spec) {
                        (VersionSpec::Range(a), VersionSpec::Range(b)) => a.intersect(b),
                        _ => return Err(conflict),
                    };
                    if graph.nodes[target].state != NodeState::Pending {
                        return Err(conflict);
                    }
                    let candidates = match gather_candidates(
                        &require.name,
                        self.cache,
                        &self.remotes,
                        self.update,
                    ) {
                        Ok(c) => c,
                        Err(_) => return Err(conflict),
                    };
                    let version = match merged.resolve(candidates.iter()) {
                        Ok(v) => v.clone(),
                        Err(_) => return Err(conflict),
                    };
                    debug!(
                        requirement = %require,
                        narrowed = %merged,
                        %version,
                        "re-resolved against intersected range"
                    );
                    let node = &mut graph.nodes[target];
                    node.ref_.version = version;
                    node.ref_.revision = require.revision.clone();
                    node.ref_.timestamp = None;
                    if node.ref_.revision.is_none() {
                        let unrevisioned = node.ref_.clone();
                        if let Ok(Some(latest)) = loader::select_latest_revision(
                            &unrevisioned,
                            self.cache,
                            &self.remotes,
                            self.update_policy,
                        ) {
                            let node = &mut graph.nodes[target];
                            node.ref_.revision = latest.revision;
                            node.ref_.timestamp = latest.timestamp;
                        }
                    }
                    winner.spec = VersionSpec::Range(merged);
                }
                self.check_cycle(graph, parent, target)?;
                let traits = require.traits;
                graph.nodes[parent].edges.push(Edge {
                    require,
                    target,
                    traits,
                });
                return Ok(None);
            }
        }

        debug!(requirement = %require, reference = %ref_.repr_with_revision(), %context, "resolved");

        let child = graph.nodes.len();
        graph.nodes.push(Node {
            ref_,
            context,
            state: NodeState::Pending,
            recipe: Default::default(),
            settings: self.settings.clone(),
            options: Options::new(),
            package_type: PackageType::Unknown,
            package_id: None,
            binary: None,
            resplit_budget: budget,
            edges: Vec::new(),
            python_requires: Vec::new(),
            is_root: false,
        });
        meta.push(NodeMeta {
            parent: Some(parent),
            overrides: meta[parent].overrides.clone(),
        });
        if require.traits.visible {
            let key = (
                require.name.clone(),
                require.user.clone(),
                require.channel.clone(),
                context,
            );
            resolved.insert(key, ResolvedName {
                node: child,
                spec: require.spec.clone(),
                first_requirement: require.display_ref(),
                first_branch: graph.nodes[parent].display(),
            });
        }
        let traits = require.traits;
        graph.nodes[parent].edges.push(Edge {
            require,
            target: child,
            traits,
        });
        Ok(Some(child))
    }

    /// Resolves the node's recipe-only requirements. These never create
    /// nodes but must still respect the lockfile.
    fn resolve_python_requires(
        &self,
        graph: &mut Graph,
        meta: &mut [NodeMeta],
        idx: NodeIndex,
    ) -> Result<(), GraphError> {
        let pythons: Vec<Requirement> = graph.nodes[idx].recipe.python_requires.clone();
        for mut require in pythons {
            let locked_timestamp = self.apply_lockfile(&mut require)?;
            let version = match &require.spec {
                VersionSpec::Exact(v) => v.clone(),
                VersionSpec::Range(range) => {
                    let candidates = match gather_candidates(
                        &require.name,
                        self.cache,
                        &self.remotes,
                        self.update,
                    ) {
                        Ok(c) => c,
                        Err(e) => {
                            self.record_branch_error(graph, meta, idx, &require, e.to_string());
                            continue;
                        },
                    };
                    match range.resolve(candidates.iter()) {
                        Ok(v) => v.clone(),
                        Err(e) => {
                            self.record_branch_error(graph, meta, idx, &require, e.to_string());
                            continue;
                        },
                    }
                },
            };
            let mut ref_ = RecipeReference {
                name: require.name.clone(),
                version,
                user: require.user.clone(),
                channel: require.channel.clone(),
                revision: require.revision.clone(),
                timestamp: locked_timestamp,
            };
            if ref_.revision.is_none() {
                if let Ok(Some(latest)) = loader::select_latest_revision(
                    &ref_,
                    self.cache,
                    &self.remotes,
                    self.update_policy,
                ) {
                    ref_.revision = latest.revision;
                    ref_.timestamp = latest.timestamp;
                }
            }
            graph.nodes[idx].python_requires.push(ref_);
        }
        Ok(())
    }

    /// Substitutes the requirement if a `replace_requires` rule matches,
    /// recording the substitution on the graph for generators.
    fn apply_replacements(&self, graph: &mut Graph, require: &mut Requirement) {
        for rule in &self.replace {
            let (name_glob, version_glob) = match rule.pattern.split_once('/') {
                Some((n, v)) => (n, v),
                None => (rule.pattern.as_str(), "*"),
            };
            if !glob_match(name_glob, &require.name) {
                continue;
            }
            let spec_text = require.spec.to_string();
            if version_glob != "*" && !glob_match(version_glob, &spec_text) {
                continue;
            }
            debug!(pattern = %rule.pattern, replacement = %rule.replacement, "replace_requires applied");
            graph
                .replaced_requires
                .insert(rule.pattern.clone(), rule.replacement.display_ref());
            require.name = rule.replacement.name.clone();
            require.spec = rule.replacement.spec.clone();
            require.user = rule.replacement.user.clone();
            require.channel = rule.replacement.channel.clone();
            require.revision = rule.replacement.revision.clone();
            return;
        }
    }

    /// Pins the requirement from the lockfile when an entry matches.
    /// Returns the pin's timestamp so the resolved reference keeps it.
    fn apply_lockfile(&self, require: &mut Requirement) -> Result<Option<f64>, GraphError> {
        let lockfile = match self.lockfile {
            Some(l) => l,
            None => return Ok(None),
        };
        match lockfile.resolve(require) {
            Some(locked) => {
                debug!(requirement = %require, locked = %locked.repr_with_revision(), "pinned from lockfile");
                require.spec = VersionSpec::Exact(locked.version.clone());
                require.revision = locked.revision.clone();
                Ok(locked.timestamp)
            },
            None if self.lockfile_strict => Err(GraphError::Lockfile(
                crate::lock::LockfileError::RequirementNotInLockfile(require.display_ref()),
            )),
            None => Ok(None),
        }
    }

    /// Fails with a [`GraphError::Cycle`] enumerating every edge when
    /// the proposed edge `parent -> target` would close a loop, i.e.
    /// when `parent` is already reachable from `target`.
    fn check_cycle(
        &self,
        graph: &Graph,
        parent: NodeIndex,
        target: NodeIndex,
    ) -> Result<(), GraphError> {
        let path = match find_path(graph, target, parent) {
            Some(p) => p,
            None => return Ok(()),
        };
        let mut edges: Vec<(String, String)> = path
            .windows(2)
            .map(|w| (graph.nodes[w[0]].display(), graph.nodes[w[1]].display()))
            .collect();
        edges.push((graph.nodes[parent].display(), graph.nodes[target].display()));
        Err(GraphError::Cycle { edges })
    }

    fn record_branch_error(
        &self,
        graph: &mut Graph,
        meta: &[NodeMeta],
        node: NodeIndex,
        require: &Requirement,
        reason: String,
    ) {
        let chain = requirement_chain(graph, meta, node);
        tracing::warn!(requirement = %require, %reason, "branch failed, continuing siblings");
        graph.errors.push(BranchError {
            requirement: require.display_ref(),
            required_by: chain,
            reason,
        });
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Depth-first path from `from` to `to` following edges, if one exists.
fn find_path(graph: &Graph, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
    fn dfs(
        graph: &Graph,
        current: NodeIndex,
        to: NodeIndex,
        seen: &mut Vec<bool>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == to {
            return true;
        }
        seen[current] = true;
        for dep in graph.nodes[current].dependencies() {
            if !seen[dep] && dfs(graph, dep, to, seen, path) {
                return true;
            }
        }
        path.pop();
        false
    }
    let mut seen = vec![false; graph.nodes.len()];
    let mut path = Vec::new();
    if dfs(graph, from, to, &mut seen, &mut path) {
        Some(path)
    } else {
        None
    }
}

/// The chain of requiring nodes from `node` up to the root, for
/// "required by X, which is required by Y" diagnostics.
fn requirement_chain(graph: &Graph, meta: &[NodeMeta], node: NodeIndex) -> Vec<String> {
    let mut chain = vec![graph.nodes[node].display()];
    let mut cursor = node;
    while let Some(parent) = meta[cursor].parent {
        chain.push(graph.nodes[parent].display());
        cursor = parent;
    }
    chain
}

/// Substitutes version/revision from an ancestor override. A plain
/// override only replaces unpinned requirements; a forced one always
/// wins.
fn apply_override(overrides: &BTreeMap<String, Requirement>, require: &mut Requirement) {
    let o = match overrides.get(&require.name) {
        Some(o) => o,
        None => return,
    };
    if require.spec.exact().is_some() && !o.traits.force {
        return;
    }
    debug!(requirement = %require, replacement = %o, "override applied");
    require.spec = o.spec.clone();
    require.revision = o.revision.clone();
}

/// Recipe option defaults overlaid with profile options. Profile keys of
/// the form `name:key` target a single package; plain keys apply
/// globally.
fn effective_options(name: &str, defaults: &Options, profile: &Options) -> Options {
    let mut out = defaults.clone();
    for (key, value) in profile {
        match key.split_once(':') {
            Some((pkg, opt)) if pkg == name => {
                out.insert(opt.to_string(), value.clone());
            },
            Some(_) => {},
            None => {
                out.insert(key.clone(), value.clone());
            },
        }
    }
    out
}

/// Minimal `*`/`?` glob matching for replacement patterns.
fn glob_match(glob: &str, text: &str) -> bool {
    fn inner(g: &[u8], t: &[u8]) -> bool {
        match (g.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&g[1..], t) || (!t.is_empty() && inner(g, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&g[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => inner(&g[1..], &t[1..]),
            _ => false,
        }
    }
    inner(glob.as_bytes(), text.as_bytes())
}
