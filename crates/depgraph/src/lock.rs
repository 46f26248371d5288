//! # Lockfiles
//!
//! A lockfile captures the exact references (version, revision,
//! timestamp) a resolved graph used, so later resolutions reproduce it
//! even after newer versions or revisions appear. It holds three
//! independent pin lists, one per requirement provenance: regular
//! requirements, build (tool) requirements, and recipe-only
//! requirements. A locked reference in one list never pins a
//! requirement of another kind.
//!
//! Lockfiles are persisted as JSON with a format version. Writes go
//! through a temporary file in the destination directory and an atomic
//! rename, so a crashed process never leaves a half-written lockfile.
//!
//! Application is *soft* by default: a requirement with no matching pin
//! resolves normally. Under strict mode the same miss is an error,
//! which is what CI uses to guarantee nothing escaped the lock.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::graph::{Context, Graph, NodeState};
use crate::refs::RecipeReference;
use crate::require::{Requirement, RequirementKind};

#[cfg(test)]
mod test;

//================================================================================================
// Statics
//================================================================================================

/// Current lockfile format version.
const FORMAT_VERSION: &str = "0.5";

//================================================================================================
// Types
//================================================================================================

/// The persisted pin set of one resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lockfile {
    /// Format version; rejected on load when unknown.
    pub version: String,
    /// Host-context pins, ascending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<RecipeReference>,
    /// Build-context pins, ascending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_requires: Vec<RecipeReference>,
    /// Recipe-only requirement pins, ascending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_requires: Vec<RecipeReference>,
    /// Override substitutions recorded during resolution, pattern to
    /// resulting references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, Vec<String>>,
}

/// An error while loading, saving or applying a lockfile.
#[derive(Error, Debug)]
pub enum LockfileError {
    /// The file could not be read or written.
    #[error("lockfile i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid lockfile JSON.
    #[error("malformed lockfile: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The format version is not understood by this build.
    #[error("unsupported lockfile version `{0}` (expected `{FORMAT_VERSION}`)")]
    UnsupportedVersion(String),
    /// Strict mode: a requirement had no matching pin.
    #[error("requirement `{0}` has no matching entry in the lockfile")]
    RequirementNotInLockfile(String),
    /// The atomic rename into place failed.
    #[error("could not persist lockfile: {0}")]
    Persist(#[from] tempfile::PersistError),
}

//================================================================================================
// Impls
//================================================================================================

impl Lockfile {
    /// An empty lockfile at the current format version.
    pub fn new() -> Self {
        Lockfile {
            version: FORMAT_VERSION.to_string(),
            ..Default::default()
        }
    }

    /// Captures the pins of a resolved graph.
    ///
    /// Only fully expanded, non-root nodes contribute; errored branches
    /// never poison a lockfile. Recipe-only references are gathered from
    /// every node since they are not nodes themselves.
    pub fn create(graph: &Graph) -> Self {
        let mut lockfile = Lockfile::new();
        for node in graph.nodes.iter().filter(|n| !n.is_root) {
            if node.state == NodeState::Expanded {
                match node.context {
                    Context::Host => lockfile.requires.push(node.ref_.clone()),
                    Context::Build => lockfile.build_requires.push(node.ref_.clone()),
                }
            }
        }
        for node in &graph.nodes {
            for ref_ in &node.python_requires {
                lockfile.python_requires.push(ref_.clone());
            }
        }
        for (pattern, replacement) in &graph.replaced_requires {
            lockfile
                .overrides
                .entry(pattern.clone())
                .or_default()
                .push(replacement.clone());
        }
        lockfile.normalize();
        lockfile
    }

    /// Unions another lockfile's pins into this one.
    ///
    /// Merging is how a lockfile covering several configurations is
    /// built: resolve each configuration separately, then fold the
    /// results together. Duplicate pins collapse; distinct versions of
    /// the same package coexist and soft application picks per
    /// requirement.
    pub fn merge(&mut self, other: &Lockfile) {
        self.requires.extend(other.requires.iter().cloned());
        self.build_requires
            .extend(other.build_requires.iter().cloned());
        self.python_requires
            .extend(other.python_requires.iter().cloned());
        for (pattern, replacements) in &other.overrides {
            let entry = self.overrides.entry(pattern.clone()).or_default();
            for r in replacements {
                if !entry.contains(r) {
                    entry.push(r.clone());
                }
            }
        }
        self.normalize();
    }

    /// Finds the pin satisfying a requirement, if any.
    ///
    /// The requirement's kind selects the pin list. Among multiple
    /// satisfying pins (a merged multi-configuration lockfile can hold
    /// several versions of one package) the highest version wins, which
    /// keeps application deterministic.
    pub fn resolve(&self, require: &Requirement) -> Option<RecipeReference> {
        let pins = match require.kind {
            RequirementKind::Tool => &self.build_requires,
            RequirementKind::Python => &self.python_requires,
            RequirementKind::Requires | RequirementKind::Test => &self.requires,
        };
        // Lists are ascending; scan from the back for the highest match.
        pins.iter()
            .rev()
            .find(|pin| require.satisfied_by(pin))
            .cloned()
    }

    /// Drops pins no node of the graph uses anymore.
    pub fn clean(&mut self, graph: &Graph) {
        let used: Vec<&RecipeReference> = graph
            .nodes
            .iter()
            .filter(|n| !n.is_root)
            .map(|n| &n.ref_)
            .collect();
        let pythons: Vec<&RecipeReference> = graph
            .nodes
            .iter()
            .flat_map(|n| n.python_requires.iter())
            .collect();
        self.requires.retain(|pin| used.contains(&pin));
        self.build_requires.retain(|pin| used.contains(&pin));
        self.python_requires.retain(|pin| pythons.contains(&pin));
    }

    /// Whether no pins are recorded at all.
    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
            && self.build_requires.is_empty()
            && self.python_requires.is_empty()
    }

    /// Loads and validates a lockfile from disk.
    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let text = std::fs::read_to_string(path)?;
        let lockfile: Lockfile = serde_json::from_str(&text)?;
        if lockfile.version != FORMAT_VERSION {
            return Err(LockfileError::UnsupportedVersion(lockfile.version));
        }
        debug!(path = %path.display(), "lockfile loaded");
        Ok(lockfile)
    }

    /// Writes the lockfile atomically: a temporary file in the target
    /// directory, then a rename over the destination.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path)?;
        debug!(path = %path.display(), "lockfile written");
        Ok(())
    }

    /// Sorts every pin list ascending and collapses duplicates.
    ///
    /// Ascending order with timestamp-inclusive comparison makes the
    /// serialized form canonical: two lockfiles with the same pins are
    /// byte-identical regardless of how they were produced.
    fn normalize(&mut self) {
        for pins in [
            &mut self.requires,
            &mut self.build_requires,
            &mut self.python_requires,
        ] {
            pins.sort();
            pins.dedup_by(|a, b| a.repr_full() == b.repr_full());
        }
    }
}
