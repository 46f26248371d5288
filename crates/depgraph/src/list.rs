//! # Package Lists
//!
//! A [`PackagesList`] is the typed tree behind selection and promotion
//! workflows: recipes, their revisions, the binary packages of each
//! revision and the binary revisions of those. Commands produce one
//! (from a resolved graph or a search), later commands consume it to
//! act on exactly that set — upload, download, copy, remove.
//!
//! The tree is keyed by canonical reference strings at every level, so
//! its JSON form is stable and diff-friendly. A
//! [`MultiPackagesList`] wraps one list per origin (the cache or a
//! remote) for commands that aggregate across sources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{BinaryStatus, Graph};
use crate::loader::{Options, Settings};
use crate::refs::{PkgReference, RecipeReference};


//================================================================================================
// Types
//================================================================================================

/// An error while building or decoding a package list.
#[derive(Error, Debug)]
pub enum ListError {
    /// Listed references must carry an explicit revision.
    #[error("cannot add `{0}` to a package list without a revision")]
    MissingRevision(String),
    /// A binary was added under a recipe revision not in the list.
    #[error("recipe revision `{0}` is not part of the list")]
    UnknownRevision(String),
    /// The JSON was a graph serialization, not a package list.
    #[error("the provided JSON is a dependency graph, not a package list; \
             pass a list produced by a list or upload command")]
    GraphJson,
    /// The JSON did not decode as a package list.
    #[error("malformed package list: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One binary package revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRevisionEntry {
    /// Creation time, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// One binary package (a package id) under a recipe revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Binary revisions keyed by revision id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub revisions: BTreeMap<String, PackageRevisionEntry>,
    /// The settings this binary was built with, when known.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: Settings,
    /// The options this binary was built with, when known.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: Options,
}

/// One recipe revision with its binaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    /// Creation time, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Binaries keyed by package id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageEntry>,
}

/// All selected revisions of one recipe reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeEntry {
    /// Revisions keyed by revision id.
    pub revisions: BTreeMap<String, RevisionEntry>,
}

/// A selection of recipes, revisions and binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackagesList {
    /// Recipes keyed by `name/version[@user[/channel]]`.
    pub recipes: BTreeMap<String, RecipeEntry>,
}

/// One package list per origin source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiPackagesList {
    /// Lists keyed by source name (`"Local Cache"` or a remote name).
    pub lists: BTreeMap<String, PackagesList>,
}

//================================================================================================
// Impls
//================================================================================================

impl PackagesList {
    /// Adds a recipe revision. The reference must carry one.
    pub fn add_ref(&mut self, ref_: &RecipeReference) -> Result<(), ListError> {
        let revision = ref_
            .revision
            .clone()
            .ok_or_else(|| ListError::MissingRevision(ref_.repr()))?;
        let entry = self
            .recipes
            .entry(ref_.repr())
            .or_default()
            .revisions
            .entry(revision)
            .or_default();
        if entry.timestamp.is_none() {
            entry.timestamp = ref_.timestamp;
        }
        Ok(())
    }

    /// Adds a binary package under its (already listed) recipe revision.
    pub fn add_pref(&mut self, pref: &PkgReference) -> Result<(), ListError> {
        let revision = pref
            .ref_
            .revision
            .clone()
            .ok_or_else(|| ListError::MissingRevision(pref.ref_.repr()))?;
        let recipe = self
            .recipes
            .get_mut(&pref.ref_.repr())
            .and_then(|r| r.revisions.get_mut(&revision))
            .ok_or_else(|| ListError::UnknownRevision(pref.ref_.repr_with_revision()))?;
        let package = recipe
            .packages
            .entry(pref.package_id.as_str().to_string())
            .or_default();
        if let Some(prev) = &pref.revision {
            package
                .revisions
                .entry(prev.clone())
                .or_default()
                .timestamp = pref.timestamp;
        }
        Ok(())
    }

    /// Records the build configuration of a listed binary.
    pub fn add_configuration(
        &mut self,
        pref: &PkgReference,
        settings: Settings,
        options: Options,
    ) -> Result<(), ListError> {
        let revision = pref
            .ref_
            .revision
            .clone()
            .ok_or_else(|| ListError::MissingRevision(pref.ref_.repr()))?;
        let package = self
            .recipes
            .get_mut(&pref.ref_.repr())
            .and_then(|r| r.revisions.get_mut(&revision))
            .and_then(|r| r.packages.get_mut(pref.package_id.as_str()))
            .ok_or_else(|| ListError::UnknownRevision(pref.ref_.repr_with_revision()))?;
        package.settings = settings;
        package.options = options;
        Ok(())
    }

    /// Every listed recipe revision, ascending.
    pub fn refs(&self) -> impl Iterator<Item = (String, &RevisionEntry)> + '_ {
        self.recipes.iter().flat_map(|(key, recipe)| {
            recipe
                .revisions
                .iter()
                .map(move |(rev, entry)| (format!("{key}#{rev}"), entry))
        })
    }

    /// Every listed binary revision, ascending, as parseable reference
    /// strings.
    pub fn prefs(&self) -> impl Iterator<Item = String> + '_ {
        self.refs().flat_map(|(ref_key, entry)| {
            entry.packages.iter().flat_map(move |(package_id, package)| {
                let ref_key = ref_key.clone();
                package
                    .revisions
                    .keys()
                    .map(move |prev| format!("{ref_key}:{package_id}#{prev}"))
            })
        })
    }

    /// Unions another list into this one.
    pub fn merge(&mut self, other: &PackagesList) {
        for (key, recipe) in &other.recipes {
            let mine = self.recipes.entry(key.clone()).or_default();
            for (rev, entry) in &recipe.revisions {
                let target = mine.revisions.entry(rev.clone()).or_default();
                if target.timestamp.is_none() {
                    target.timestamp = entry.timestamp;
                }
                for (package_id, package) in &entry.packages {
                    let slot = target.packages.entry(package_id.clone()).or_default();
                    slot.revisions
                        .extend(package.revisions.iter().map(|(k, v)| (k.clone(), v.clone())));
                    if slot.settings.is_empty() {
                        slot.settings = package.settings.clone();
                    }
                    if slot.options.is_empty() {
                        slot.options = package.options.clone();
                    }
                }
            }
        }
    }

    /// Keeps only the recipe revisions *not* identically present in
    /// `other`.
    ///
    /// This is the promotion diff: what the source holds that the
    /// destination does not. A revision survives unless `other` carries
    /// it with the same binaries and binary revisions; revision
    /// timestamps are origin-assigned and do not count.
    pub fn keep_outer(&mut self, other: &PackagesList) {
        for (key, recipe) in &other.recipes {
            if let Some(mine) = self.recipes.get_mut(key) {
                mine.revisions.retain(|rev, entry| {
                    recipe
                        .revisions
                        .get(rev)
                        .is_none_or(|theirs| theirs.packages != entry.packages)
                });
            }
        }
        self.recipes.retain(|_, recipe| !recipe.revisions.is_empty());
    }

    /// Splits into single-recipe lists, one per reference key.
    pub fn split(&self) -> Vec<PackagesList> {
        self.recipes
            .iter()
            .map(|(key, recipe)| PackagesList {
                recipes: BTreeMap::from([(key.clone(), recipe.clone())]),
            })
            .collect()
    }

    /// Whether nothing is listed.
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Captures a resolved, annotated graph as a list.
    ///
    /// The synthetic root is skipped, as are binaries with nothing
    /// storable behind them (editable, platform, invalid) and skipped
    /// nodes. Recipe-only references contribute recipe entries with no
    /// binaries.
    pub fn from_graph(graph: &Graph) -> Result<Self, ListError> {
        let mut list = PackagesList::default();
        for node in graph.nodes.iter().filter(|n| !n.is_root) {
            if node.ref_.revision.is_none() {
                continue;
            }
            match node.binary {
                Some(status) if status.is_synthetic() || status == BinaryStatus::Skip => continue,
                _ => {},
            }
            list.add_ref(&node.ref_)?;
            if let Some(package_id) = &node.package_id {
                let pref = PkgReference::new(node.ref_.clone(), package_id.clone());
                list.add_pref(&pref)?;
                list.add_configuration(&pref, node.settings.clone(), node.options.clone())?;
            }
        }
        for node in &graph.nodes {
            for ref_ in &node.python_requires {
                if ref_.revision.is_some() {
                    list.add_ref(ref_)?;
                }
            }
        }
        Ok(list)
    }
}

impl MultiPackagesList {
    /// The list for one source, created on first access.
    pub fn for_source(&mut self, source: &str) -> &mut PackagesList {
        self.lists.entry(source.to_string()).or_default()
    }

    /// Decodes a multi-list from JSON, rejecting graph serializations
    /// with a targeted error.
    pub fn from_json(text: &str) -> Result<Self, ListError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("graph").is_some() {
            return Err(ListError::GraphJson);
        }
        Ok(serde_json::from_value(value)?)
    }
}
