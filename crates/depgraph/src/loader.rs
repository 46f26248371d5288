//! # Recipe Loading and Remote Lookup Seams
//!
//! The graph engine never executes recipes or speaks HTTP itself. It
//! depends on two injected collaborators:
//!
//! - [`RecipeLoader`] — given an exact reference and the active
//!   settings/options, returns the recipe's declared requirements and
//!   metadata. Must be deterministic for identical inputs.
//! - [`RemoteLookup`] — queries one named source (the local cache or a
//!   remote registry) for available versions, revisions and binaries.
//!   Sources form an *ordered* list; queries short-circuit on the first
//!   satisfying source unless an update is requested.
//!
//! [`MemoryStore`] implements both traits over in-memory tables. It backs
//! the test suites and the filesystem-backed store in the CLI.

use std::collections::BTreeMap;

use config::UpdatePolicy;
use thiserror::Error;

use crate::binid::DepIdMode;
use crate::refs::{PkgReference, RecipeReference};
use crate::require::Requirement;
use crate::version::Version;

//================================================================================================
// Types
//================================================================================================

/// A settings snapshot (os, arch, compiler, build_type, ...). The ordered
/// map keeps every canonical serialization deterministic.
pub type Settings = BTreeMap<String, String>;

/// An options snapshot (shared, fPIC, header_only, ...).
pub type Options = BTreeMap<String, String>;

/// The deduced or declared nature of a package's artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    /// A shared library.
    SharedLibrary,
    /// A static library.
    StaticLibrary,
    /// A header-only library with no compiled artifact.
    HeaderLibrary,
    /// An executable application.
    Application,
    /// Nothing declared and nothing deducible.
    Unknown,
}

/// Everything the graph needs to know about one loaded recipe.
#[derive(Debug, Clone, Default)]
pub struct RecipeInfo {
    /// Regular host-context requirements, in declaration order.
    pub requires: Vec<Requirement>,
    /// Build-context tool requirements.
    pub tool_requires: Vec<Requirement>,
    /// Test-only requirements.
    pub test_requires: Vec<Requirement>,
    /// Recipe-only requirements with independent provenance.
    pub python_requires: Vec<Requirement>,
    /// Option defaults declared by the recipe.
    pub default_options: Options,
    /// Explicitly declared package type, if any.
    pub package_type: Option<PackageType>,
    /// Settings the recipe declares irrelevant for its binary identity.
    pub settings_irrelevant: Vec<String>,
    /// The recipe manages its own options, opting out of automatic
    /// package-type deduction.
    pub manages_options: bool,
    /// Contradictions between the recipe's validity rules and the active
    /// configuration. A non-empty list marks the binary Invalid.
    pub validity_errors: Vec<String>,
    /// The recipe-wide default dependency id mode, if declared.
    pub default_id_mode: Option<DepIdMode>,
    /// The package is in editable mode: artifacts come from a local
    /// source tree, never from a server.
    pub editable: bool,
    /// The package is provided by the platform (a system toolchain or
    /// preinstalled library); nothing is fetched or built for it.
    pub platform: bool,
}

/// An error produced by a loader or lookup collaborator.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The recipe (or the requested revision) does not exist in this
    /// source.
    #[error("recipe `{0}` not found")]
    NotFound(String),
    /// The source could not be reached; retried by the transfer layer.
    #[error("transient failure talking to `{origin}`: {reason}")]
    Transient {
        /// The source that failed.
        origin: String,
        /// A human-readable reason.
        reason: String,
    },
    /// Authentication was rejected.
    #[error("authentication against `{0}` failed")]
    Authentication(String),
}

/// Loads recipe metadata for an exact reference.
pub trait RecipeLoader {
    /// Returns the declared requirements and metadata of the recipe.
    ///
    /// The contract requires determinism: identical inputs must yield an
    /// identical `RecipeInfo`.
    fn load(
        &self,
        ref_: &RecipeReference,
        settings: &Settings,
        options: &Options,
    ) -> Result<RecipeInfo, LoaderError>;
}

/// Queries one named source for recipes and binaries.
pub trait RemoteLookup {
    /// The source's display name (`"Local Cache"` for the cache itself).
    fn source_name(&self) -> &str;

    /// All known versions of a package name (any revision), unordered.
    fn list_versions(&self, name: &str) -> Result<Vec<RecipeReference>, LoaderError>;

    /// Known revisions of an exact name/version, descending by recency.
    fn list_revisions(&self, ref_: &RecipeReference) -> Result<Vec<RecipeReference>, LoaderError>;

    /// The most recent revision, if any exist.
    fn latest_revision(
        &self,
        ref_: &RecipeReference,
    ) -> Result<Option<RecipeReference>, LoaderError> {
        Ok(self.list_revisions(ref_)?.into_iter().next())
    }

    /// Known binary revisions for a package reference, descending by
    /// recency.
    fn package_revisions(&self, pref: &PkgReference) -> Result<Vec<PkgReference>, LoaderError>;

    /// Whether a binary for this reference and package id exists here.
    fn has_package(&self, pref: &PkgReference) -> Result<bool, LoaderError> {
        Ok(!self.package_revisions(pref)?.is_empty())
    }
}

/// An in-memory recipe and binary store implementing both collaborator
/// seams.
#[derive(Default)]
pub struct MemoryStore {
    name: String,
    recipes: BTreeMap<String, RecipeInfo>,
    /// name -> revisioned references, most recent last as added.
    revisions: BTreeMap<String, Vec<RecipeReference>>,
    packages: Vec<PkgReference>,
}

//================================================================================================
// Impls
//================================================================================================

impl RecipeInfo {
    /// A leaf recipe with no requirements.
    pub fn leaf() -> Self {
        RecipeInfo::default()
    }

    /// Declared requirements of every kind, in declaration order:
    /// requires, then tool, then test requirements.
    pub fn all_requires(&self) -> impl Iterator<Item = &Requirement> {
        self.requires
            .iter()
            .chain(self.tool_requires.iter())
            .chain(self.test_requires.iter())
    }
}

impl MemoryStore {
    /// Creates an empty store with the given source name.
    pub fn named(name: impl Into<String>) -> Self {
        MemoryStore {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a store named like the local cache.
    pub fn cache() -> Self {
        Self::named("Local Cache")
    }

    /// Registers an already-parsed revisioned reference. Later
    /// registrations of the same name/version are considered more recent.
    pub fn insert(&mut self, ref_: RecipeReference, info: RecipeInfo) {
        self.recipes.insert(ref_.repr_with_revision(), info);
        self.revisions
            .entry(ref_.name.clone())
            .or_default()
            .push(ref_);
    }

    /// Registers an already-parsed binary package.
    pub fn insert_package(&mut self, pref: PkgReference) {
        self.packages.push(pref);
    }

    /// Registers a recipe under a reference string such as
    /// `zlib/1.2.11#rev1%100`. Panics on malformed input; intended for
    /// fixture setup.
    pub fn add(&mut self, ref_: &str, info: RecipeInfo) -> RecipeReference {
        let parsed: RecipeReference = ref_.parse().unwrap_or_else(|e| panic!("{e}"));
        self.insert(parsed.clone(), info);
        parsed
    }

    /// Registers a binary package under a package reference string such as
    /// `zlib/1.2.11#rev1:0ab1cd#prev1`. Panics on malformed input;
    /// intended for fixture setup.
    pub fn add_package(&mut self, pref: &str) -> PkgReference {
        let parsed: PkgReference = pref.parse().unwrap_or_else(|e| panic!("{e}"));
        self.insert_package(parsed.clone());
        parsed
    }

    /// Every registered revisioned reference, in registration order.
    pub fn all_revisions(&self) -> impl Iterator<Item = &RecipeReference> {
        self.revisions.values().flatten()
    }

    /// Every registered binary package, in registration order.
    pub fn all_packages(&self) -> impl Iterator<Item = &PkgReference> {
        self.packages.iter()
    }
}

impl RecipeLoader for MemoryStore {
    fn load(
        &self,
        ref_: &RecipeReference,
        _settings: &Settings,
        _options: &Options,
    ) -> Result<RecipeInfo, LoaderError> {
        // Exact revision first, then the revision-less key.
        self.recipes
            .get(&ref_.repr_with_revision())
            .or_else(|| self.recipes.get(&ref_.repr()))
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(ref_.repr_with_revision()))
    }
}

impl RemoteLookup for MemoryStore {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn list_versions(&self, name: &str) -> Result<Vec<RecipeReference>, LoaderError> {
        Ok(self.revisions.get(name).cloned().unwrap_or_default())
    }

    fn list_revisions(&self, ref_: &RecipeReference) -> Result<Vec<RecipeReference>, LoaderError> {
        let mut revs: Vec<RecipeReference> = self
            .revisions
            .get(&ref_.name)
            .into_iter()
            .flatten()
            .filter(|r| {
                r.version == ref_.version && r.user == ref_.user && r.channel == ref_.channel
            })
            .cloned()
            .collect();
        // Registration order is oldest-first; recency is the reverse.
        revs.reverse();
        Ok(revs)
    }

    fn package_revisions(&self, pref: &PkgReference) -> Result<Vec<PkgReference>, LoaderError> {
        let mut found: Vec<PkgReference> = self
            .packages
            .iter()
            .filter(|p| p.ref_ == pref.ref_ && p.package_id == pref.package_id)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Collects range candidates from the cache and, when permitted, the
/// ordered remotes.
///
/// Without `update`, the first source with any candidate wins; with
/// `update`, every source contributes and the pools are merged before the
/// range picks its maximum.
pub fn gather_candidates(
    name: &str,
    cache: &dyn RemoteLookup,
    remotes: &[&dyn RemoteLookup],
    update: bool,
) -> Result<Vec<Version>, LoaderError> {
    let mut pool: Vec<Version> = Vec::new();
    let mut sources: Vec<&dyn RemoteLookup> = vec![cache];
    sources.extend(remotes.iter().copied());
    for source in sources {
        let found = source.list_versions(name)?;
        for r in found {
            if !pool.contains(&r.version) {
                pool.push(r.version);
            }
        }
        if !pool.is_empty() && !update {
            break;
        }
    }
    Ok(pool)
}

/// Picks "the" latest revision of a reference across the cache and
/// remotes, honoring the configured [`UpdatePolicy`].
pub fn select_latest_revision(
    ref_: &RecipeReference,
    cache: &dyn RemoteLookup,
    remotes: &[&dyn RemoteLookup],
    policy: UpdatePolicy,
) -> Result<Option<RecipeReference>, LoaderError> {
    let mut sources: Vec<&dyn RemoteLookup> = vec![cache];
    sources.extend(remotes.iter().copied());
    match policy {
        UpdatePolicy::FirstMatch => {
            for source in sources {
                if let Some(latest) = source.latest_revision(ref_)? {
                    return Ok(Some(latest));
                }
            }
            Ok(None)
        },
        UpdatePolicy::NewestTimestamp => {
            let mut best: Option<RecipeReference> = None;
            for source in sources {
                if let Some(latest) = source.latest_revision(ref_)? {
                    let newer = match &best {
                        Some(b) => {
                            latest.timestamp.unwrap_or(0.0) > b.timestamp.unwrap_or(0.0)
                        },
                        None => true,
                    };
                    if newer {
                        best = Some(latest);
                    }
                }
            }
            Ok(best)
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errors_name_the_failing_source() {
        let transient = LoaderError::Transient {
            origin: "central".to_string(),
            reason: "connection reset".to_string(),
        };
        assert_eq!(
            transient.to_string(),
            "transient failure talking to `central`: connection reset"
        );
        let auth = LoaderError::Authentication("central".to_string());
        assert!(auth.to_string().contains("central"));
    }
}
