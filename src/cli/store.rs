//! The filesystem-backed recipe store.
//!
//! Recipes live as TOML manifests under `<root>/recipes/`, one file per
//! recipe revision. A manifest declares the revisioned reference, the
//! requirement lists, option defaults and the binaries known for the
//! revision. On open, every manifest is parsed into the in-memory
//! lookup tables the graph engine consumes, so the engine itself never
//! touches the filesystem during resolution.
//!
//! Mutations of a revision (writing a manifest) take the exclusive
//! cache lock for that revision; reads of already-written manifests are
//! lock-free since revisions are immutable once present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use depgraph::binid::DepIdMode;
use depgraph::cachelock::CacheLock;
use depgraph::loader::{
    LoaderError, MemoryStore, Options, PackageType, RecipeInfo, RecipeLoader, RemoteLookup,
    Settings,
};
use depgraph::refs::{PkgReference, RecipeReference};
use depgraph::require::{Requirement, RequirementKind};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

//================================================================================================
// Types
//================================================================================================

/// An error opening or mutating a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A filesystem failure.
    #[error("store i/o at `{path}`: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying failure.
        source: std::io::Error,
    },
    /// A manifest did not parse as TOML.
    #[error("malformed manifest `{path}`: {source}")]
    Manifest {
        /// The manifest path.
        path: PathBuf,
        /// The TOML decoding failure.
        source: toml_edit::de::Error,
    },
    /// A manifest carried an invalid reference or requirement.
    #[error("invalid entry in `{path}`: {reason}")]
    Invalid {
        /// The manifest path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
    /// The revision lock could not be taken.
    #[error(transparent)]
    Lock(#[from] depgraph::cachelock::LockError),
}

/// One recipe revision as persisted on disk.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Manifest {
    /// The revisioned reference, e.g. `zlib/1.2.11#r1%100`.
    r#ref: String,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    tool_requires: Vec<String>,
    #[serde(default)]
    test_requires: Vec<String>,
    #[serde(default)]
    python_requires: Vec<String>,
    #[serde(default)]
    default_options: BTreeMap<String, String>,
    #[serde(default)]
    package_type: Option<String>,
    #[serde(default)]
    settings_irrelevant: Vec<String>,
    #[serde(default)]
    default_id_mode: Option<DepIdMode>,
    #[serde(default)]
    editable: bool,
    #[serde(default)]
    platform: bool,
    /// Known binaries, as full package reference strings.
    #[serde(default)]
    packages: Vec<String>,
}

/// A named store over a directory of manifests.
pub struct FileStore {
    root: PathBuf,
    inner: MemoryStore,
}

//================================================================================================
// Impls
//================================================================================================

impl FileStore {
    /// Opens a store, parsing every manifest under `<root>/recipes/`.
    pub fn open(name: &str, root: &Path) -> Result<Self, StoreError> {
        let mut inner = MemoryStore::named(name);
        let recipes = root.join("recipes");
        if recipes.is_dir() {
            let mut manifests = Vec::new();
            collect_manifests(&recipes, &mut manifests)?;
            // Oldest timestamps first, so later registrations are the
            // more recent revisions.
            let mut parsed = Vec::new();
            for path in manifests {
                parsed.push(load_manifest(&path)?);
            }
            parsed.sort_by(|(a, _), (b, _)| {
                a.timestamp
                    .unwrap_or(0.0)
                    .total_cmp(&b.timestamp.unwrap_or(0.0))
            });
            for (ref_, manifest) in parsed {
                let info = manifest.to_recipe_info().map_err(|reason| {
                    StoreError::Invalid {
                        path: recipes.clone(),
                        reason,
                    }
                })?;
                inner.insert(ref_, info);
                for package in &manifest.packages {
                    let pref: PkgReference =
                        package.parse().map_err(|e| StoreError::Invalid {
                            path: recipes.clone(),
                            reason: format!("package `{package}`: {e}"),
                        })?;
                    inner.insert_package(pref);
                }
            }
        }
        debug!(store = name, root = %root.display(), "store opened");
        Ok(FileStore {
            root: root.to_path_buf(),
            inner,
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every recipe revision in the store.
    pub fn all_revisions(&self) -> impl Iterator<Item = &RecipeReference> {
        self.inner.all_revisions()
    }

    /// Every binary package in the store.
    pub fn all_packages(&self) -> impl Iterator<Item = &PkgReference> {
        self.inner.all_packages()
    }

    /// The canonical manifest path of a revisioned reference.
    pub fn manifest_path(&self, ref_: &RecipeReference) -> PathBuf {
        let mut path = self.root.join("recipes").join(&ref_.name);
        let mut leaf = ref_.version.to_string();
        if let Some(user) = &ref_.user {
            leaf.push('@');
            leaf.push_str(user);
            if let Some(channel) = &ref_.channel {
                leaf.push('_');
                leaf.push_str(channel);
            }
        }
        path.push(leaf);
        if let Some(rev) = &ref_.revision {
            path.push(format!("{rev}.toml"));
        } else {
            path.push("unrevisioned.toml");
        }
        path
    }

    /// Reads the manifest text of a revision.
    pub fn read_manifest(&self, ref_: &RecipeReference) -> Result<String, StoreError> {
        let path = self.manifest_path(ref_);
        std::fs::read_to_string(&path).map_err(|source| StoreError::Io { path, source })
    }

    /// Writes a manifest under the revision's exclusive cache lock.
    pub fn write_manifest(&self, ref_: &RecipeReference, text: &str) -> Result<(), StoreError> {
        let _lock = CacheLock::exclusive(&self.root, &ref_.repr_with_revision())?;
        let path = self.manifest_path(ref_);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, text).map_err(|source| StoreError::Io { path, source })
    }
}

impl Manifest {
    /// Converts the raw manifest to the engine's recipe metadata.
    fn to_recipe_info(&self) -> Result<RecipeInfo, String> {
        let parse_all = |texts: &[String], kind| -> Result<Vec<Requirement>, String> {
            texts
                .iter()
                .map(|t| Requirement::parse(t, kind).map_err(|e| format!("`{t}`: {e}")))
                .collect()
        };
        Ok(RecipeInfo {
            requires: parse_all(&self.requires, RequirementKind::Requires)?,
            tool_requires: parse_all(&self.tool_requires, RequirementKind::Tool)?,
            test_requires: parse_all(&self.test_requires, RequirementKind::Test)?,
            python_requires: parse_all(&self.python_requires, RequirementKind::Python)?,
            default_options: self.default_options.clone(),
            package_type: match self.package_type.as_deref() {
                None => None,
                Some(text) => Some(parse_package_type(text)?),
            },
            settings_irrelevant: self.settings_irrelevant.clone(),
            manages_options: false,
            validity_errors: Vec::new(),
            default_id_mode: self.default_id_mode,
            editable: self.editable,
            platform: self.platform,
        })
    }
}

impl RecipeLoader for FileStore {
    fn load(
        &self,
        ref_: &RecipeReference,
        settings: &Settings,
        options: &Options,
    ) -> Result<RecipeInfo, LoaderError> {
        self.inner.load(ref_, settings, options)
    }
}

impl RemoteLookup for FileStore {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    fn list_versions(&self, name: &str) -> Result<Vec<RecipeReference>, LoaderError> {
        self.inner.list_versions(name)
    }

    fn list_revisions(&self, ref_: &RecipeReference) -> Result<Vec<RecipeReference>, LoaderError> {
        self.inner.list_revisions(ref_)
    }

    fn package_revisions(&self, pref: &PkgReference) -> Result<Vec<PkgReference>, LoaderError> {
        self.inner.package_revisions(pref)
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Recursively gathers `.toml` files under a directory.
fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_manifests(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "toml") {
            out.push(path);
        }
    }
    out.sort();
    Ok(())
}

/// Parses one manifest file and the reference it declares.
fn load_manifest(path: &Path) -> Result<(RecipeReference, Manifest), StoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: Manifest =
        toml_edit::de::from_str(&text).map_err(|source| StoreError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    let ref_: RecipeReference = manifest.r#ref.parse().map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        reason: format!("reference `{}`: {e}", manifest.r#ref),
    })?;
    ref_.validate(true).map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok((ref_, manifest))
}

fn parse_package_type(text: &str) -> Result<PackageType, String> {
    match text {
        "shared-library" => Ok(PackageType::SharedLibrary),
        "static-library" => Ok(PackageType::StaticLibrary),
        "header-library" => Ok(PackageType::HeaderLibrary),
        "application" => Ok(PackageType::Application),
        other => Err(format!("unknown package type `{other}`")),
    }
}
