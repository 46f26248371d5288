//! # Dependency Graph Resolution
//!
//! The core engine of kiln: turning a consumer's requirement lists into
//! a fully resolved dependency graph, deciding the binary identity and
//! availability of every node, and pinning the outcome in lockfiles and
//! package lists.
//!
//! The crate is deliberately free of recipe execution and network
//! protocol code. Everything environment-shaped enters through two
//! seams, [`RecipeLoader`] and [`RemoteLookup`], which the CLI
//! implements over its on-disk store and which tests implement over
//! in-memory tables.
//!
//! The pipeline, in order:
//!
//! 1. [`version`] — the loose version model and bracket ranges,
//! 2. [`refs`] — recipe and package reference parsing and matching,
//! 3. [`require`] — requirement declarations and propagation traits,
//! 4. [`graph`] — worklist expansion, conflicts, cycles, overrides,
//! 5. [`binid`] — package identity digests and binary statuses,
//! 6. [`lock`] and [`list`] — persistence of the resolved outcome,
//! 7. [`transfer`] and [`cachelock`] — moving and guarding artifacts.

pub mod binid;
pub mod cachelock;
pub mod graph;
pub mod list;
pub mod loader;
pub mod lock;
pub mod refs;
pub mod require;
pub mod transfer;
pub mod version;

pub use binid::{BinaryAnnotator, BuildPolicy, DepIdMode};
pub use graph::{BinaryStatus, Context, Graph, GraphBuilder, GraphError, Node};
pub use list::{MultiPackagesList, PackagesList};
pub use loader::{RecipeInfo, RecipeLoader, RemoteLookup};
pub use lock::{Lockfile, LockfileError};
pub use refs::{PackageId, PkgReference, RecipeReference};
pub use require::{Requirement, RequirementKind, RequirementTraits};
pub use version::{Version, VersionRange, VersionSpec};
