//! # Requirement Declarations and Traits
//!
//! A [`Requirement`] is one entry of a recipe's `requires`, `tool_requires`
//! or `test_requires` lists: a package name, a version spec (exact or
//! range), optional user/channel/revision, and the set of
//! [`RequirementTraits`] governing how the dependency propagates through
//! the graph.
//!
//! Trait defaults are derived from the requirement kind: a regular
//! requirement carries headers and libs and is visible to transitive
//! consumers; a tool requirement runs in the build context and is private;
//! a test requirement is private and never part of the binary identity.

use std::fmt;
use std::str::FromStr;

use crate::binid::DepIdMode;
use crate::refs::{InvalidReference, RecipeReference};
use crate::version::{VersionError, VersionSpec};

//================================================================================================
// Types
//================================================================================================

/// Which declaration list a requirement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    /// A regular host-context requirement.
    Requires,
    /// A build-context tool requirement.
    Tool,
    /// A test-only requirement.
    Test,
    /// A recipe-only (python-style) requirement with its own provenance.
    Python,
}

/// How a requirement propagates information and constraints to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequirementTraits {
    /// The consumer compiles against the dependency's headers.
    pub headers: bool,
    /// The consumer links against the dependency's libraries.
    pub libs: bool,
    /// The dependency runs at build time, in the build context.
    pub build: bool,
    /// The dependency is needed at run time.
    pub run: bool,
    /// The requirement is visible to transitive consumers for conflict
    /// detection and binary identity.
    pub visible: bool,
    /// Headers propagate transitively even through a private boundary.
    pub transitive_headers: bool,
    /// Libs propagate transitively even through a private boundary.
    pub transitive_libs: bool,
    /// The requirement exists only to test this package.
    pub test: bool,
    /// The requirement was declared directly by the node (not inherited).
    pub direct: bool,
    /// The requirement only overrides a transitive version, introducing no
    /// edge of its own.
    pub override_: bool,
    /// The override wins even against pinned downstream versions.
    pub force: bool,
}

/// One declared dependency of a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// The required package name.
    pub name: String,
    /// Exact version or range.
    pub spec: VersionSpec,
    /// Optional user namespace.
    pub user: Option<String>,
    /// Optional channel.
    pub channel: Option<String>,
    /// Optional pinned recipe revision.
    pub revision: Option<String>,
    /// Which list the requirement was declared in.
    pub kind: RequirementKind,
    /// Propagation traits; defaults derive from `kind`.
    pub traits: RequirementTraits,
    /// Per-requirement package-id mode, overriding the global default.
    pub package_id_mode: Option<DepIdMode>,
}

/// An error encountered while parsing a requirement string.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RequirementError {
    /// The reference portion is malformed.
    #[error(transparent)]
    Reference(#[from] InvalidReference),
    /// The version spec is malformed.
    #[error(transparent)]
    Version(#[from] VersionError),
    /// The requirement is missing a version.
    #[error("requirement `{0}` is missing a version")]
    MissingVersion(String),
}

//================================================================================================
// Impls
//================================================================================================

impl RequirementTraits {
    /// Trait defaults for a given declaration kind.
    pub fn defaults(kind: RequirementKind) -> Self {
        match kind {
            RequirementKind::Requires => RequirementTraits {
                headers: true,
                libs: true,
                build: false,
                run: false,
                visible: true,
                transitive_headers: false,
                transitive_libs: false,
                test: false,
                direct: true,
                override_: false,
                force: false,
            },
            RequirementKind::Tool => RequirementTraits {
                headers: false,
                libs: false,
                build: true,
                run: true,
                visible: false,
                transitive_headers: false,
                transitive_libs: false,
                test: false,
                direct: true,
                override_: false,
                force: false,
            },
            RequirementKind::Test => RequirementTraits {
                headers: true,
                libs: true,
                build: false,
                run: false,
                visible: false,
                transitive_headers: false,
                transitive_libs: false,
                test: true,
                direct: true,
                override_: false,
                force: false,
            },
            RequirementKind::Python => RequirementTraits {
                headers: false,
                libs: false,
                build: false,
                run: false,
                visible: false,
                transitive_headers: false,
                transitive_libs: false,
                test: false,
                direct: true,
                override_: false,
                force: false,
            },
        }
    }

    /// The traits an *inherited* (transitively propagated) copy of a
    /// requirement carries when seen by the consumer one level up.
    pub fn propagated(&self) -> Self {
        RequirementTraits {
            headers: self.transitive_headers,
            libs: self.transitive_libs,
            direct: false,
            // Visibility is what keeps the requirement participating in
            // downstream conflict detection.
            visible: self.visible,
            build: false,
            run: self.run,
            transitive_headers: self.transitive_headers,
            transitive_libs: self.transitive_libs,
            test: false,
            override_: false,
            force: false,
        }
    }
}

impl Requirement {
    /// Builds a requirement of the given kind with default traits.
    pub fn new(name: impl Into<String>, spec: VersionSpec, kind: RequirementKind) -> Self {
        Requirement {
            name: name.into(),
            spec,
            user: None,
            channel: None,
            revision: None,
            kind,
            traits: RequirementTraits::defaults(kind),
            package_id_mode: None,
        }
    }

    /// Parses `name/version-or-range[@user[/channel]][#revision]` into a
    /// requirement of the given kind.
    pub fn parse(text: &str, kind: RequirementKind) -> Result<Self, RequirementError> {
        let (rest, revision) = match text.split_once('#') {
            Some((r, rev)) if !rev.is_empty() => (r, Some(rev.to_string())),
            Some((r, _)) => (r, None),
            None => (text, None),
        };
        let (rest, user, channel) = match rest.split_once('@') {
            Some((r, uc)) => match uc.split_once('/') {
                Some((u, c)) => (r, Some(u.to_string()), Some(c.to_string())),
                None => (r, Some(uc.to_string()), None),
            },
            None => (rest, None, None),
        };
        let (name, version) = rest
            .split_once('/')
            .ok_or_else(|| RequirementError::MissingVersion(text.to_string()))?;
        if version.is_empty() {
            return Err(RequirementError::MissingVersion(text.to_string()));
        }
        let spec = VersionSpec::parse(version)?;
        Ok(Requirement {
            name: name.to_string(),
            spec,
            user,
            channel,
            revision,
            kind,
            traits: RequirementTraits::defaults(kind),
            package_id_mode: None,
        })
    }

    /// Whether an already-resolved reference satisfies this requirement's
    /// name, namespace, version spec, and pinned revision if any.
    pub fn satisfied_by(&self, ref_: &RecipeReference) -> bool {
        if self.name != ref_.name || self.user != ref_.user || self.channel != ref_.channel {
            return false;
        }
        if !self.spec.accepts(&ref_.version) {
            return false;
        }
        match (&self.revision, &ref_.revision) {
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Whether two requirements to the same name target the same
    /// user/channel namespace (the precondition for conflict checking).
    pub fn same_namespace(&self, other: &Requirement) -> bool {
        self.name == other.name && self.user == other.user && self.channel == other.channel
    }

    /// The display form used in diagnostics, e.g. `zlib/[>=1.0 <2]@user`.
    pub fn display_ref(&self) -> String {
        let mut out = format!("{}/{}", self.name, self.spec);
        if let Some(user) = &self.user {
            out.push('@');
            out.push_str(user);
            if let Some(channel) = &self.channel {
                out.push('/');
                out.push_str(channel);
            }
        }
        if let Some(rev) = &self.revision {
            out.push('#');
            out.push_str(rev);
        }
        out
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_ref())
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Requirement::parse(s, RequirementKind::Requires)
    }
}
