//! # Recipe and Package References
//!
//! The reference model provides the immutable value types identifying a
//! recipe revision and a binary package built from it:
//!
//! - [`RecipeReference`] — `name/version[@user[/channel]][#revision][%timestamp]`
//! - [`PkgReference`] — a recipe reference plus a `package_id` and an
//!   optional package revision.
//!
//! ## Equality and Hashing
//!
//! Equality deliberately ignores the timestamp, and a missing revision on
//! either side acts as a wildcard, so `pkg/1.0` compares equal to
//! `pkg/1.0#abc`. Hashing excludes both revision and timestamp so that a
//! unique collection of references collapses revisions to identity.
//!
//! Ordering, in contrast, is a plain tuple comparison over
//! `(name, version, user, channel, timestamp, revision)` with missing
//! fields coerced low; it is used for stable presentation order and is
//! *not* consistent with the wildcard equality above. Package references
//! intentionally implement no ordering at all: sorting binaries requires
//! an explicit, documented key (see [`PkgReference::sort_key`] users).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use lazy_regex::{Lazy, lazy_regex, regex::Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::Version;

#[cfg(test)]
mod test;

//================================================================================================
// Statics
//================================================================================================

/// The charset a reference field must satisfy.
static FIELD_RE: Lazy<Regex> = lazy_regex!("^[a-z0-9_][a-z0-9_+.-]{1,100}$");
static FIELD_RE_UPPER: Lazy<Regex> = lazy_regex!("(?i)^[a-z0-9_][a-z0-9_+.-]{1,100}$");
/// Versions are laxer: single-character versions like `2` are fine.
static VERSION_RE: Lazy<Regex> = lazy_regex!("^[a-zA-Z0-9_+.-]{1,101}$");

const REPR_MAX: usize = 200;

//================================================================================================
// Types
//================================================================================================

/// An error encountered when parsing or validating a reference.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidReference {
    /// The name segment is missing or empty.
    #[error("invalid reference `{0}`: missing name")]
    MissingName(String),
    /// The version segment is missing or empty.
    #[error("invalid reference `{0}`: missing version")]
    MissingVersion(String),
    /// The version segment failed to parse.
    #[error("invalid reference `{0}`: bad version: {1}")]
    BadVersion(String, crate::version::VersionError),
    /// The timestamp segment failed to parse.
    #[error("invalid reference `{0}`: bad timestamp")]
    BadTimestamp(String),
    /// A channel was given without a user.
    #[error("invalid reference `{0}`: a channel requires a user")]
    ChannelWithoutUser(String),
    /// A field contains characters outside the accepted charset.
    #[error("invalid reference field `{0}`: only `[a-z0-9_][a-z0-9_+.-]` of length 2..=101 accepted")]
    InvalidField(String),
    /// The full representation exceeds the maximum length.
    #[error("reference `{0}` is longer than {REPR_MAX} characters")]
    TooLong(String),
    /// The text looks like a package reference, not a recipe reference.
    #[error("`{0}` looks like a package reference; a recipe reference cannot contain `:`")]
    PackageReference(String),
}

/// Identifies a recipe, optionally down to an exact immutable revision.
#[derive(Debug, Clone)]
pub struct RecipeReference {
    /// The package name.
    pub name: String,
    /// The resolved, concrete version.
    pub version: Version,
    /// Optional user namespace.
    pub user: Option<String>,
    /// Optional channel; requires `user`.
    pub channel: Option<String>,
    /// The recipe revision, a content-addressed snapshot id.
    pub revision: Option<String>,
    /// Seconds since epoch when the revision was created. Never part of
    /// equality.
    pub timestamp: Option<f64>,
}

/// The deterministic binary identity of one package configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(String);

/// Identifies one binary package: a recipe reference plus package id and
/// optional package revision.
///
/// This type implements no ordering on purpose. Historically, code paths
/// sorting package references relied on undefined order; any collection
/// that needs sorting must state its key explicitly.
#[derive(Debug, Clone)]
pub struct PkgReference {
    /// The recipe this binary was built from.
    pub ref_: RecipeReference,
    /// The binary configuration hash.
    pub package_id: PackageId,
    /// The package (binary) revision.
    pub revision: Option<String>,
    /// Creation time of the package revision.
    pub timestamp: Option<f64>,
}

//================================================================================================
// Impls
//================================================================================================

impl RecipeReference {
    /// Builds a reference from its parts without validation.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        RecipeReference {
            name: name.into(),
            version,
            user: None,
            channel: None,
            revision: None,
            timestamp: None,
        }
    }

    /// The short form without revision or timestamp: `name/version[@user[/channel]]`.
    pub fn repr(&self) -> String {
        let mut out = format!("{}/{}", self.name, self.version);
        if let Some(user) = &self.user {
            out.push('@');
            out.push_str(user);
            if let Some(channel) = &self.channel {
                out.push('/');
                out.push_str(channel);
            }
        }
        out
    }

    /// The revision-qualified form: `repr()#revision` when a revision is set.
    pub fn repr_with_revision(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}#{}", self.repr(), rev),
            None => self.repr(),
        }
    }

    /// The fully qualified form including the timestamp, suitable for
    /// lockfiles: `repr()#revision%timestamp`.
    pub fn repr_full(&self) -> String {
        let mut out = self.repr_with_revision();
        if let Some(ts) = self.timestamp {
            out.push('%');
            out.push_str(&format_ts(ts));
        }
        out
    }

    /// Validates the charset, casing and length constraints of this
    /// reference.
    ///
    /// Non-fatal concerns (discouraged leading characters, permitted
    /// uppercase) are logged as warnings rather than rejected.
    pub fn validate(&self, allow_uppercase: bool) -> Result<(), InvalidReference> {
        let repr = self.repr();
        if repr.len() > REPR_MAX {
            return Err(InvalidReference::TooLong(repr));
        }
        if repr.contains(':') {
            return Err(InvalidReference::PackageReference(repr));
        }
        let version = self.version.to_string();
        if !VERSION_RE.is_match(&version) {
            return Err(InvalidReference::InvalidField(version));
        }
        let fields = [
            Some(self.name.as_str()),
            self.user.as_deref(),
            self.channel.as_deref(),
        ];
        for field in fields.into_iter().flatten() {
            if FIELD_RE.is_match(field) {
                continue;
            }
            if allow_uppercase && FIELD_RE_UPPER.is_match(field) {
                tracing::warn!(reference = %repr, field, "uppercase reference fields are discouraged");
                continue;
            }
            return Err(InvalidReference::InvalidField(field.to_string()));
        }
        if self.name.starts_with(['.', '+']) {
            tracing::warn!(reference = %repr, "names starting with `.` or `+` are discouraged");
        }
        Ok(())
    }

    /// Glob-style matching against both the short and revision-qualified
    /// forms.
    ///
    /// Supported pattern extensions:
    /// - a leading `!` or `~` negates the match,
    /// - a trailing `@` (or `@#...`) restricts to references without
    ///   user/channel,
    /// - the special pattern `&` matches only the consumer (root) node.
    pub fn matches(&self, pattern: &str, is_consumer: bool) -> bool {
        if pattern == "&" {
            return is_consumer;
        }
        if let Some(rest) = pattern.strip_prefix(['!', '~']) {
            return !self.matches(rest, is_consumer);
        }
        let (glob, forbid_user) = match pattern.split_once('@') {
            // "name/ver@" or "name/ver@#rev": only match bare user/channel.
            Some((head, tail)) if tail.is_empty() || tail.starts_with('#') => {
                (format!("{head}{tail}"), true)
            },
            _ => (pattern.to_string(), false),
        };
        if forbid_user && self.user.is_some() {
            return false;
        }
        let re = match glob_to_regex(&glob) {
            Some(re) => re,
            None => return false,
        };
        re.is_match(&self.repr()) || re.is_match(&self.repr_with_revision())
    }

    /// The explicit sort tuple used for presentation ordering.
    fn sort_key(&self) -> (&str, &Version, &str, &str, f64, &str) {
        (
            &self.name,
            &self.version,
            self.user.as_deref().unwrap_or(""),
            self.channel.as_deref().unwrap_or(""),
            self.timestamp.unwrap_or(0.0),
            self.revision.as_deref().unwrap_or(""),
        )
    }
}

impl FromStr for RecipeReference {
    type Err = InvalidReference;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.contains(':') {
            return Err(InvalidReference::PackageReference(text.to_string()));
        }
        let (rest, timestamp) = match text.split_once('%') {
            Some((r, ts)) => {
                let ts: f64 = ts
                    .parse()
                    .map_err(|_| InvalidReference::BadTimestamp(text.to_string()))?;
                (r, Some(ts))
            },
            None => (text, None),
        };
        let (rest, revision) = match rest.split_once('#') {
            Some((r, rev)) if !rev.is_empty() => (r, Some(rev.to_string())),
            Some((r, _)) => (r, None),
            None => (rest, None),
        };
        let (rest, user, channel) = match rest.split_once('@') {
            Some((r, uc)) => match uc.split_once('/') {
                Some((u, c)) => (r, non_empty(u), non_empty(c)),
                None => (r, non_empty(uc), None),
            },
            None => (rest, None, None),
        };
        if channel.is_some() && user.is_none() {
            return Err(InvalidReference::ChannelWithoutUser(text.to_string()));
        }
        let (name, version) = rest
            .split_once('/')
            .ok_or_else(|| InvalidReference::MissingVersion(text.to_string()))?;
        if name.is_empty() {
            return Err(InvalidReference::MissingName(text.to_string()));
        }
        if version.is_empty() {
            return Err(InvalidReference::MissingVersion(text.to_string()));
        }
        let version = version
            .parse()
            .map_err(|e| InvalidReference::BadVersion(text.to_string(), e))?;
        Ok(RecipeReference {
            name: name.to_string(),
            version,
            user,
            channel,
            revision,
            timestamp,
        })
    }
}

impl fmt::Display for RecipeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for RecipeReference {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.version != other.version
            || self.user != other.user
            || self.channel != other.channel
        {
            return false;
        }
        // A missing revision on either side is a wildcard.
        match (&self.revision, &other.revision) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl Eq for RecipeReference {}

impl Hash for RecipeReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Excludes revision and timestamp so revisions of one reference
        // collapse in hashed collections, consistent with wildcard Eq.
        self.name.hash(state);
        self.version.hash(state);
        self.user.hash(state);
        self.channel.hash(state);
    }
}

impl PartialOrd for RecipeReference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecipeReference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (n1, v1, u1, c1, t1, r1) = self.sort_key();
        let (n2, v2, u2, c2, t2, r2) = other.sort_key();
        n1.cmp(n2)
            .then_with(|| v1.cmp(v2))
            .then_with(|| u1.cmp(u2))
            .then_with(|| c1.cmp(c2))
            .then_with(|| t1.total_cmp(&t2))
            .then_with(|| r1.cmp(r2))
    }
}

impl Serialize for RecipeReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr_full())
    }
}

impl<'de> Deserialize<'de> for RecipeReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl PackageId {
    /// Wraps a computed digest.
    pub fn new(digest: impl Into<String>) -> Self {
        PackageId(digest.into())
    }

    /// The hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PkgReference {
    /// Builds a package reference for a recipe and its computed id.
    pub fn new(ref_: RecipeReference, package_id: PackageId) -> Self {
        PkgReference {
            ref_,
            package_id,
            revision: None,
            timestamp: None,
        }
    }

    /// The canonical form `name/version@user/channel#rrev:package_id#prev`.
    pub fn repr(&self) -> String {
        let mut out = format!("{}:{}", self.ref_.repr_with_revision(), self.package_id);
        if let Some(prev) = &self.revision {
            out.push('#');
            out.push_str(prev);
        }
        out
    }

    /// The fully qualified form including the package revision timestamp.
    pub fn repr_full(&self) -> String {
        let mut out = self.repr();
        if let Some(ts) = self.timestamp {
            out.push('%');
            out.push_str(&format_ts(ts));
        }
        out
    }
}

impl FromStr for PkgReference {
    type Err = InvalidReference;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (rest, timestamp) = match text.rsplit_once('%') {
            Some((r, ts)) => {
                let ts: f64 = ts
                    .parse()
                    .map_err(|_| InvalidReference::BadTimestamp(text.to_string()))?;
                (r, Some(ts))
            },
            None => (text, None),
        };
        let (recipe, pkg) = rest
            .split_once(':')
            .ok_or_else(|| InvalidReference::MissingVersion(text.to_string()))?;
        let ref_: RecipeReference = recipe.parse()?;
        let (package_id, revision) = match pkg.split_once('#') {
            Some((id, prev)) => (id, Some(prev.to_string())),
            None => (pkg, None),
        };
        if package_id.is_empty() {
            return Err(InvalidReference::MissingName(text.to_string()));
        }
        Ok(PkgReference {
            ref_,
            package_id: PackageId::new(package_id),
            revision,
            timestamp,
        })
    }
}

impl fmt::Display for PkgReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for PkgReference {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp-blind, like recipe references.
        self.ref_ == other.ref_
            && self.package_id == other.package_id
            && self.revision == other.revision
    }
}

impl Eq for PkgReference {}

impl Hash for PkgReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ref_.hash(state);
        self.package_id.hash(state);
        self.revision.hash(state);
    }
}

impl Serialize for PkgReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr_full())
    }
}

impl<'de> Deserialize<'de> for PkgReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

//================================================================================================
// Functions
//================================================================================================

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() || s == "_" {
        None
    } else {
        Some(s.to_string())
    }
}

/// Renders a timestamp without a trailing `.0` for whole seconds, so
/// round-tripping through text is stable.
fn format_ts(ts: f64) -> String {
    if ts.fract() == 0.0 {
        format!("{}", ts as i64)
    } else {
        format!("{ts}")
    }
}

/// Translates a `*`/`?` glob into an anchored regex.
fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&lazy_regex::regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}
