//! # Version Model and Range Resolution
//!
//! Recipe versions are *not* strict semver: `2`, `1.0`, `1.0.0-rc1`,
//! `1.2.3.4` and letter segments such as `1.0b` are all valid. This module
//! provides the comparable [`Version`] type used throughout the graph, the
//! bracket range expression [`VersionRange`] (e.g. `[>=1.0 <2]`), and the
//! selection policy that resolves a range against a pool of candidates.
//!
//! ## Ordering
//!
//! Versions compare segment-wise. Numeric segments compare numerically,
//! alphanumeric ones lexicographically, and a numeric segment always sorts
//! below an alphanumeric one in the same position. A version that is a
//! strict prefix of another sorts lower (`1.0 < 1.0.0`), and a version
//! carrying a prerelease sorts below the same version without one. Build
//! metadata (after `+`) never participates in ordering.
//!
//! ## Ranges
//!
//! A range is a bracketed conjunction of space-separated clauses:
//!
//! ```text
//! [>=1.0 <2.0]    # at least 1.0, below 2.0
//! [^1.2]          # compatible: >=1.2, same major
//! [~1.2]          # approximately: >=1.2, same major.minor
//! [=1.0]          # exactly 1.0 (bare `[1.0]` means the same)
//! ```
//!
//! Selection always picks the *highest* candidate satisfying every clause,
//! so resolution is deterministic and monotonic: adding a newer satisfying
//! candidate to the pool can only move the answer up.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::multispace1;
use nom::combinator::{all_consuming, map, opt};
use nom::multi::separated_list1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod test;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while parsing or resolving versions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionError {
    /// The version string was empty.
    #[error("a version cannot be empty")]
    Empty,
    /// The range expression could not be parsed.
    #[error("invalid version range expression: `{0}`")]
    InvalidRange(String),
    /// No candidate satisfied the range.
    #[error("version range `{expr}` could not be resolved; closest candidates: {}",
            closest.join(", "))]
    NotResolved {
        /// The unsatisfied range expression.
        expr: String,
        /// Nearest available versions, for diagnostics.
        closest: Vec<String>,
    },
}

/// One dot-separated component of a version.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Alpha(String),
}

/// A comparable, semver-aware but non-strict version.
///
/// The original text is retained so the display form round-trips exactly.
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    items: Vec<Segment>,
    pre: Vec<Segment>,
    build: Option<String>,
}

/// A single comparison clause inside a range expression.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Op,
    version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    /// `^`: at least the base version, same major.
    Compatible,
    /// `~`: at least the base version, same major.minor.
    Approx,
}

/// A parsed bracket range expression, a stateless predicate over versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    expr: String,
    clauses: Vec<Clause>,
}

/// Either an exact version or a range, as written in a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// A concrete pinned version.
    Exact(Version),
    /// A bracket range to be resolved against available candidates.
    Range(VersionRange),
}

//================================================================================================
// Impls
//================================================================================================

impl Segment {
    fn cmp_seg(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            // A numeric segment sorts below an alphanumeric one.
            (Segment::Num(_), Segment::Alpha(_)) => Ordering::Less,
            (Segment::Alpha(_), Segment::Num(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Num(n) => write!(f, "{n}"),
            Segment::Alpha(s) => f.write_str(s),
        }
    }
}

fn parse_segments(s: &str) -> Vec<Segment> {
    s.split('.')
        .map(|part| match part.parse::<u64>() {
            Ok(n) => Segment::Num(n),
            Err(_) => Segment::Alpha(part.to_string()),
        })
        .collect()
}

fn cmp_segment_lists(a: &[Segment], b: &[Segment]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp_seg(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl Version {
    /// Returns the original textual form of this version.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The first numeric segment, if any.
    pub fn major(&self) -> Option<u64> {
        self.numeric_at(0)
    }

    /// The second numeric segment, if any.
    pub fn minor(&self) -> Option<u64> {
        self.numeric_at(1)
    }

    /// The third numeric segment, if any.
    pub fn patch(&self) -> Option<u64> {
        self.numeric_at(2)
    }

    /// Renders only the leading `count` segments (e.g. `1.2` for a
    /// major+minor contribution to a package id).
    pub fn truncate(&self, count: usize) -> String {
        self.items
            .iter()
            .take(count)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    fn numeric_at(&self, idx: usize) -> Option<u64> {
        match self.items.get(idx) {
            Some(Segment::Num(n)) => Some(*n),
            _ => None,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }
        let (rest, build) = match s.split_once('+') {
            Some((r, b)) => (r, Some(b.to_string())),
            None => (s, None),
        };
        let (main, pre) = match rest.split_once('-') {
            Some((m, p)) => (m, parse_segments(p)),
            None => (rest, Vec::new()),
        };
        if main.is_empty() {
            return Err(VersionError::Empty);
        }
        Ok(Version {
            text: s.to_string(),
            items: parse_segments(main),
            pre,
            build,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match cmp_segment_lists(&self.items, &other.items) {
            Ordering::Equal => {},
            other => return other,
        }
        // A prerelease sorts below the same version without one.
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => cmp_segment_lists(&self.pre, &other.pre),
        }
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash must agree with Eq, which ignores build metadata.
        for seg in &self.items {
            seg.to_string().hash(state);
        }
        for seg in &self.pre {
            seg.to_string().hash(state);
        }
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Clause {
    fn contains(&self, v: &Version) -> bool {
        let base = &self.version;
        match self.op {
            Op::Gt => v > base,
            Op::Ge => v >= base,
            Op::Lt => v < base,
            Op::Le => v <= base,
            Op::Eq => v == base,
            Op::Compatible => v >= base && v.major() == base.major(),
            Op::Approx => {
                v >= base && v.major() == base.major() && v.minor() == base.minor()
            },
        }
    }
}

fn op(input: &str) -> IResult<&str, Op> {
    alt((
        map(tag(">="), |_| Op::Ge),
        map(tag("<="), |_| Op::Le),
        map(tag(">"), |_| Op::Gt),
        map(tag("<"), |_| Op::Lt),
        map(tag("="), |_| Op::Eq),
        map(tag("^"), |_| Op::Compatible),
        map(tag("~"), |_| Op::Approx),
    ))(input)
}

fn clause(input: &str) -> IResult<&str, (Option<Op>, &str)> {
    let version_text = take_while1(|c: char| !c.is_whitespace() && c != ']');
    map(nom::sequence::pair(opt(op), version_text), |(o, v)| (o, v))(input)
}

fn range_body(input: &str) -> IResult<&str, Vec<(Option<Op>, &str)>> {
    all_consuming(separated_list1(multispace1, clause))(input)
}

impl VersionRange {
    /// Parses the *body* of a bracket expression (without the brackets).
    pub fn parse(expr: &str) -> Result<Self, VersionError> {
        let trimmed = expr.trim();
        let (_, raw) =
            range_body(trimmed).map_err(|_| VersionError::InvalidRange(expr.to_string()))?;
        let mut clauses = Vec::with_capacity(raw.len());
        for (o, v) in raw {
            let version: Version = v
                .parse()
                .map_err(|_| VersionError::InvalidRange(expr.to_string()))?;
            clauses.push(Clause {
                // A missing operator means exact.
                op: o.unwrap_or(Op::Eq),
                version,
            });
        }
        Ok(VersionRange {
            expr: trimmed.to_string(),
            clauses,
        })
    }

    /// Returns the textual expression this range was parsed from.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Tests whether a concrete version satisfies every clause.
    pub fn contains(&self, v: &Version) -> bool {
        self.clauses.iter().all(|c| c.contains(v))
    }

    /// Conjoins two ranges. Since ranges are pure conjunctions, the
    /// intersection is simply the union of both clause lists.
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let mut clauses = self.clauses.clone();
        clauses.extend(other.clauses.iter().cloned());
        VersionRange {
            expr: format!("{} {}", self.expr, other.expr),
            clauses,
        }
    }

    /// Selects the highest candidate satisfying this range.
    ///
    /// Candidates may come in any order; ties between equal versions keep
    /// the earliest occurrence so the caller's cache-before-remote
    /// precedence is preserved.
    ///
    /// # Errors
    ///
    /// Fails with [`VersionError::NotResolved`] listing the nearest
    /// candidates when nothing satisfies the range.
    pub fn resolve<'a, I>(&self, candidates: I) -> Result<&'a Version, VersionError>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        let mut pool: Vec<&Version> = Vec::new();
        let mut best: Option<&Version> = None;
        for v in candidates {
            pool.push(v);
            if self.contains(v) && best.is_none_or(|b| v > b) {
                best = Some(v);
            }
        }
        best.ok_or_else(|| {
            pool.sort();
            let closest = pool
                .iter()
                .rev()
                .take(5)
                .map(|v| v.to_string())
                .collect();
            VersionError::NotResolved {
                expr: self.expr.clone(),
                closest,
            }
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.expr)
    }
}

impl VersionSpec {
    /// Parses the version field of a requirement: `[...]` yields a range,
    /// anything else an exact version.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        if let Some(body) = s.strip_prefix('[') {
            let body = body
                .strip_suffix(']')
                .ok_or_else(|| VersionError::InvalidRange(s.to_string()))?;
            Ok(VersionSpec::Range(VersionRange::parse(body)?))
        } else {
            Ok(VersionSpec::Exact(s.parse()?))
        }
    }

    /// Whether the given concrete version satisfies this spec.
    pub fn accepts(&self, v: &Version) -> bool {
        match self {
            VersionSpec::Exact(e) => e == v,
            VersionSpec::Range(r) => r.contains(v),
        }
    }

    /// Returns the pinned version when this spec is exact.
    pub fn exact(&self) -> Option<&Version> {
        match self {
            VersionSpec::Exact(v) => Some(v),
            VersionSpec::Range(_) => None,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Exact(v) => v.fmt(f),
            VersionSpec::Range(r) => r.fmt(f),
        }
    }
}
