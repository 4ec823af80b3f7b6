//! Image Tag Versions
//!
//! Lenient semantic versions as they appear in image tags (`5`, `5.1`,
//! `v5.1.0`, `5.2.0-rc1+build3`) and the comparison constraints used to
//! decide which core images the operator supports.

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^v?([0-9]+(?:\.[0-9]+)*)",
            r"(?:-([0-9A-Za-z\-~]+(?:\.[0-9A-Za-z\-~]+)*))?",
            r"(?:\+([0-9A-Za-z\-~]+(?:\.[0-9A-Za-z\-~]+)*))?$",
        ))
        .expect("version grammar is a valid regex")
    })
}

// =============================================================================
// Version
// =============================================================================

/// A parsed version; missing segments count as zero
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<u64>,
    pre: Option<String>,
    original: String,
}

impl Version {
    /// Parse a version string, e.g. an image tag
    pub fn parse(s: &str) -> Result<Self> {
        let caps = version_regex()
            .captures(s)
            .ok_or_else(|| Error::Internal(format!("Malformed version: {}", s)))?;

        let segments = caps[1]
            .split('.')
            .map(|seg| {
                seg.parse::<u64>()
                    .map_err(|e| Error::Internal(format!("Malformed version {}: {}", s, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            segments,
            pre: caps.get(2).map(|m| m.as_str().to_string()),
            original: s.to_string(),
        })
    }

    /// Check if this is a pre-release version
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    fn segment(&self, i: usize) -> u64 {
        self.segments.get(i).copied().unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len()).max(3);
        for i in 0..len {
            match self.segment(i).cmp(&other.segment(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        // A release sorts after any of its pre-releases
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => cmp_prerelease(a, b),
        }
    }
}

/// Order pre-release tags identifier by identifier.
///
/// Numeric identifiers compare as numbers and sort before alphanumeric ones;
/// a tag that is a prefix of another sorts first.
fn cmp_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.cmp(y),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
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

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

// =============================================================================
// Constraints
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    op: Operator,
    version: Version,
}

impl Bound {
    fn check(&self, v: &Version) -> bool {
        // Pre-releases only satisfy bounds that name a pre-release themselves
        if v.is_prerelease() && !self.version.is_prerelease() {
            return false;
        }
        let ord = v.cmp(&self.version);
        match self.op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Ge => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
        }
    }
}

/// A comma separated conjunction of bounds, e.g. `>=5, <6`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    bounds: Vec<Bound>,
    original: String,
}

impl VersionConstraint {
    /// Parse a constraint expression
    pub fn parse(s: &str) -> Result<Self> {
        let bounds = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                let (op, rest) = [
                    (">=", Operator::Ge),
                    ("<=", Operator::Le),
                    ("!=", Operator::Ne),
                    (">", Operator::Gt),
                    ("<", Operator::Lt),
                    ("=", Operator::Eq),
                ]
                .iter()
                .find_map(|(prefix, op)| part.strip_prefix(prefix).map(|rest| (*op, rest)))
                .unwrap_or((Operator::Eq, part));

                let version = Version::parse(rest.trim()).map_err(|_| {
                    Error::Configuration(format!("Malformed version constraint: {}", s))
                })?;
                Ok(Bound { op, version })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bounds,
            original: s.to_string(),
        })
    }

    /// Check if a version satisfies every bound
    pub fn check(&self, v: &Version) -> bool {
        self.bounds.iter().all(|b| b.check(v))
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}
