//! Container Image References
//!
//! Structural parsing of `[domain/]path[:tag][@digest]` references following
//! the docker distribution grammar. No normalization happens here: the name
//! `noobaa/noobaa-core` is kept as written and not expanded to a registry path.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Maximum length of the name component
const NAME_TOTAL_LENGTH_MAX: usize = 255;

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository name including the optional domain
    pub name: String,
    /// Tag, if present
    pub tag: Option<String>,
    /// Digest, if present
    pub digest: Option<String>,
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alpha_numeric = r"[a-z0-9]+";
        let separator = r"(?:[._]|__|[-]*)";
        let path_component = format!(r"{alpha_numeric}(?:{separator}{alpha_numeric})*");
        let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
        let domain = format!(r"{domain_component}(?:\.{domain_component})*(?::[0-9]+)?");
        let name = format!(r"(?:{domain}/)?{path_component}(?:/{path_component})*");
        let tag = r"[\w][\w.-]{0,127}";
        let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";
        let pattern = format!(r"^({name})(?::({tag}))?(?:@({digest}))?$");
        Regex::new(&pattern).expect("image reference grammar is a valid regex")
    })
}

impl ImageReference {
    /// Parse a reference string
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(invalid(s, "repository name must have at least one component"));
        }

        let caps = reference_regex().captures(s).ok_or_else(|| {
            if s.to_lowercase() != s && reference_regex().is_match(&s.to_lowercase()) {
                invalid(s, "repository name must be lowercase")
            } else {
                invalid(s, "invalid reference format")
            }
        })?;

        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(invalid(s, "repository name must not be more than 255 characters"));
        }

        Ok(Self {
            name: name.to_string(),
            tag: caps.get(2).map(|m| m.as_str().to_string()),
            digest: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn invalid(image: &str, reason: &str) -> Error {
    Error::InvalidImage {
        image: image.to_string(),
        reason: reason.to_string(),
    }
}
