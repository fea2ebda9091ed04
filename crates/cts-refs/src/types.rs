//! Reference names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RefError, RefResult};
use crate::names::{validate_branch_name, validate_tag_name};

const HEADS: &str = "refs/heads/";
const TAGS: &str = "refs/tags/";

/// The namespace a reference lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// Mutable pointer that moves forward as commits are added.
    Branch,
    /// Pointer fixed at creation.
    Tag,
}

/// A validated, fully qualified reference name such as `refs/heads/main`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// `refs/heads/<name>`.
    pub fn branch(name: &str) -> RefResult<Self> {
        validate_branch_name(name)?;
        Ok(Self(format!("{HEADS}{name}")))
    }

    /// `refs/tags/<name>`.
    pub fn tag(name: &str) -> RefResult<Self> {
        validate_tag_name(name)?;
        Ok(Self(format!("{TAGS}{name}")))
    }

    /// Parse a fully qualified name.
    pub fn parse(full: &str) -> RefResult<Self> {
        if let Some(short) = full.strip_prefix(HEADS) {
            Self::branch(short)
        } else if let Some(short) = full.strip_prefix(TAGS) {
            Self::tag(short)
        } else {
            Err(RefError::InvalidName {
                name: full.to_string(),
                reason: format!("must start with '{HEADS}' or '{TAGS}'"),
            })
        }
    }

    /// Accept either a full name or a bare branch name.
    pub fn parse_or_branch(name: &str) -> RefResult<Self> {
        if name.starts_with("refs/") {
            Self::parse(name)
        } else {
            Self::branch(name)
        }
    }

    pub fn kind(&self) -> RefKind {
        if self.0.starts_with(TAGS) {
            RefKind::Tag
        } else {
            RefKind::Branch
        }
    }

    pub fn is_tag(&self) -> bool {
        self.kind() == RefKind::Tag
    }

    /// The name without its `refs/heads/` or `refs/tags/` prefix.
    pub fn short_name(&self) -> &str {
        let prefix = match self.kind() {
            RefKind::Branch => HEADS,
            RefKind::Tag => TAGS,
        };
        &self.0[prefix.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefName({})", self.0)
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefName {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RefName {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}
