//! Short-name rules for branches and tags.
//!
//! A short name is what follows `refs/heads/` or `refs/tags/`. It is split
//! on `/` into components; every component must be non-empty, must not
//! start with `.` and must not end with `.lock`. The whole name must not
//! contain `..`, `@{`, whitespace, control characters or any of
//! `~ ^ : ? * [ \`, and must not end with `.`.

use crate::error::{RefError, RefResult};

const FORBIDDEN: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// The first rule `name` breaks, if any.
fn violation(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("empty name".into());
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN.contains(c))
    {
        return Some(format!("character {ch:?} is not allowed"));
    }
    if name.contains("..") {
        return Some("'..' is not allowed".into());
    }
    if name.contains("@{") {
        return Some("'@{' is not allowed".into());
    }
    if name.ends_with('.') {
        return Some("trailing '.'".into());
    }
    name.split('/').find_map(|component| {
        if component.is_empty() {
            Some("empty path component (leading, trailing or doubled '/')".to_string())
        } else if component.starts_with('.') {
            Some(format!("component {component:?} starts with '.'"))
        } else if component.ends_with(".lock") {
            Some(format!("component {component:?} ends with '.lock'"))
        } else {
            None
        }
    })
}

fn check(name: &str) -> RefResult<()> {
    match violation(name) {
        None => Ok(()),
        Some(reason) => Err(RefError::InvalidName {
            name: name.to_string(),
            reason,
        }),
    }
}

/// ```
/// use cts_refs::names::validate_branch_name;
///
/// assert!(validate_branch_name("feature/auth").is_ok());
/// assert!(validate_branch_name("bad..name").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> RefResult<()> {
    check(name)
}

pub fn validate_tag_name(name: &str) -> RefResult<()> {
    check(name)
}
