//! Repository references and their parsing

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A GitHub repository identified by owner and name.
///
/// Identity is case-insensitive: `Vercel/Next.js` and `vercel/next.js` are the
/// same repository. Use [`RepoRef::key`] for lookups and comparisons; the
/// original casing is kept for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Case-normalized composite key for a repository.
///
/// Every map in the crate is keyed by this type, and selection dedup compares
/// it too, so both sides agree on what "the same repository" means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    owner: String,
    name: String,
}

impl RepoRef {
    /// Create a reference, validating both components
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();

        if !is_valid_owner(&owner) {
            return Err(Error::Validation(format!(
                "Invalid repository owner: '{}'",
                owner
            )));
        }
        if !is_valid_name(&name) {
            return Err(Error::Validation(format!(
                "Invalid repository name: '{}'",
                name
            )));
        }

        Ok(Self { owner, name })
    }

    /// Parse user input into a repository reference.
    ///
    /// Accepted forms:
    /// - `owner/repo`
    /// - `https://github.com/owner/repo` (extra path segments are ignored)
    /// - `github.com/owner/repo`
    /// - `git@github.com:owner/repo.git`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let trimmed = input.strip_suffix(".git").unwrap_or(input);
        let trimmed = trimmed.trim_end_matches('/');

        if trimmed.is_empty() {
            return Err(Error::Validation(
                "Repository cannot be empty".to_string(),
            ));
        }

        // owner/repo shorthand
        if !trimmed.contains("://") && !trimmed.contains('@') && !trimmed.contains("github.com") {
            let parts: Vec<&str> = trimmed.split('/').collect();
            if parts.len() == 2 {
                return Self::new(parts[0], parts[1]);
            }
            return Err(invalid_input(input));
        }

        if trimmed.contains("://") {
            let url = url::Url::parse(trimmed).map_err(|_| invalid_input(input))?;
            let host = url.host_str().unwrap_or_default();
            if host != "github.com" && host != "www.github.com" {
                return Err(invalid_input(input));
            }
            return from_path(url.path(), input);
        }

        if let Some(path) = trimmed.strip_prefix("git@github.com:") {
            return from_path(path, input);
        }

        let bare = trimmed.strip_prefix("www.").unwrap_or(trimmed);
        if let Some(path) = bare.strip_prefix("github.com/") {
            return from_path(path, input);
        }

        Err(invalid_input(input))
    }

    /// The case-normalized key for this repository
    pub fn key(&self) -> RepoKey {
        RepoKey {
            owner: self.owner.to_lowercase(),
            name: self.name.to_lowercase(),
        }
    }

    /// Case-insensitive identity check
    pub fn same_repo(&self, other: &RepoRef) -> bool {
        self.key() == other.key()
    }

    /// `owner/name` form
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Web URL of the repository
    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn from_path(path: &str, input: &str) -> Result<RepoRef> {
    let mut parts = path.trim_start_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
            let name = name.strip_suffix(".git").unwrap_or(name);
            RepoRef::new(owner, name)
        }
        _ => Err(invalid_input(input)),
    }
}

fn invalid_input(input: &str) -> Error {
    Error::Validation(format!(
        "Could not parse repository from '{}'. Use owner/repo or a GitHub URL",
        input
    ))
}

// GitHub logins: alphanumerics and single hyphens
fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner.len() <= 39
        && !owner.starts_with('-')
        && !owner.ends_with('-')
        && !owner.contains("--")
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
