//! The ordered set of repositories under comparison
//!
//! Insertion order is significant: it drives chart colors, legend order and
//! which repository provides the base week axis. Duplicates are rejected
//! case-insensitively.

use crate::error::{Error, Result};
use crate::repo::RepoRef;
use tracing::warn;
use url::Url;

/// Query parameter holding the comma-separated selection in share URLs
pub const SHARE_PARAM: &str = "repos";

/// Ordered, deduplicated list of selected repositories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    repos: Vec<RepoRef>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a repository; a case-insensitive duplicate is rejected and the
    /// selection is left unchanged.
    pub fn add(&mut self, repo: RepoRef) -> Result<()> {
        if self.contains(&repo) {
            return Err(Error::Validation(format!(
                "{} is already being compared",
                repo
            )));
        }
        self.repos.push(repo);
        Ok(())
    }

    /// Parse user input and append it
    pub fn add_input(&mut self, input: &str) -> Result<RepoRef> {
        let repo = RepoRef::parse(input)?;
        self.add(repo.clone())?;
        Ok(repo)
    }

    /// Remove the repository at `index`, keeping the order of the rest
    pub fn remove(&mut self, index: usize) -> Option<RepoRef> {
        if index < self.repos.len() {
            Some(self.repos.remove(index))
        } else {
            None
        }
    }

    pub fn contains(&self, repo: &RepoRef) -> bool {
        self.repos.iter().any(|r| r.same_repo(repo))
    }

    pub fn repos(&self) -> &[RepoRef] {
        &self.repos
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Comma-joined `owner/name` list used in share URLs
    pub fn to_query_value(&self) -> String {
        self.repos
            .iter()
            .map(RepoRef::full_name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Rebuild a selection from its share representation.
    ///
    /// Invalid and duplicate entries are skipped with a warning so a
    /// hand-edited link still loads whatever it can.
    pub fn from_query_value(value: &str) -> Self {
        let mut selection = Self::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Err(e) = selection.add_input(part) {
                warn!("Ignoring '{}' from shared selection: {}", part, e);
            }
        }
        selection
    }

    /// Read the selection from a share URL; a URL without the parameter
    /// yields an empty selection.
    pub fn from_url(url: &Url) -> Self {
        url.query_pairs()
            .find(|(k, _)| k == SHARE_PARAM)
            .map(|(_, v)| Self::from_query_value(&v))
            .unwrap_or_default()
    }

    /// Rewrite the share parameter of `url` in place, keeping every other
    /// query parameter. An empty selection removes the parameter.
    pub fn write_to_url(&self, url: &mut Url) {
        let others: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != SHARE_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.set_query(None);
        if others.is_empty() && self.is_empty() {
            return;
        }

        let mut pairs = url.query_pairs_mut();
        for (k, v) in &others {
            pairs.append_pair(k, v);
        }
        if !self.is_empty() {
            pairs.append_pair(SHARE_PARAM, &self.to_query_value());
        }
    }

    /// Build a share URL for this selection on top of `base`
    pub fn share_url(&self, base: &str) -> Result<Url> {
        let mut url = Url::parse(base)?;
        self.write_to_url(&mut url);
        Ok(url)
    }
}
