//! Ordered, owned set of named candidate units.
//!
//! Insertion order is the contract with the mutator: the i-th component of an
//! architecture parameter weights the i-th candidate. Pruning rebuilds the set
//! from a filtered list, so survivors keep their relative order.

use std::collections::HashSet;

use candle_nn::Module;

use diffnas_common::{Chosen, MutableError, Result};

/// A black-box computation unit owned by a mutable.
pub type Candidate = Box<dyn Module + Send + Sync>;

pub struct CandidateSet {
    entries: Vec<(String, Candidate)>,
}

impl CandidateSet {
    /// Takes ownership of `entries`. Fails on an empty list or a repeated name.
    pub fn new(entries: Vec<(String, Candidate)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(MutableError::construction(
                "number of candidates must be at least 1, got 0",
            ));
        }
        check_unique(entries.iter().map(|(name, _)| name.as_str()))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Candidate> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, op)| op)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Candidate)> {
        self.entries.iter().map(|(n, op)| (n.as_str(), op))
    }

    /// Fails unless every chosen name is a current candidate, named once.
    pub fn validate(&self, chosen: &Chosen) -> Result<()> {
        if chosen.is_empty() {
            return Err(MutableError::state("chosen set must not be empty"));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = chosen.names().iter().find(|c| !seen.insert(c.as_str())) {
            return Err(MutableError::state(format!(
                "chosen `{repeated}` is listed more than once"
            )));
        }
        if let Some(unknown) = chosen.names().iter().find(|c| !self.contains(c)) {
            return Err(MutableError::state(format!(
                "chosen `{unknown}` is not one of {:?}",
                self.names()
            )));
        }
        Ok(())
    }

    /// Drop every candidate not in `chosen`; returns how many were dropped.
    ///
    /// Validates first, so a failing call leaves the set untouched.
    pub fn retain_chosen(&mut self, chosen: &Chosen) -> Result<usize> {
        self.validate(chosen)?;
        let before = self.entries.len();
        let kept: Vec<(String, Candidate)> = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|(name, _)| chosen.contains(name))
            .collect();
        self.entries = kept;
        Ok(before - self.entries.len())
    }
}

impl std::fmt::Debug for CandidateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, _)| n))
            .finish()
    }
}

/// Fails with a construction error on the first repeated name.
pub fn check_unique<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(MutableError::construction(format!(
                "duplicate candidate name `{name}`"
            )));
        }
    }
    Ok(())
}
