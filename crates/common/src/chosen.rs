//! Normalised argument of `fix_chosen`: one name or an ordered list of names.

use serde::{Deserialize, Serialize};

/// Ordered list of chosen candidate names.
///
/// Built from a single name or any sequence of names, so callers can pass
/// `"conv3x3"` or `vec!["edge_a", "edge_c"]` alike.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chosen(Vec<String>);

impl Chosen {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Chosen {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl From<String> for Chosen {
    fn from(name: String) -> Self {
        Self(vec![name])
    }
}

impl From<&String> for Chosen {
    fn from(name: &String) -> Self {
        Self(vec![name.clone()])
    }
}

impl From<Vec<String>> for Chosen {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<Vec<&str>> for Chosen {
    fn from(names: Vec<&str>) -> Self {
        Self(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Chosen {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for Chosen {
    fn from(names: &[String]) -> Self {
        Self(names.to_vec())
    }
}
