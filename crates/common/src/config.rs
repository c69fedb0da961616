//! Configuration records for mutable modules.
//!
//! Serialised as JSON. Every optional field has a sensible default so a minimal
//! record (just the candidates) produces a working mutable. Candidates are a
//! JSON *array*, not an object: insertion order defines which component of the
//! architecture parameter belongs to which candidate, and duplicates must be
//! detectable at construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque configuration record for one computation unit: a `"type"` key plus
/// constructor arguments. Interpreted only by a module factory.
pub type OpConfig = Map<String, Value>;

/// One named candidate operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub name: String,
    #[serde(flatten)]
    pub op: OpConfig,
}

impl CandidateConfig {
    pub fn new(name: impl Into<String>, op: OpConfig) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    /// Shorthand for a candidate with only a `"type"` key.
    pub fn of_type(name: impl Into<String>, ty: &str) -> Self {
        let mut op = OpConfig::new();
        op.insert("type".to_string(), Value::String(ty.to_string()));
        Self::new(name, op)
    }
}

/// Relaxation used by a single-input mutable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpRelaxation {
    /// Softmax-weighted sum over every candidate (DARTS).
    #[default]
    Softmax,
    /// One-hot categorical sample with straight-through gradient (DSNAS).
    OneHot,
}

/// Configuration for a mutable operation (alternative ops on one input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutableOpConfig {
    /// Name used by the mutator to look up this mutable's parameter.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub relaxation: OpRelaxation,
    /// Candidate operations, in architecture-parameter order.
    pub candidates: Vec<CandidateConfig>,
    /// Keyword overrides merged into every candidate before construction.
    #[serde(default)]
    pub module_kwargs: Option<OpConfig>,
    /// One-hot only: ignore the learned distribution and sample uniformly.
    #[serde(default)]
    pub random_sample: bool,
    /// Seed for the sampling RNG (entropy when absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl MutableOpConfig {
    pub fn new(candidates: Vec<CandidateConfig>) -> Self {
        Self {
            alias: None,
            relaxation: OpRelaxation::Softmax,
            candidates,
            module_kwargs: None,
            random_sample: false,
            seed: None,
        }
    }

    /// Candidate configs with `module_kwargs` applied uniformly.
    ///
    /// Overrides win over the candidate's own keys.
    pub fn resolved_candidates(&self) -> Vec<CandidateConfig> {
        self.candidates
            .iter()
            .map(|c| {
                let mut op = c.op.clone();
                if let Some(kwargs) = &self.module_kwargs {
                    for (k, v) in kwargs {
                        op.insert(k.clone(), v.clone());
                    }
                }
                CandidateConfig::new(c.name.clone(), op)
            })
            .collect()
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Gumbel-softmax settings for a choice route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GumbelConfig {
    /// Softmax temperature; lower is sharper. Must be finite and > 0.
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Discretise the forward value to an exact one-hot vector.
    #[serde(default = "default_true")]
    pub hard: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Configuration for a choice route (alternative input edges).
///
/// Edges themselves are not part of the record: they are handed over as
/// already-built units when the route is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceRouteConfig {
    #[serde(default)]
    pub alias: Option<String>,
    /// How many edges [`sample_choice`] keeps.
    #[serde(default = "default_num_chosen")]
    pub num_chosen: usize,
    /// Weighted (differentiable) combination vs plain sum of every edge.
    #[serde(default)]
    pub with_arch_param: bool,
    /// Use Gumbel-softmax instead of softmax when present.
    #[serde(default)]
    pub gumbel: Option<GumbelConfig>,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_tau() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_num_chosen() -> usize {
    2
}

impl Default for GumbelConfig {
    fn default() -> Self {
        Self {
            tau: 1.0,
            hard: true,
            seed: None,
        }
    }
}

impl Default for ChoiceRouteConfig {
    fn default() -> Self {
        Self {
            alias: None,
            num_chosen: 2,
            with_arch_param: false,
            gumbel: None,
        }
    }
}

impl ChoiceRouteConfig {
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
