//! Module factory: configuration record → candidate unit.
//!
//! A record is a JSON object with a `"type"` key plus constructor arguments.
//! Construction failures (unknown type, missing or ill-typed argument) are hard
//! errors; there is no fallback unit.
//!
//! | Type | Arguments | Forward |
//! |------|-----------|---------|
//! | `identity` | — | `x` |
//! | `zero` | — | `0 · x` |
//! | `relu` | — | `max(0, x)` |
//! | `silu` | — | `x · σ(x)` |
//! | `relu_squared` | — | `max(0, x)²` |
//! | `scale` | `factor: f64` | `factor · x` |
//! | `linear` | `in_dim`, `out_dim`, `bias = true` | `x Wᵀ (+ b)` |

use std::collections::HashMap;

use candle_core::{Result as CandleResult, Tensor};
use candle_nn::{Module, VarBuilder};
use serde_json::Value;

use diffnas_common::{MutableError, OpConfig, Result};

use crate::candidates::Candidate;

/// Builds one candidate from its configuration record.
pub trait ModuleFactory {
    fn build(&self, config: &OpConfig, vb: VarBuilder) -> Result<Candidate>;
}

/// Builder for one registered `"type"`.
pub type Builder = fn(&OpConfig, VarBuilder) -> Result<Candidate>;

/// Name → builder table. [`Default`] registers the built-in operations.
pub struct ModuleRegistry {
    builders: HashMap<String, Builder>,
}

impl ModuleRegistry {
    /// Empty registry (no built-ins).
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register("identity", |_, _| Ok(Box::new(Pointwise::Identity)));
        r.register("zero", |_, _| Ok(Box::new(Pointwise::Zero)));
        r.register("relu", |_, _| Ok(Box::new(Pointwise::Relu)));
        r.register("silu", |_, _| Ok(Box::new(Pointwise::Silu)));
        r.register("relu_squared", |_, _| Ok(Box::new(Pointwise::ReluSquared)));
        r.register("scale", build_scale);
        r.register("linear", build_linear);
        r
    }

    /// Register (or replace) the builder for `ty`.
    pub fn register(&mut self, ty: &str, builder: Builder) {
        self.builders.insert(ty.to_string(), builder);
    }

    pub fn contains(&self, ty: &str) -> bool {
        self.builders.contains_key(ty)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ModuleFactory for ModuleRegistry {
    fn build(&self, config: &OpConfig, vb: VarBuilder) -> Result<Candidate> {
        let ty = config
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MutableError::factory(format!("missing string `type` in {config:?}")))?;
        let builder = self
            .builders
            .get(ty)
            .ok_or_else(|| MutableError::factory(format!("unknown module type `{ty}`")))?;
        builder(config, vb)
    }
}

// ── Built-in units ──────────────────────────────────────────────────────────

/// Parameter-free element-wise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointwise {
    Identity,
    Zero,
    Relu,
    Silu,
    ReluSquared,
}

impl Module for Pointwise {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        match self {
            Self::Identity => Ok(xs.clone()),
            Self::Zero => xs.zeros_like(),
            Self::Relu => xs.relu(),
            Self::Silu => candle_nn::ops::silu(xs),
            Self::ReluSquared => xs.relu()?.sqr(),
        }
    }
}

/// `factor · x`.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Module for Scale {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        xs.affine(self.factor, 0.0)
    }
}

fn build_scale(config: &OpConfig, _vb: VarBuilder) -> Result<Candidate> {
    Ok(Box::new(Scale::new(f64_arg(config, "factor")?)))
}

fn build_linear(config: &OpConfig, vb: VarBuilder) -> Result<Candidate> {
    let in_dim = usize_arg(config, "in_dim")?;
    let out_dim = usize_arg(config, "out_dim")?;
    let layer = if bool_arg_or(config, "bias", true)? {
        candle_nn::linear(in_dim, out_dim, vb)?
    } else {
        candle_nn::linear_no_bias(in_dim, out_dim, vb)?
    };
    Ok(Box::new(layer))
}

// ── Argument helpers ────────────────────────────────────────────────────────

fn arg<'a>(config: &'a OpConfig, key: &str) -> Result<&'a Value> {
    config
        .get(key)
        .ok_or_else(|| MutableError::factory(format!("missing argument `{key}`")))
}

pub fn usize_arg(config: &OpConfig, key: &str) -> Result<usize> {
    arg(config, key)?
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| MutableError::factory(format!("`{key}` must be a non-negative integer")))
}

pub fn f64_arg(config: &OpConfig, key: &str) -> Result<f64> {
    arg(config, key)?
        .as_f64()
        .ok_or_else(|| MutableError::factory(format!("`{key}` must be a number")))
}

pub fn bool_arg_or(config: &OpConfig, key: &str, default: bool) -> Result<bool> {
    match config.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| MutableError::factory(format!("`{key}` must be a boolean"))),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use diffnas_common::CandidateConfig;

    fn build(op: &OpConfig) -> Result<Candidate> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ModuleRegistry::default().build(op, vb)
    }

    #[test]
    fn builtins_forward() {
        let x = Tensor::new(&[-1f32, 2.0], &Device::Cpu).unwrap();
        let run = |ty: &str| {
            let op = build(&CandidateConfig::of_type("c", ty).op).unwrap();
            op.forward(&x).unwrap().to_vec1::<f32>().unwrap()
        };
        assert_eq!(run("identity"), vec![-1.0, 2.0]);
        assert_eq!(run("zero"), vec![0.0, 0.0]);
        assert_eq!(run("relu"), vec![0.0, 2.0]);
        assert_eq!(run("relu_squared"), vec![0.0, 4.0]);
    }

    #[test]
    fn scale_reads_factor() {
        let mut op = CandidateConfig::of_type("s", "scale").op;
        op.insert("factor".into(), 3.0.into());
        let m = build(&op).unwrap();
        let x = Tensor::new(&[1f32, -2.0], &Device::Cpu).unwrap();
        assert_eq!(m.forward(&x).unwrap().to_vec1::<f32>().unwrap(), vec![3.0, -6.0]);
    }

    #[test]
    fn linear_shapes() {
        let mut op = CandidateConfig::of_type("l", "linear").op;
        op.insert("in_dim".into(), 4.into());
        op.insert("out_dim".into(), 3.into());
        let m = build(&op).unwrap();
        let x = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(m.forward(&x).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn unknown_type_and_bad_args_fail() {
        let bogus = CandidateConfig::of_type("x", "conv9x9").op;
        assert!(matches!(build(&bogus), Err(MutableError::Factory(_))));

        let no_factor = CandidateConfig::of_type("s", "scale").op;
        assert!(matches!(build(&no_factor), Err(MutableError::Factory(_))));

        let mut bad_dim = CandidateConfig::of_type("l", "linear").op;
        bad_dim.insert("in_dim".into(), "four".into());
        bad_dim.insert("out_dim".into(), 3.into());
        assert!(matches!(build(&bad_dim), Err(MutableError::Factory(_))));

        assert!(matches!(build(&OpConfig::new()), Err(MutableError::Factory(_))));
    }

    #[test]
    fn custom_builder_registration() {
        let mut reg = ModuleRegistry::empty();
        assert!(!reg.contains("identity"));
        reg.register("double", |_, _| Ok(Box::new(Scale::new(2.0))));
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let m = reg
            .build(&CandidateConfig::of_type("d", "double").op, vb)
            .unwrap();
        let x = Tensor::new(&[1f32], &Device::Cpu).unwrap();
        assert_eq!(m.forward(&x).unwrap().to_vec1::<f32>().unwrap(), vec![2.0]);
    }
}
