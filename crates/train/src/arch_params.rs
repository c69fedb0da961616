//! Architecture parameters: the mutator side of a differentiable search.
//!
//! Owns one 1-D logit vector per mutable alias, hands them out per forward,
//! and runs the AdamW step on the search loss. Candidate weights are not
//! touched here; they belong to whatever optimiser trains the supernet.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::{AdamW, Init, Optimizer, ParamsAdamW, VarMap};
use serde::{Deserialize, Serialize};

use diffnas_core::{relax, MutableModule};

// ── Config ──────────────────────────────────────────────────────────────────

/// Optimiser knobs for the architecture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchOptimConfig {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Standard deviation of the `N(0, σ)` initial logits.
    #[serde(default = "default_init_std")]
    pub init_std: f64,
    /// Global L2 clip on architecture gradients (0 = off).
    #[serde(default)]
    pub grad_clip_max_norm: f64,
}

fn default_lr() -> f64 {
    3e-4
}
fn default_beta1() -> f64 {
    0.5
}
fn default_beta2() -> f64 {
    0.999
}
fn default_weight_decay() -> f64 {
    1e-3
}
fn default_init_std() -> f64 {
    1e-3
}

impl Default for ArchOptimConfig {
    fn default() -> Self {
        Self {
            lr: default_lr(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            weight_decay: default_weight_decay(),
            init_std: default_init_std(),
            grad_clip_max_norm: 0.0,
        }
    }
}

/// Metrics returned after each architecture step.
#[derive(Debug, Clone)]
pub struct ArchStepMetrics {
    pub step: usize,
    pub loss: f32,
    pub grad_norm: f64,
}

/// Exported view of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ArchSnapshot {
    pub alias: String,
    pub logits: Vec<f32>,
    pub probs: Vec<f32>,
}

// ── ArchParams ──────────────────────────────────────────────────────────────

pub struct ArchParams {
    varmap: VarMap,
    /// Registration order; the tensors share storage with `varmap`.
    params: Vec<(String, Tensor)>,
    optimizer: Option<AdamW>,
    config: ArchOptimConfig,
    device: Device,
    pub global_step: usize,
}

impl ArchParams {
    pub fn new(config: ArchOptimConfig, device: Device) -> Self {
        Self {
            varmap: VarMap::new(),
            params: Vec::new(),
            optimizer: None,
            config,
            device,
            global_step: 0,
        }
    }

    /// Create the parameter for `alias` with one logit per candidate.
    ///
    /// All parameters must be registered before the first [`step`](Self::step).
    pub fn register(&mut self, alias: &str, num_candidates: usize) -> anyhow::Result<&Tensor> {
        if self.optimizer.is_some() {
            bail!("cannot register `{alias}`: optimiser already started");
        }
        if num_candidates == 0 {
            bail!("cannot register `{alias}` with zero candidates");
        }
        if self.get(alias).is_some() {
            bail!("architecture parameter `{alias}` already registered");
        }
        let init = Init::Randn {
            mean: 0.0,
            stdev: self.config.init_std,
        };
        let t = self
            .varmap
            .get((num_candidates,), alias, init, DType::F32, &self.device)?;
        tracing::debug!(alias, num_candidates, "Registered architecture parameter");
        self.params.push((alias.to_string(), t));
        Ok(&self.params[self.params.len() - 1].1)
    }

    /// [`register`](Self::register) under the mutable's own alias.
    pub fn register_mutable<M: MutableModule>(&mut self, mutable: &M) -> anyhow::Result<&Tensor> {
        let alias = mutable
            .alias()
            .ok_or_else(|| anyhow!("mutable has no alias; cannot key its parameter"))?
            .to_string();
        self.register(&alias, mutable.num_candidates())
    }

    pub fn get(&self, alias: &str) -> Option<&Tensor> {
        self.params.iter().find(|(a, _)| a == alias).map(|(_, t)| t)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(a, _)| a.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The parameter registered under `mutable`'s alias.
    pub fn param_for<M: MutableModule>(&self, mutable: &M) -> anyhow::Result<&Tensor> {
        let alias = mutable
            .alias()
            .ok_or_else(|| anyhow!("mutable has no alias"))?;
        self.get(alias)
            .ok_or_else(|| anyhow!("no architecture parameter registered for `{alias}`"))
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
        if let Some(opt) = self.optimizer.as_mut() {
            opt.set_learning_rate(lr);
        }
    }

    /// Backward `loss`, clip, and take one AdamW step on the architecture
    /// parameters only. The optimiser is created on the first call.
    pub fn step(&mut self, loss: &Tensor) -> anyhow::Result<ArchStepMetrics> {
        if self.params.is_empty() {
            bail!("no architecture parameters registered");
        }
        let loss_val = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        let vars = self.varmap.all_vars();
        let mut grads = loss.backward()?;

        let norm = grad_norm(&grads, &vars)?;
        if self.config.grad_clip_max_norm > 0.0 {
            clip_grad_norm(&mut grads, &vars, norm, self.config.grad_clip_max_norm)?;
        }

        if self.optimizer.is_none() {
            let params = ParamsAdamW {
                lr: self.config.lr,
                beta1: self.config.beta1,
                beta2: self.config.beta2,
                weight_decay: self.config.weight_decay,
                ..Default::default()
            };
            self.optimizer = Some(AdamW::new(vars, params)?);
        }
        if let Some(opt) = self.optimizer.as_mut() {
            opt.step(&grads)?;
        }

        self.global_step += 1;
        Ok(ArchStepMetrics {
            step: self.global_step - 1,
            loss: loss_val,
            grad_norm: norm,
        })
    }

    /// Sample an export decision for `mutable` and record it as its current choice.
    pub fn sample<M: MutableModule>(&self, mutable: &mut M) -> anyhow::Result<M::Choice> {
        let choice = mutable.sample_choice(self.param_for(mutable)?)?;
        mutable.set_current_choice(choice.clone())?;
        Ok(choice)
    }

    /// Sample an export decision for `mutable` and fix it.
    pub fn sample_and_fix<M: MutableModule>(&self, mutable: &mut M) -> anyhow::Result<M::Choice> {
        let choice = mutable.sample_choice(self.param_for(mutable)?)?;
        mutable.fix_chosen(choice.clone())?;
        tracing::info!(
            alias = mutable.alias().unwrap_or_default(),
            choice = ?choice,
            "Architecture fixed"
        );
        Ok(choice)
    }

    /// Logits and softmax probabilities per alias, in registration order.
    pub fn snapshot(&self) -> anyhow::Result<Vec<ArchSnapshot>> {
        self.params
            .iter()
            .map(|(alias, t)| {
                Ok(ArchSnapshot {
                    alias: alias.clone(),
                    logits: relax::to_host(t)?,
                    probs: relax::to_host(&relax::softmax_probs(t)?)?,
                })
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.varmap
            .save(path)
            .with_context(|| format!("saving architecture parameters to {}", path.display()))
    }

    /// Load values into the already-registered parameters.
    pub fn load(&mut self, path: &Path) -> anyhow::Result<()> {
        self.varmap
            .load(path)
            .with_context(|| format!("loading architecture parameters from {}", path.display()))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

// ── Gradient utilities ──────────────────────────────────────────────────────

/// Total L2 norm of the gradients of `vars`.
fn grad_norm(grads: &GradStore, vars: &[Var]) -> anyhow::Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    Ok(total.sqrt())
}

/// Rescale gradients so their global L2 norm is at most `max_norm`.
fn clip_grad_norm(
    grads: &mut GradStore,
    vars: &[Var],
    norm: f64,
    max_norm: f64,
) -> anyhow::Result<()> {
    if norm <= max_norm {
        return Ok(());
    }
    let scale = max_norm / norm.max(1e-12);
    for var in vars {
        if let Some(g) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), g.affine(scale, 0.0)?);
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use diffnas_core::{Candidate, DiffMutableOp, Scale};

    fn op(alias: Option<&str>) -> DiffMutableOp {
        let candidates: Vec<(String, Candidate)> = [("one", 1.0), ("two", 2.0), ("three", 3.0)]
            .into_iter()
            .map(|(n, f)| {
                let c: Candidate = Box::new(Scale::new(f));
                (n.to_string(), c)
            })
            .collect();
        DiffMutableOp::from_candidates(alias.map(String::from), candidates).unwrap()
    }

    fn fast() -> ArchOptimConfig {
        ArchOptimConfig {
            lr: 0.1,
            weight_decay: 0.0,
            ..Default::default()
        }
    }

    /// Loss that rewards probability mass on candidate `target`.
    fn pick_loss(p: &Tensor, target: usize) -> Tensor {
        relax::softmax_probs(p)
            .unwrap()
            .get(target)
            .unwrap()
            .neg()
            .unwrap()
    }

    #[test]
    fn register_creates_small_logits() {
        let mut params = ArchParams::new(ArchOptimConfig::default(), Device::Cpu);
        let t = params.register("cell.op0", 5).unwrap();
        assert_eq!(t.dims(), &[5]);
        let host = t.to_vec1::<f32>().unwrap();
        assert!(host.iter().all(|v| v.abs() < 0.1));
        assert_eq!(params.aliases().collect::<Vec<_>>(), vec!["cell.op0"]);
    }

    #[test]
    fn register_rejects_duplicates_and_empty() {
        let mut params = ArchParams::new(ArchOptimConfig::default(), Device::Cpu);
        params.register("a", 2).unwrap();
        assert!(params.register("a", 2).is_err());
        assert!(params.register("b", 0).is_err());
        assert!(params.register_mutable(&op(None)).is_err());
        params.register_mutable(&op(Some("c"))).unwrap();
        assert_eq!(params.get("c").unwrap().dims(), &[3]);
    }

    #[test]
    fn steps_move_mass_to_target() {
        let mut params = ArchParams::new(fast(), Device::Cpu);
        params.register("op", 3).unwrap();
        for _ in 0..30 {
            let loss = pick_loss(params.get("op").unwrap(), 2);
            params.step(&loss).unwrap();
        }
        let snap = params.snapshot().unwrap();
        assert_eq!(relax::argmax(&snap[0].probs), 2);
        assert!(snap[0].probs[2] > 0.5);
        assert_eq!(params.global_step, 30);

        assert!(params.register("late", 2).is_err());
    }

    #[test]
    fn sample_and_fix_uses_the_learned_param() {
        let mut params = ArchParams::new(fast(), Device::Cpu);
        let mut mutable = op(Some("op"));
        params.register_mutable(&mutable).unwrap();
        for _ in 0..30 {
            let loss = pick_loss(params.param_for(&mutable).unwrap(), 1);
            params.step(&loss).unwrap();
        }
        assert_eq!(params.sample(&mut mutable).unwrap(), "two");
        assert_eq!(mutable.dump_chosen().unwrap(), "two");

        let choice = params.sample_and_fix(&mut mutable).unwrap();
        assert_eq!(choice, "two");
        assert!(mutable.is_fixed());
        let x = Tensor::new(&[1f32, -1.0], &Device::Cpu).unwrap();
        let out = mutable.forward(&x, None).unwrap();
        assert_eq!(out.to_vec1::<f32>().unwrap(), vec![2.0, -2.0]);
        // Fixed mutables reject a second fix.
        assert!(params.sample_and_fix(&mut mutable).is_err());
    }

    #[test]
    fn gradient_clipping_bounds_norm() {
        let config = ArchOptimConfig {
            grad_clip_max_norm: 1e-6,
            ..fast()
        };
        let mut params = ArchParams::new(config, Device::Cpu);
        params.register("op", 3).unwrap();
        let before = params.get("op").unwrap().to_vec1::<f32>().unwrap();
        let loss = pick_loss(params.get("op").unwrap(), 0);
        let m = params.step(&loss).unwrap();
        assert!(m.grad_norm > 0.0);
        // AdamW normalises the step, so only check the step still happened.
        let after = params.get("op").unwrap().to_vec1::<f32>().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("diffnas-arch-{}", std::process::id()));
        let path = dir.join("arch.safetensors");

        let mut params = ArchParams::new(fast(), Device::Cpu);
        params.register("op", 3).unwrap();
        params.step(&pick_loss(params.get("op").unwrap(), 0)).unwrap();
        params.save(&path).unwrap();
        let saved = params.get("op").unwrap().to_vec1::<f32>().unwrap();

        let mut restored = ArchParams::new(fast(), Device::Cpu);
        restored.register("op", 3).unwrap();
        restored.load(&path).unwrap();
        assert_eq!(restored.get("op").unwrap().to_vec1::<f32>().unwrap(), saved);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn forward_with_registered_param() {
        let mut params = ArchParams::new(ArchOptimConfig::default(), Device::Cpu);
        let mutable = op(Some("op"));
        params.register_mutable(&mutable).unwrap();
        let x = Tensor::new(&[1f32], &Device::Cpu).unwrap();
        let out = mutable
            .forward(&x, Some(params.param_for(&mutable).unwrap()))
            .unwrap();
        // Near-uniform logits: about the mean of 1, 2, 3.
        assert!((out.to_vec1::<f32>().unwrap()[0] - 2.0).abs() < 0.01);
    }
}
