//! Mutable operations: K alternative operations applied to one shared input.
//!
//! * [`DiffMutableOp`] — softmax-weighted sum of every candidate (DARTS).
//! * [`OneHotMutableOp`] — one-hot categorical sample per forward, with a
//!   straight-through gradient (DSNAS).
//! * [`OpMutable`] — config-selected dispatch over the two.
//!
//! Candidates whose weight is exactly zero are skipped; some relaxations
//! produce exact zeros and there is no point running those branches.

use candle_core::{Result as CandleResult, Tensor, Var};
use candle_nn::{Module, VarBuilder};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use diffnas_common::{Chosen, MutableError, MutableOpConfig, OpRelaxation, Result};

use crate::candidates::{check_unique, Candidate, CandidateSet};
use crate::factory::ModuleFactory;
use crate::mutable::{ensure_unfixed, MutableModule};
use crate::relax;

// ── DiffMutableOp ───────────────────────────────────────────────────────────

/// Weighted-sum mutable operation.
///
/// Forward path while unfixed:
/// 1. `p = softmax(arch_param)`.
/// 2. `out = Σ p_i · op_i(x)` over candidates with `p_i > 0`.
///
/// After [`fix_chosen`](MutableModule::fix_chosen) only the chosen candidates
/// survive and the forward is their unweighted sum.
pub struct DiffMutableOp {
    alias: Option<String>,
    candidates: CandidateSet,
    chosen: Option<Chosen>,
    current_choice: Option<String>,
    is_fixed: bool,
}

impl DiffMutableOp {
    /// Build every candidate through `factory`, each under its own `vb` prefix.
    ///
    /// `module_kwargs` are merged into every candidate record first.
    pub fn new(
        config: &MutableOpConfig,
        factory: &dyn ModuleFactory,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.candidates.is_empty() {
            return Err(MutableError::construction(
                "number of candidate ops must be at least 1, got 0",
            ));
        }
        check_unique(config.candidates.iter().map(|c| c.name.as_str()))?;
        let entries = config
            .resolved_candidates()
            .into_iter()
            .map(|c| {
                let op = factory.build(&c.op, vb.pp(&c.name))?;
                Ok((c.name, op))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_candidates(config.alias.clone(), entries)
    }

    /// Take ownership of already-built candidates.
    pub fn from_candidates(
        alias: Option<String>,
        candidates: Vec<(String, Candidate)>,
    ) -> Result<Self> {
        Ok(Self {
            alias,
            candidates: CandidateSet::new(candidates)?,
            chosen: None,
            current_choice: None,
            is_fixed: false,
        })
    }

    /// Names kept by the fix, in the order they were passed.
    pub fn chosen(&self) -> Option<&Chosen> {
        self.chosen.as_ref()
    }

    /// `Σ w_i · op_i(x)` over `w_i > 0`. `weights` must be 1-D, one per candidate.
    pub(crate) fn weighted_forward(&self, x: &Tensor, weights: &Tensor) -> Result<Tensor> {
        let host = relax::to_host(weights)?;
        MutableError::check_len("weights", self.candidates.len(), host.len())?;
        let mut outputs = Vec::with_capacity(host.len());
        for (i, ((_, op), &w)) in self.candidates.iter().zip(host.iter()).enumerate() {
            if w > 0.0 {
                let out = op.forward(x)?;
                outputs.push(relax::scale_by_weight(weights, i, &out)?);
            }
        }
        relax::sum_outputs(outputs)
    }
}

impl MutableModule for DiffMutableOp {
    type Input = Tensor;
    type Choice = String;

    fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    fn choices(&self) -> Vec<String> {
        self.candidates.names()
    }

    fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    fn current_choice(&self) -> Option<&String> {
        self.current_choice.as_ref()
    }

    fn set_current_choice(&mut self, choice: String) -> Result<()> {
        self.candidates.validate(&Chosen::from(&choice))?;
        self.current_choice = Some(choice);
        Ok(())
    }

    fn forward_fixed(&self, x: &Tensor) -> Result<Tensor> {
        let chosen = self
            .chosen
            .as_ref()
            .ok_or_else(|| MutableError::state("call fix_chosen before forward_fixed"))?;
        // Pruned at fix time, so the survivors are exactly the chosen set.
        let mut outputs = Vec::with_capacity(chosen.len());
        for (_, op) in self.candidates.iter() {
            outputs.push(op.forward(x)?);
        }
        relax::sum_outputs(outputs)
    }

    fn forward_all(&self, x: &Tensor) -> Result<Tensor> {
        let outputs = self
            .candidates
            .iter()
            .map(|(_, op)| op.forward(x))
            .collect::<CandleResult<Vec<_>>>()?;
        relax::sum_outputs(outputs)
    }

    fn forward_arch_param(&self, x: &Tensor, arch_param: Option<&Tensor>) -> Result<Tensor> {
        let Some(arch_param) = arch_param else {
            return self.forward_all(x);
        };
        relax::check_arch_param(arch_param, self.candidates.len())?;
        let probs = self.compute_arch_probs(arch_param)?;
        self.weighted_forward(x, &probs)
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        ensure_unfixed(self.is_fixed)?;
        let chosen = chosen.into();
        let dropped = self.candidates.retain_chosen(&chosen)?;
        tracing::debug!(
            alias = ?self.alias,
            chosen = ?chosen.names(),
            dropped,
            "Mutable op fixed"
        );
        self.current_choice = chosen.names().first().cloned();
        self.chosen = Some(chosen);
        self.is_fixed = true;
        Ok(())
    }

    /// Argmax of the parameter; ties go to the first candidate.
    fn sample_choice(&self, arch_param: &Tensor) -> Result<String> {
        relax::check_arch_param(arch_param, self.candidates.len())?;
        let index = relax::argmax(&relax::to_host(arch_param)?);
        Ok(self.choices().swap_remove(index))
    }
}

// ── OneHotMutableOp ─────────────────────────────────────────────────────────

/// One-hot sampling mutable operation.
///
/// Each relaxed forward draws one candidate from `softmax(arch_param)` (or
/// uniformly when `random_sample` is set) and runs only that candidate. The
/// sampled one-hot vector is a [`Var`], so its gradient is available through
/// [`arch_weights`](Self::arch_weights); a straight-through residual also routes
/// the gradient back to the architecture parameter.
pub struct OneHotMutableOp {
    inner: DiffMutableOp,
    random_sample: bool,
    rng: Mutex<StdRng>,
    /// Weights drawn by the most recent relaxed forward.
    arch_weights: Mutex<Option<Var>>,
}

impl OneHotMutableOp {
    pub fn new(
        config: &MutableOpConfig,
        factory: &dyn ModuleFactory,
        vb: VarBuilder,
    ) -> Result<Self> {
        let inner = DiffMutableOp::new(config, factory, vb)?;
        Ok(Self::wrap(inner, config.random_sample, config.seed))
    }

    /// Turn a weighted-sum op into a sampling one (before any fix).
    pub fn wrap(inner: DiffMutableOp, random_sample: bool, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            inner,
            random_sample,
            rng: Mutex::new(rng),
            arch_weights: Mutex::new(None),
        }
    }

    pub fn random_sample(&self) -> bool {
        self.random_sample
    }

    /// Switch uniform sampling on (random-architecture warm-up) or off.
    pub fn set_random_sample(&mut self, random_sample: bool) {
        self.random_sample = random_sample;
    }

    /// The one-hot weights of the last relaxed forward, if any.
    pub fn arch_weights(&self) -> Option<Var> {
        self.arch_weights.lock().clone()
    }

    pub fn chosen(&self) -> Option<&Chosen> {
        self.inner.chosen()
    }

    fn sample_weights(&self, probs: &Tensor) -> Result<Var> {
        let host = relax::to_host(probs)?;
        let index = {
            let mut rng = self.rng.lock();
            if self.random_sample {
                rng.gen_range(0..host.len())
            } else {
                relax::sample_index(&host, &mut *rng)?
            }
        };
        let one_hot = relax::one_hot(index, host.len(), probs.dtype(), probs.device())?;
        Ok(Var::from_tensor(&one_hot)?)
    }
}

impl MutableModule for OneHotMutableOp {
    type Input = Tensor;
    type Choice = String;

    fn alias(&self) -> Option<&str> {
        self.inner.alias()
    }

    fn is_fixed(&self) -> bool {
        self.inner.is_fixed()
    }

    fn choices(&self) -> Vec<String> {
        self.inner.choices()
    }

    fn num_candidates(&self) -> usize {
        self.inner.num_candidates()
    }

    fn current_choice(&self) -> Option<&String> {
        self.inner.current_choice()
    }

    fn set_current_choice(&mut self, choice: String) -> Result<()> {
        self.inner.set_current_choice(choice)
    }

    fn forward_fixed(&self, x: &Tensor) -> Result<Tensor> {
        self.inner.forward_fixed(x)
    }

    fn forward_all(&self, x: &Tensor) -> Result<Tensor> {
        self.inner.forward_all(x)
    }

    fn forward_arch_param(&self, x: &Tensor, arch_param: Option<&Tensor>) -> Result<Tensor> {
        let Some(arch_param) = arch_param else {
            return self.forward_all(x);
        };
        relax::check_arch_param(arch_param, self.inner.num_candidates())?;
        let probs = self.compute_arch_probs(arch_param)?;
        let sampled = self.sample_weights(&probs)?;
        let weights = relax::straight_through(sampled.as_tensor(), &probs)?;
        self.arch_weights.lock().replace(sampled);
        self.inner.weighted_forward(x, &weights)
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        self.inner.fix_chosen(chosen)?;
        self.arch_weights.lock().take();
        Ok(())
    }

    fn sample_choice(&self, arch_param: &Tensor) -> Result<String> {
        self.inner.sample_choice(arch_param)
    }
}

// ── OpMutable (dispatch) ────────────────────────────────────────────────────

/// Dispatch enum selected by [`MutableOpConfig::relaxation`].
pub enum OpMutable {
    Diff(DiffMutableOp),
    OneHot(OneHotMutableOp),
}

impl OpMutable {
    pub fn new(
        config: &MutableOpConfig,
        factory: &dyn ModuleFactory,
        vb: VarBuilder,
    ) -> Result<Self> {
        match config.relaxation {
            OpRelaxation::Softmax => Ok(Self::Diff(DiffMutableOp::new(config, factory, vb)?)),
            OpRelaxation::OneHot => Ok(Self::OneHot(OneHotMutableOp::new(config, factory, vb)?)),
        }
    }
}

impl MutableModule for OpMutable {
    type Input = Tensor;
    type Choice = String;

    fn alias(&self) -> Option<&str> {
        match self {
            Self::Diff(m) => m.alias(),
            Self::OneHot(m) => m.alias(),
        }
    }

    fn is_fixed(&self) -> bool {
        match self {
            Self::Diff(m) => m.is_fixed(),
            Self::OneHot(m) => m.is_fixed(),
        }
    }

    fn choices(&self) -> Vec<String> {
        match self {
            Self::Diff(m) => m.choices(),
            Self::OneHot(m) => m.choices(),
        }
    }

    fn current_choice(&self) -> Option<&String> {
        match self {
            Self::Diff(m) => m.current_choice(),
            Self::OneHot(m) => m.current_choice(),
        }
    }

    fn set_current_choice(&mut self, choice: String) -> Result<()> {
        match self {
            Self::Diff(m) => m.set_current_choice(choice),
            Self::OneHot(m) => m.set_current_choice(choice),
        }
    }

    fn forward_fixed(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Diff(m) => m.forward_fixed(x),
            Self::OneHot(m) => m.forward_fixed(x),
        }
    }

    fn forward_all(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Diff(m) => m.forward_all(x),
            Self::OneHot(m) => m.forward_all(x),
        }
    }

    fn forward_arch_param(&self, x: &Tensor, arch_param: Option<&Tensor>) -> Result<Tensor> {
        match self {
            Self::Diff(m) => m.forward_arch_param(x, arch_param),
            Self::OneHot(m) => m.forward_arch_param(x, arch_param),
        }
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        match self {
            Self::Diff(m) => m.fix_chosen(chosen),
            Self::OneHot(m) => m.fix_chosen(chosen),
        }
    }

    fn sample_choice(&self, arch_param: &Tensor) -> Result<String> {
        match self {
            Self::Diff(m) => m.sample_choice(arch_param),
            Self::OneHot(m) => m.sample_choice(arch_param),
        }
    }
}

// ── NestedOp ────────────────────────────────────────────────────────────────

/// Presents a mutable op as a plain [`Module`], e.g. as an edge of a choice
/// route. Unfixed it runs the dense all-candidates path; fixed it runs the
/// chosen candidates.
pub struct NestedOp<M>(pub M);

impl<M> Module for NestedOp<M>
where
    M: MutableModule<Input = Tensor>,
{
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        self.0.forward(xs, None).map_err(|e| match e {
            MutableError::Tensor(e) => e,
            other => candle_core::Error::wrap(other),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use diffnas_common::{CandidateConfig, OpConfig};

    use crate::factory::ModuleRegistry;

    fn scale_candidate(name: &str, factor: f64) -> CandidateConfig {
        let mut op = OpConfig::new();
        op.insert("type".into(), "scale".into());
        op.insert("factor".into(), factor.into());
        CandidateConfig::new(name, op)
    }

    /// Three scale candidates: `x`, `2x`, `3x`.
    fn scales_config() -> MutableOpConfig {
        MutableOpConfig::new(vec![
            scale_candidate("one", 1.0),
            scale_candidate("two", 2.0),
            scale_candidate("three", 3.0),
        ])
    }

    fn build(config: &MutableOpConfig) -> Result<DiffMutableOp> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DiffMutableOp::new(config, &ModuleRegistry::default(), vb)
    }

    fn x() -> Tensor {
        Tensor::new(&[1f32, -2.0, 0.5], &Device::Cpu).unwrap()
    }

    fn vals(t: &Tensor) -> Vec<f32> {
        t.to_vec1::<f32>().unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn construction_validates_candidates() {
        assert!(matches!(
            build(&MutableOpConfig::new(vec![])),
            Err(MutableError::Construction(_))
        ));
        let dup = MutableOpConfig::new(vec![scale_candidate("a", 1.0), scale_candidate("a", 2.0)]);
        assert!(matches!(build(&dup), Err(MutableError::Construction(_))));
        let bad = MutableOpConfig::new(vec![CandidateConfig::of_type("a", "nope")]);
        assert!(matches!(build(&bad), Err(MutableError::Factory(_))));
    }

    #[test]
    fn weighted_sum_uses_softmax() {
        let op = build(&scales_config()).unwrap();
        // Uniform parameter → each weight 1/3 → (1 + 2 + 3) / 3 = 2x.
        let p = Tensor::zeros(3, DType::F32, &Device::Cpu).unwrap();
        let out = op.forward(&x(), Some(&p)).unwrap();
        assert_close(&vals(&out), &[2.0, -4.0, 1.0]);
    }

    #[test]
    fn output_shape_matches_single_candidate() {
        let mut kwargs = OpConfig::new();
        kwargs.insert("in_dim".into(), 4.into());
        kwargs.insert("out_dim".into(), 6.into());
        let config = MutableOpConfig {
            module_kwargs: Some(kwargs),
            ..MutableOpConfig::new(vec![
                CandidateConfig::of_type("lin_a", "linear"),
                CandidateConfig::of_type("lin_b", "linear"),
            ])
        };
        let op = build(&config).unwrap();
        let input = Tensor::ones((5, 4), DType::F32, &Device::Cpu).unwrap();
        let p = Tensor::new(&[0.3f32, -0.1], &Device::Cpu).unwrap();
        let out = op.forward(&input, Some(&p)).unwrap();
        assert_eq!(out.dims(), &[5, 6]);
    }

    #[test]
    fn missing_param_runs_every_candidate_unweighted() {
        let op = build(&scales_config()).unwrap();
        let out = op.forward(&x(), None).unwrap();
        assert_close(&vals(&out), &[6.0, -12.0, 3.0]);
    }

    #[test]
    fn wrong_param_length_is_a_shape_error() {
        let op = build(&scales_config()).unwrap();
        let p = Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            op.forward(&x(), Some(&p)),
            Err(MutableError::Shape { .. })
        ));
    }

    #[test]
    fn fix_prunes_and_ignores_param() {
        let mut op = build(&scales_config()).unwrap();
        assert!(matches!(
            op.forward_fixed(&x()),
            Err(MutableError::State(_))
        ));

        op.fix_chosen(vec!["three", "one"]).unwrap();
        assert!(op.is_fixed());
        assert_eq!(op.choices(), vec!["one".to_string(), "three".to_string()]);

        // Any parameter (even a wrongly sized one) is ignored once fixed.
        let p = Tensor::new(&[9f32, -9.0, 0.0, 1.0], &Device::Cpu).unwrap();
        let out = op.forward(&x(), Some(&p)).unwrap();
        assert_close(&vals(&out), &[4.0, -8.0, 2.0]);

        assert!(matches!(op.fix_chosen("one"), Err(MutableError::State(_))));
        assert_eq!(op.num_candidates(), 2);
    }

    #[test]
    fn fix_with_unknown_name_fails_without_pruning() {
        let mut op = build(&scales_config()).unwrap();
        assert!(matches!(op.fix_chosen("four"), Err(MutableError::State(_))));
        assert!(!op.is_fixed());
        assert_eq!(op.num_candidates(), 3);
    }

    #[test]
    fn fix_with_repeated_name_fails_without_pruning() {
        let mut op = build(&scales_config()).unwrap();
        assert!(matches!(
            op.fix_chosen(vec!["one", "one"]),
            Err(MutableError::State(_))
        ));
        assert!(!op.is_fixed());
        assert_eq!(op.num_candidates(), 3);

        op.fix_chosen("one").unwrap();
        assert_eq!(op.num_candidates(), op.chosen().unwrap().len());
        assert_close(&vals(&op.forward_fixed(&x()).unwrap()), &[1.0, -2.0, 0.5]);
    }

    #[test]
    fn sample_choice_is_argmax_first_tie() {
        let op = build(&scales_config()).unwrap();
        let p = Tensor::new(&[0.1f32, 0.7, 0.7], &Device::Cpu).unwrap();
        assert_eq!(op.sample_choice(&p).unwrap(), "two");
        let p = Tensor::new(&[0.9f32, 0.7, 0.1], &Device::Cpu).unwrap();
        assert_eq!(op.sample_choice(&p).unwrap(), "one");
    }

    #[test]
    fn dump_chosen_lifecycle() {
        let mut op = build(&scales_config()).unwrap();
        assert!(matches!(op.dump_chosen(), Err(MutableError::State(_))));
        assert!(op.set_current_choice("nine".into()).is_err());
        op.set_current_choice("two".into()).unwrap();
        assert_eq!(op.dump_chosen().unwrap(), "two");

        let p = Tensor::new(&[0.1f32, 0.2, 0.9], &Device::Cpu).unwrap();
        let choice = op.sample_choice(&p).unwrap();
        op.fix_chosen(choice).unwrap();
        assert_eq!(op.dump_chosen().unwrap(), "three");
    }

    #[test]
    fn one_hot_runs_exactly_one_candidate() {
        let config = MutableOpConfig {
            seed: Some(11),
            ..scales_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let op = OneHotMutableOp::new(&config, &ModuleRegistry::default(), vb).unwrap();
        let p = Tensor::new(&[0.2f32, 0.1, 0.4], &Device::Cpu).unwrap();
        for _ in 0..20 {
            let out = vals(&op.forward(&x(), Some(&p)).unwrap());
            let factor = out[0];
            assert!([1.0, 2.0, 3.0].contains(&factor));
            assert_close(&out, &[factor, -2.0 * factor, 0.5 * factor]);

            let w = vals(op.arch_weights().unwrap().as_tensor());
            assert_eq!(w.iter().filter(|&&v| v == 1.0).count(), 1);
            assert_eq!(w.iter().filter(|&&v| v == 0.0).count(), 2);
        }
    }

    #[test]
    fn one_hot_follows_peaked_distribution() {
        let config = MutableOpConfig {
            seed: Some(5),
            ..scales_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let op = OneHotMutableOp::new(&config, &ModuleRegistry::default(), vb).unwrap();
        let p = Tensor::new(&[-30f32, 30.0, -30.0], &Device::Cpu).unwrap();
        for _ in 0..20 {
            let out = vals(&op.forward(&x(), Some(&p)).unwrap());
            assert_close(&out, &[2.0, -4.0, 1.0]);
        }
    }

    #[test]
    fn uniform_sampling_visits_every_candidate() {
        let config = MutableOpConfig {
            seed: Some(9),
            random_sample: true,
            ..scales_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut op = OneHotMutableOp::new(&config, &ModuleRegistry::default(), vb).unwrap();
        assert!(op.random_sample());
        // Learned distribution says "two" only; uniform mode ignores it.
        let p = Tensor::new(&[-30f32, 30.0, -30.0], &Device::Cpu).unwrap();
        let mut seen = [false; 3];
        for _ in 0..200 {
            let out = vals(&op.forward(&x(), Some(&p)).unwrap());
            seen[out[0] as usize - 1] = true;
        }
        assert_eq!(seen, [true, true, true]);

        op.set_random_sample(false);
        let out = vals(&op.forward(&x(), Some(&p)).unwrap());
        assert_close(&out, &[2.0, -4.0, 1.0]);
    }

    #[test]
    fn one_hot_gradient_reaches_param_and_sample() {
        let config = MutableOpConfig {
            seed: Some(1),
            ..scales_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let op = OneHotMutableOp::new(&config, &ModuleRegistry::default(), vb).unwrap();
        let p = Var::new(&[0.1f32, 0.2, 0.3], &Device::Cpu).unwrap();
        let out = op.forward(&x(), Some(p.as_tensor())).unwrap();
        let grads = out.sum_all().unwrap().backward().unwrap();

        let g_param = vals(grads.get(p.as_tensor()).unwrap());
        assert!(g_param.iter().any(|&g| g != 0.0));
        let w = op.arch_weights().unwrap();
        assert!(grads.get(w.as_tensor()).is_some());
    }

    #[test]
    fn op_mutable_dispatches_on_relaxation() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MutableOpConfig {
            relaxation: OpRelaxation::OneHot,
            seed: Some(2),
            ..scales_config()
        };
        let mut op = OpMutable::new(&config, &ModuleRegistry::default(), vb).unwrap();
        assert!(matches!(op, OpMutable::OneHot(_)));
        op.fix_chosen("two").unwrap();
        assert_close(&vals(&op.forward(&x(), None).unwrap()), &[2.0, -4.0, 1.0]);
    }

    #[test]
    fn nested_op_acts_as_module() {
        let mut op = build(&scales_config()).unwrap();
        op.fix_chosen("three").unwrap();
        let nested = NestedOp(op);
        let out = Module::forward(&nested, &x()).unwrap();
        assert_close(&vals(&out), &[3.0, -6.0, 1.5]);
    }
}
