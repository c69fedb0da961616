//! Choice routes: candidates are alternative *input edges*.
//!
//! A route owns one unit per edge and takes one input per edge, in candidate
//! order. Export keeps the top-`num_chosen` edges rather than a single best.
//!
//! * [`DiffChoiceRoute`] — softmax-weighted (or plain) sum over edges.
//! * [`GumbelChoiceRoute`] — Gumbel-softmax weights with an adjustable temperature.
//! * [`RouteMutable`] — config-selected dispatch over the two.

use candle_core::Tensor;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use diffnas_common::{Chosen, ChoiceRouteConfig, MutableError, Result};

use crate::candidates::{Candidate, CandidateSet};
use crate::mutable::{ensure_unfixed, MutableModule};
use crate::relax;

// ── DiffChoiceRoute ─────────────────────────────────────────────────────────

/// Choice route over input edges, one input per edge, top-`num_chosen` export.
pub struct DiffChoiceRoute {
    alias: Option<String>,
    candidates: CandidateSet,
    num_chosen: usize,
    with_arch_param: bool,
    /// Full edge order captured at fix time; pairs positional inputs with edges.
    unfixed_choices: Option<Vec<String>>,
    chosen: Option<Chosen>,
    current_choice: Option<Vec<String>>,
    is_fixed: bool,
}

impl DiffChoiceRoute {
    /// Takes exclusive ownership of `edges`.
    pub fn new(edges: Vec<(String, Candidate)>, config: &ChoiceRouteConfig) -> Result<Self> {
        if edges.is_empty() {
            return Err(MutableError::construction(
                "number of edges must be at least 1, got 0",
            ));
        }
        if config.num_chosen == 0 {
            return Err(MutableError::construction("num_chosen must be at least 1"));
        }
        Ok(Self {
            alias: config.alias.clone(),
            candidates: CandidateSet::new(edges)?,
            num_chosen: config.num_chosen,
            with_arch_param: config.with_arch_param,
            unfixed_choices: None,
            chosen: None,
            current_choice: None,
            is_fixed: false,
        })
    }

    pub fn num_chosen(&self) -> usize {
        self.num_chosen
    }

    pub fn with_arch_param(&self) -> bool {
        self.with_arch_param
    }

    pub fn chosen(&self) -> Option<&Chosen> {
        self.chosen.as_ref()
    }

    fn check_inputs(&self, inputs: &[Tensor]) -> Result<()> {
        MutableError::check_len("inputs", self.candidates.len(), inputs.len())
    }

    /// Shared relaxed path; `probs` turns the parameter into edge weights.
    ///
    /// Arity is checked before any edge runs.
    pub(crate) fn relaxed_forward<F>(
        &self,
        inputs: &[Tensor],
        arch_param: Option<&Tensor>,
        probs: F,
    ) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        self.check_inputs(inputs)?;
        match arch_param {
            Some(arch_param) if self.with_arch_param => {
                relax::check_arch_param(arch_param, self.candidates.len())?;
                let weights = probs(arch_param)?;
                self.weighted_forward(inputs, &weights)
            }
            _ => self.forward_all(inputs),
        }
    }

    fn weighted_forward(&self, inputs: &[Tensor], weights: &Tensor) -> Result<Tensor> {
        let host = relax::to_host(weights)?;
        let mut outputs = Vec::with_capacity(inputs.len());
        for (i, ((_, edge), x)) in self.candidates.iter().zip(inputs).enumerate() {
            // Gumbel weights may be exactly zero.
            if host[i] > 0.0 {
                let out = edge.forward(x)?;
                outputs.push(relax::scale_by_weight(weights, i, &out)?);
            }
        }
        relax::sum_outputs(outputs)
    }
}

impl MutableModule for DiffChoiceRoute {
    type Input = [Tensor];
    type Choice = Vec<String>;

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

    fn current_choice(&self) -> Option<&Vec<String>> {
        self.current_choice.as_ref()
    }

    fn set_current_choice(&mut self, choice: Vec<String>) -> Result<()> {
        self.candidates.validate(&Chosen::from(choice.as_slice()))?;
        self.current_choice = Some(choice);
        Ok(())
    }

    fn forward_fixed(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let (Some(chosen), Some(order)) = (&self.chosen, &self.unfixed_choices) else {
            return Err(MutableError::state(
                "call fix_chosen before forward_fixed",
            ));
        };
        MutableError::check_len("inputs", order.len(), inputs.len())?;
        let mut outputs = Vec::with_capacity(chosen.len());
        for (name, x) in order.iter().zip(inputs) {
            if !chosen.contains(name) {
                continue;
            }
            if let Some(edge) = self.candidates.get(name) {
                outputs.push(edge.forward(x)?);
            }
        }
        relax::sum_outputs(outputs)
    }

    fn forward_all(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self.check_inputs(inputs)?;
        let mut outputs = Vec::with_capacity(inputs.len());
        for ((_, edge), x) in self.candidates.iter().zip(inputs) {
            outputs.push(edge.forward(x)?);
        }
        relax::sum_outputs(outputs)
    }

    /// Differentiable mode with a parameter: `Σ p_i · edge_i(x_i)` over `p_i > 0`.
    /// Otherwise the plain sum of [`forward_all`](MutableModule::forward_all).
    fn forward_arch_param(&self, inputs: &[Tensor], arch_param: Option<&Tensor>) -> Result<Tensor> {
        self.relaxed_forward(inputs, arch_param, |p| self.compute_arch_probs(p))
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        ensure_unfixed(self.is_fixed)?;
        let chosen = chosen.into();
        let snapshot = self.candidates.names();
        let dropped = self.candidates.retain_chosen(&chosen)?;
        tracing::debug!(
            alias = ?self.alias,
            chosen = ?chosen.names(),
            dropped,
            "Choice route fixed"
        );
        self.unfixed_choices = Some(snapshot);
        self.current_choice = Some(chosen.names().to_vec());
        self.chosen = Some(chosen);
        self.is_fixed = true;
        Ok(())
    }

    /// Top-`num_chosen` edges by descending parameter value.
    fn sample_choice(&self, arch_param: &Tensor) -> Result<Vec<String>> {
        relax::check_arch_param(arch_param, self.candidates.len())?;
        let names = self.candidates.names();
        let picked = relax::top_k_indices(&relax::to_host(arch_param)?, self.num_chosen);
        Ok(picked.into_iter().map(|i| names[i].clone()).collect())
    }
}

// ── GumbelChoiceRoute ───────────────────────────────────────────────────────

/// Choice route relaxed by Gumbel-softmax.
///
/// `tau` is read at every forward; the training loop anneals it through
/// [`set_temperature`](Self::set_temperature). With `hard` the edge weights are
/// an exact one-hot vector in the forward pass and soft in the backward pass.
pub struct GumbelChoiceRoute {
    inner: DiffChoiceRoute,
    tau: f64,
    hard: bool,
    rng: Mutex<StdRng>,
}

impl GumbelChoiceRoute {
    /// Gumbel settings come from `config.gumbel` (defaults when absent).
    pub fn new(edges: Vec<(String, Candidate)>, config: &ChoiceRouteConfig) -> Result<Self> {
        let gumbel = config.gumbel.clone().unwrap_or_default();
        check_tau(gumbel.tau)?;
        let rng = gumbel
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Ok(Self {
            inner: DiffChoiceRoute::new(edges, config)?,
            tau: gumbel.tau,
            hard: gumbel.hard,
            rng: Mutex::new(rng),
        })
    }

    pub fn temperature(&self) -> f64 {
        self.tau
    }

    /// Set the softmax temperature for subsequent forwards.
    pub fn set_temperature(&mut self, tau: f64) -> Result<()> {
        check_tau(tau)?;
        tracing::trace!(alias = ?self.inner.alias, tau, "Gumbel temperature set");
        self.tau = tau;
        Ok(())
    }

    pub fn hard(&self) -> bool {
        self.hard
    }

    pub fn set_hard(&mut self, hard: bool) {
        self.hard = hard;
    }

    pub fn num_chosen(&self) -> usize {
        self.inner.num_chosen()
    }

    pub fn chosen(&self) -> Option<&Chosen> {
        self.inner.chosen()
    }
}

fn check_tau(tau: f64) -> Result<()> {
    if tau.is_finite() && tau > 0.0 {
        Ok(())
    } else {
        Err(MutableError::InvalidTemperature(tau))
    }
}

impl MutableModule for GumbelChoiceRoute {
    type Input = [Tensor];
    type Choice = Vec<String>;

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

    fn current_choice(&self) -> Option<&Vec<String>> {
        self.inner.current_choice()
    }

    fn set_current_choice(&mut self, choice: Vec<String>) -> Result<()> {
        self.inner.set_current_choice(choice)
    }

    /// Gumbel-softmax with the current temperature; a fresh noise draw per call.
    fn compute_arch_probs(&self, arch_param: &Tensor) -> Result<Tensor> {
        let mut rng = self.rng.lock();
        relax::gumbel_softmax(arch_param, self.tau, self.hard, &mut *rng)
    }

    fn forward_fixed(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self.inner.forward_fixed(inputs)
    }

    fn forward_all(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self.inner.forward_all(inputs)
    }

    fn forward_arch_param(&self, inputs: &[Tensor], arch_param: Option<&Tensor>) -> Result<Tensor> {
        self.inner
            .relaxed_forward(inputs, arch_param, |p| self.compute_arch_probs(p))
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        self.inner.fix_chosen(chosen)
    }

    fn sample_choice(&self, arch_param: &Tensor) -> Result<Vec<String>> {
        self.inner.sample_choice(arch_param)
    }
}

// ── RouteMutable (dispatch) ─────────────────────────────────────────────────

/// Dispatch enum: Gumbel when `config.gumbel` is set, plain otherwise.
pub enum RouteMutable {
    Plain(DiffChoiceRoute),
    Gumbel(GumbelChoiceRoute),
}

impl RouteMutable {
    pub fn new(edges: Vec<(String, Candidate)>, config: &ChoiceRouteConfig) -> Result<Self> {
        if config.gumbel.is_some() {
            Ok(Self::Gumbel(GumbelChoiceRoute::new(edges, config)?))
        } else {
            Ok(Self::Plain(DiffChoiceRoute::new(edges, config)?))
        }
    }

    pub fn as_gumbel_mut(&mut self) -> Option<&mut GumbelChoiceRoute> {
        match self {
            Self::Gumbel(r) => Some(r),
            Self::Plain(_) => None,
        }
    }
}

impl MutableModule for RouteMutable {
    type Input = [Tensor];
    type Choice = Vec<String>;

    fn alias(&self) -> Option<&str> {
        match self {
            Self::Plain(r) => r.alias(),
            Self::Gumbel(r) => r.alias(),
        }
    }

    fn is_fixed(&self) -> bool {
        match self {
            Self::Plain(r) => r.is_fixed(),
            Self::Gumbel(r) => r.is_fixed(),
        }
    }

    fn choices(&self) -> Vec<String> {
        match self {
            Self::Plain(r) => r.choices(),
            Self::Gumbel(r) => r.choices(),
        }
    }

    fn current_choice(&self) -> Option<&Vec<String>> {
        match self {
            Self::Plain(r) => r.current_choice(),
            Self::Gumbel(r) => r.current_choice(),
        }
    }

    fn set_current_choice(&mut self, choice: Vec<String>) -> Result<()> {
        match self {
            Self::Plain(r) => r.set_current_choice(choice),
            Self::Gumbel(r) => r.set_current_choice(choice),
        }
    }

    fn compute_arch_probs(&self, arch_param: &Tensor) -> Result<Tensor> {
        match self {
            Self::Plain(r) => r.compute_arch_probs(arch_param),
            Self::Gumbel(r) => r.compute_arch_probs(arch_param),
        }
    }

    fn forward_fixed(&self, inputs: &[Tensor]) -> Result<Tensor> {
        match self {
            Self::Plain(r) => r.forward_fixed(inputs),
            Self::Gumbel(r) => r.forward_fixed(inputs),
        }
    }

    fn forward_all(&self, inputs: &[Tensor]) -> Result<Tensor> {
        match self {
            Self::Plain(r) => r.forward_all(inputs),
            Self::Gumbel(r) => r.forward_all(inputs),
        }
    }

    fn forward_arch_param(&self, inputs: &[Tensor], arch_param: Option<&Tensor>) -> Result<Tensor> {
        match self {
            Self::Plain(r) => r.forward_arch_param(inputs, arch_param),
            Self::Gumbel(r) => r.forward_arch_param(inputs, arch_param),
        }
    }

    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()> {
        match self {
            Self::Plain(r) => r.fix_chosen(chosen),
            Self::Gumbel(r) => r.fix_chosen(chosen),
        }
    }

    fn sample_choice(&self, arch_param: &Tensor) -> Result<Vec<String>> {
        match self {
            Self::Plain(r) => r.sample_choice(arch_param),
            Self::Gumbel(r) => r.sample_choice(arch_param),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
