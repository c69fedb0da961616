//! The mutable-module contract.
//!
//! A mutable is either *unfixed* (searchable: every candidate is kept and the
//! forward pass is a relaxation driven by an architecture parameter) or *fixed*
//! (pruned to the chosen candidates, parameter-free). The transition happens
//! exactly once, through [`MutableModule::fix_chosen`].
//!
//! The architecture parameter is owned by the mutator and passed explicitly to
//! every forward call; a mutable never stores it.

use candle_core::Tensor;

use diffnas_common::{Chosen, MutableError, Result};

use crate::relax;

/// A module whose candidate set is a search variable until it is fixed.
pub trait MutableModule {
    /// What one forward call consumes: a tensor for ops, a slice of tensors for routes.
    type Input: ?Sized;
    /// What [`sample_choice`](Self::sample_choice) and [`dump_chosen`](Self::dump_chosen) return.
    type Choice: Clone + std::fmt::Debug + Into<Chosen>;

    /// Name the mutator uses to find this mutable's parameter.
    fn alias(&self) -> Option<&str>;

    fn is_fixed(&self) -> bool;

    /// Current candidate names, in parameter order.
    fn choices(&self) -> Vec<String>;

    fn num_candidates(&self) -> usize {
        self.choices().len()
    }

    fn current_choice(&self) -> Option<&Self::Choice>;

    /// Record the mutator's current decision. Every name must be a candidate.
    fn set_current_choice(&mut self, choice: Self::Choice) -> Result<()>;

    /// Relaxed per-candidate weights. Softmax unless a variant overrides it.
    fn compute_arch_probs(&self, arch_param: &Tensor) -> Result<Tensor> {
        relax::softmax_probs(arch_param)
    }

    /// Forward through the chosen candidates only. Fails before a fix.
    fn forward_fixed(&self, x: &Self::Input) -> Result<Tensor>;

    /// Unweighted sum over every candidate. Used for cost accounting.
    fn forward_all(&self, x: &Self::Input) -> Result<Tensor>;

    /// The relaxed, differentiable path. `None` falls back to [`forward_all`](Self::forward_all).
    fn forward_arch_param(&self, x: &Self::Input, arch_param: Option<&Tensor>) -> Result<Tensor>;

    /// Dispatch on mode.
    ///
    /// * fixed → [`forward_fixed`](Self::forward_fixed); `arch_param` is ignored.
    /// * unfixed, `Some(p)` → [`forward_arch_param`](Self::forward_arch_param).
    /// * unfixed, `None` → an explicit request for the dense all-candidates
    ///   path (FLOPs / cost estimation), not a missing argument.
    fn forward(&self, x: &Self::Input, arch_param: Option<&Tensor>) -> Result<Tensor> {
        if self.is_fixed() {
            self.forward_fixed(x)
        } else {
            self.forward_arch_param(x, arch_param)
        }
    }

    /// Prune to `chosen` and switch to fixed mode. One-time and irreversible.
    fn fix_chosen<C: Into<Chosen>>(&mut self, chosen: C) -> Result<()>;

    /// Deterministic export decision from a parameter. No side effects.
    fn sample_choice(&self, arch_param: &Tensor) -> Result<Self::Choice>;

    /// The current choice; fails when nothing has been sampled or fixed yet.
    fn dump_chosen(&self) -> Result<Self::Choice> {
        self.current_choice().cloned().ok_or_else(|| {
            MutableError::state("no current choice: call set_current_choice or fix_chosen first")
        })
    }
}

/// Fails with a state error when `is_fixed` is already set.
pub(crate) fn ensure_unfixed(is_fixed: bool) -> Result<()> {
    if is_fixed {
        return Err(MutableError::state(
            "mutable is already fixed; fix_chosen must not be called again",
        ));
    }
    Ok(())
}
