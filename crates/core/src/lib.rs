//! # diffnas-core — Differentiable Mutable Modules
//!
//! Searchable building blocks for gradient-based architecture search. Each
//! mutable owns a set of named candidates and combines them under a
//! continuous relaxation until the search fixes a choice.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`mutable`] | `MutableModule` trait: lifecycle, forward dispatch, export |
//! | [`op`] | `DiffMutableOp`, `OneHotMutableOp`, `OpMutable`, `NestedOp` |
//! | [`route`] | `DiffChoiceRoute`, `GumbelChoiceRoute`, `RouteMutable` |
//! | [`relax`] | softmax / Gumbel-softmax, straight-through, top-k, weighted sums |
//! | [`candidates`] | `CandidateSet`: ordered, owned, prunable |
//! | [`factory`] | `ModuleFactory` trait, `ModuleRegistry` with built-in units |
//!
//! ## Design principles
//!
//! 1. **Explicit parameters.** Architecture parameters are owned by the caller
//!    and borrowed per forward; a mutable never stores one.
//! 2. **`Send + Sync`-safe.** Sampling state uses `parking_lot::Mutex`, not `RefCell`.
//! 3. **One-way lifecycle.** `fix_chosen` prunes once; a second call is an error.

pub mod candidates;
pub mod factory;
pub mod mutable;
pub mod op;
pub mod relax;
pub mod route;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use candidates::{Candidate, CandidateSet};
pub use factory::{ModuleFactory, ModuleRegistry, Pointwise, Scale};
pub use mutable::MutableModule;
pub use op::{DiffMutableOp, NestedOp, OneHotMutableOp, OpMutable};
pub use route::{DiffChoiceRoute, GumbelChoiceRoute, RouteMutable};
