//! # diffnas-train — The Search Driver
//!
//! Mutator-side state for differentiable architecture search:
//!
//! * **[`ArchParams`]** — one logit vector per mutable alias, AdamW on the
//!   search loss, and the sample → fix export step.
//! * **[`TemperatureSchedule`]** — Gumbel temperature annealing
//!   (linear / exponential / cosine).

pub mod arch_params;
pub mod scheduler;

pub use arch_params::{ArchOptimConfig, ArchParams, ArchSnapshot, ArchStepMetrics};
pub use scheduler::{TempDecay, TemperatureSchedule};
