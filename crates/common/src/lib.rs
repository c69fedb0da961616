//! # diffnas-common — Shared Primitives
//!
//! Types shared across every crate in the workspace:
//!
//! * **[`MutableError`]** — the error taxonomy (construction / state / shape / factory).
//! * **[`MutableOpConfig`]** / **[`ChoiceRouteConfig`]** — JSON configuration records.
//! * **[`Chosen`]** — normalised argument of `fix_chosen`.

pub mod chosen;
pub mod config;
pub mod error;

pub use chosen::Chosen;
pub use config::{
    CandidateConfig, ChoiceRouteConfig, GumbelConfig, MutableOpConfig, OpConfig, OpRelaxation,
};
pub use error::{MutableError, Result};
