//! Gumbel temperature annealing.

use diffnas_common::{MutableError, Result};
use diffnas_core::GumbelChoiceRoute;

// ── Temperature Schedule ────────────────────────────────────────────────────

/// Decay mode from `tau_max` to `tau_min`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TempDecay {
    Linear,
    Exponential,
    Cosine,
}

impl TempDecay {
    pub fn from_str(s: &str) -> Self {
        match s {
            "exponential" | "exp" => Self::Exponential,
            "cosine" => Self::Cosine,
            _ => Self::Linear,
        }
    }
}

/// Anneals the Gumbel temperature over `total_steps`, then holds `tau_min`.
///
/// The schedule is stateless: the caller passes the global step, so resuming a
/// search from a checkpoint reproduces the same temperature.
#[derive(Clone, Debug)]
pub struct TemperatureSchedule {
    tau_max: f64,
    tau_min: f64,
    total_steps: usize,
    decay: TempDecay,
}

impl TemperatureSchedule {
    /// * `tau_max` — temperature at step 0.
    /// * `tau_min` — floor reached at `total_steps` (0 = always `tau_min`).
    pub fn new(tau_max: f64, tau_min: f64, total_steps: usize, decay: TempDecay) -> Result<Self> {
        for tau in [tau_max, tau_min] {
            if !(tau.is_finite() && tau > 0.0) {
                return Err(MutableError::InvalidTemperature(tau));
            }
        }
        if tau_min > tau_max {
            return Err(MutableError::construction(format!(
                "tau_min ({tau_min}) must not exceed tau_max ({tau_max})"
            )));
        }
        Ok(Self {
            tau_max,
            tau_min,
            total_steps,
            decay,
        })
    }

    /// Temperature at `step`.
    pub fn temperature(&self, step: usize) -> f64 {
        if self.total_steps == 0 {
            return self.tau_min;
        }
        let progress = (step as f64 / self.total_steps as f64).min(1.0);
        let (hi, lo) = (self.tau_max, self.tau_min);
        match self.decay {
            TempDecay::Linear => hi - (hi - lo) * progress,
            TempDecay::Exponential => hi * (lo / hi).powf(progress),
            TempDecay::Cosine => {
                let cos = (std::f64::consts::PI * progress).cos();
                lo + 0.5 * (hi - lo) * (1.0 + cos)
            }
        }
    }

    /// Push the temperature for `step` into `route`; returns it.
    pub fn apply(&self, step: usize, route: &mut GumbelChoiceRoute) -> Result<f64> {
        let tau = self.temperature(step);
        route.set_temperature(tau)?;
        Ok(tau)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use diffnas_common::{ChoiceRouteConfig, GumbelConfig};
    use diffnas_core::{Candidate, Pointwise};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn endpoints_for_every_decay() {
        for decay in [TempDecay::Linear, TempDecay::Exponential, TempDecay::Cosine] {
            let s = TemperatureSchedule::new(5.0, 0.5, 100, decay).unwrap();
            assert!(close(s.temperature(0), 5.0), "{decay:?}");
            assert!(close(s.temperature(100), 0.5), "{decay:?}");
            // Held after the horizon.
            assert!(close(s.temperature(10_000), 0.5), "{decay:?}");
        }
    }

    #[test]
    fn monotone_non_increasing() {
        for decay in [TempDecay::Linear, TempDecay::Exponential, TempDecay::Cosine] {
            let s = TemperatureSchedule::new(10.0, 0.1, 50, decay).unwrap();
            let taus: Vec<f64> = (0..=60).map(|i| s.temperature(i)).collect();
            assert!(taus.windows(2).all(|w| w[1] <= w[0] + 1e-12), "{decay:?}");
        }
    }

    #[test]
    fn midpoints() {
        let lin = TemperatureSchedule::new(4.0, 2.0, 10, TempDecay::Linear).unwrap();
        assert!(close(lin.temperature(5), 3.0));
        // Geometric mean at the midpoint.
        let exp = TemperatureSchedule::new(4.0, 1.0, 10, TempDecay::Exponential).unwrap();
        assert!(close(exp.temperature(5), 2.0));
        let cos = TemperatureSchedule::new(4.0, 2.0, 10, TempDecay::Cosine).unwrap();
        assert!(close(cos.temperature(5), 3.0));
    }

    #[test]
    fn zero_steps_is_constant_floor() {
        let s = TemperatureSchedule::new(5.0, 0.5, 0, TempDecay::Linear).unwrap();
        assert!(close(s.temperature(0), 0.5));
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(TemperatureSchedule::new(1.0, 0.0, 10, TempDecay::Linear).is_err());
        assert!(TemperatureSchedule::new(f64::INFINITY, 1.0, 10, TempDecay::Linear).is_err());
        assert!(matches!(
            TemperatureSchedule::new(1.0, 2.0, 10, TempDecay::Linear),
            Err(MutableError::Construction(_))
        ));
    }

    #[test]
    fn decay_from_str() {
        assert_eq!(TempDecay::from_str("exp"), TempDecay::Exponential);
        assert_eq!(TempDecay::from_str("cosine"), TempDecay::Cosine);
        assert_eq!(TempDecay::from_str("linear"), TempDecay::Linear);
    }

    #[test]
    fn apply_sets_route_temperature() {
        let edges: Vec<(String, Candidate)> = ["a", "b"]
            .into_iter()
            .map(|n| {
                let op: Candidate = Box::new(Pointwise::Identity);
                (n.to_string(), op)
            })
            .collect();
        let config = ChoiceRouteConfig {
            gumbel: Some(GumbelConfig::default()),
            ..Default::default()
        };
        let mut route = GumbelChoiceRoute::new(edges, &config).unwrap();
        let s = TemperatureSchedule::new(2.0, 0.5, 4, TempDecay::Linear).unwrap();
        let tau = s.apply(2, &mut route).unwrap();
        assert!(close(tau, 1.25));
        assert!(close(route.temperature(), 1.25));
    }
}
