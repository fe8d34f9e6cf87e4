//! Allocation fault injection.
//!
//! A Bernoulli trial per admission check. A hit is escalated exactly like a
//! genuine limit violation so chaos runs exercise the real failure path.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct FaultInjector {
    probability: f64,
    seeded: Option<Mutex<StdRng>>,
}

fn sanitize_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}

impl FaultInjector {
    /// Injector drawing from the thread-local RNG.
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability: sanitize_probability(probability),
            seeded: None,
        }
    }

    /// Deterministic injector for reproducible chaos runs.
    #[must_use]
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self {
            probability: sanitize_probability(probability),
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    #[must_use]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// Draw one trial.
    pub fn should_fail(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.probability >= 1.0 {
            return true;
        }
        match &self.seeded {
            Some(rng) => rng.lock().random_bool(self.probability),
            None => rand::rng().random_bool(self.probability),
        }
    }
}

impl std::fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjector")
            .field("probability", &self.probability)
            .field("seeded", &self.seeded.is_some())
            .finish()
    }
}
