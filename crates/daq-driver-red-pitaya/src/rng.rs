//! Seeded RNG for the simulated board.
//!
//! A fixed seed makes mock traces reproducible across runs.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random source.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a generator. `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Uniform value in `[0.0, 1.0)`.
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().r#gen()
    }

    /// Uniform noise in `[-amplitude, amplitude]`.
    pub fn noise(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }

    /// Fill `samples` in place with additive noise.
    pub fn add_noise(&self, samples: &mut [f64], amplitude: f64) {
        if amplitude <= 0.0 {
            return;
        }
        let mut rng = self.inner.lock();
        for sample in samples.iter_mut() {
            *sample += rng.gen_range(-amplitude..=amplitude);
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}
