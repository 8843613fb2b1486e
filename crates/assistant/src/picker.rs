use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{rng, Rng, SeedableRng};

/// Chooses an index into a canned-response pool.
pub trait ResponsePicker: Send + Sync {
    /// Returns an index below `len`; `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform choice from the thread-local generator. Holds no shared state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngPicker;

impl ResponsePicker for ThreadRngPicker {
    fn pick(&self, len: usize) -> usize {
        bounded(rng().next_u64(), len)
    }
}

/// Deterministic choice for tests and reproducible transcripts.
#[derive(Debug)]
pub struct SeededPicker {
    rng: Mutex<StdRng>,
}

impl SeededPicker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ResponsePicker for SeededPicker {
    fn pick(&self, len: usize) -> usize {
        let draw = self.rng.lock().next_u64();
        bounded(draw, len)
    }
}

fn bounded(draw: u64, len: usize) -> usize {
    if len <= 1 {
        0
    } else {
        (draw % len as u64) as usize
    }
}
