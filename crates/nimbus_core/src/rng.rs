//! Reversible random number stream.
//!
//! Each LP owns an independent stream. The generator is a 64-bit linear
//! congruential recurrence whose multiplier is odd and therefore invertible
//! modulo 2^64, so one `reverse_uniform` call undoes exactly one draw.
//!
//! The stream also counts draws and undraws. Forgetting the matching reverse
//! call in a reverse handler desynchronizes every future draw on the stream
//! and is the single most common reverse-computation bug; the harness audits
//! these counters at GVT boundaries.

/// Knuth's MMIX multiplier.
const MULT: u64 = 6364136223846793005;

/// Modular inverse of `MULT` modulo 2^64.
const MULT_INV: u64 = 13877824140714322085;

const INC: u64 = 1442695040888963407;

/// An invertible per-LP random stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversibleRng {
    state: u64,
    draws: u64,
    undraws: u64,
}

impl ReversibleRng {
    /// Create a stream seeded for one LP.
    ///
    /// The seed is scrambled so that adjacent LP identifiers do not produce
    /// correlated leading draws.
    pub fn new(seed: u64) -> Self {
        let mut state = seed.wrapping_add(0x9e3779b97f4a7c15);
        state = (state ^ (state >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        state = (state ^ (state >> 27)).wrapping_mul(0x94d049bb133111eb);
        Self {
            state: state ^ (state >> 31),
            draws: 0,
            undraws: 0,
        }
    }

    /// Draw a uniform variate in [0, 1).
    pub fn next_uniform(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(MULT).wrapping_add(INC);
        self.draws += 1;
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Draw an exponential variate with the given mean.
    ///
    /// Consumes exactly one uniform, so one `reverse_uniform` undoes it.
    pub fn next_exponential(&mut self, mean: f64) -> f64 {
        -mean * (1.0 - self.next_uniform()).ln()
    }

    /// Undo the most recent draw, restoring the stream bit-for-bit.
    pub fn reverse_uniform(&mut self) {
        self.state = self.state.wrapping_sub(INC).wrapping_mul(MULT_INV);
        self.undraws += 1;
    }

    /// Total draws performed on this stream.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Total undraws performed on this stream.
    pub fn undraws(&self) -> u64 {
        self.undraws
    }

    /// Net stream position: draws that have not been undone.
    pub fn net_draws(&self) -> u64 {
        self.draws - self.undraws
    }
}
