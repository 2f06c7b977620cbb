use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

const REGISTER_BITS: u32 = 12;
const NUM_REGISTERS: usize = 1 << REGISTER_BITS; // 4096 registers, ~1.6% std error

/// A fixed-memory approximate distinct-count sketch (dense HyperLogLog,
/// 2^12 registers). Used by `Verification`'s per-(metric,attribute) unique-value
/// estimate and `CostControl`'s distinct-attribute-value counter -- both need
/// "an approximate-count structure... bounded in memory" regardless of true
/// cardinality (original spec §3/§9).
#[derive(Debug, Clone)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        HyperLogLog { registers: vec![0u8; NUM_REGISTERS] }
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog::default()
    }

    pub fn insert<T: Hash>(&mut self, value: &T) {
        let mut hasher = FnvHasher::default();
        value.hash(&mut hasher);
        let hash = hasher.finish();

        let index = (hash & (NUM_REGISTERS as u64 - 1)) as usize;
        let rest = hash >> REGISTER_BITS;
        let rank = (rest.trailing_zeros() + 1).min(64 - REGISTER_BITS) as u8;

        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// The standard HLL estimator with small/large range corrections.
    pub fn estimate(&self) -> u64 {
        let m = NUM_REGISTERS as f64;
        let alpha_m = 0.7213 / (1.0 + 1.079 / m);

        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw = alpha_m * m * m / sum;

        let zero_registers = self.registers.iter().filter(|&&r| r == 0).count();
        let estimate = if raw <= 2.5 * m && zero_registers > 0 {
            m * (m / zero_registers as f64).ln()
        } else {
            raw
        };

        estimate.round().max(0.0) as u64
    }

    pub fn merge(&mut self, other: &HyperLogLog) {
        for (a, b) in self.registers.iter_mut().zip(other.registers.iter()) {
            if *b > *a {
                *a = *b;
            }
        }
    }
}
