//! HyperLogLog counter arrays.
//!
//! One `CounterArray` holds `counters × m` byte-wide registers, `m = 1 << log2m`.
//! Values are hashed with seahash under a per-array seed, so two arrays built
//! with the same seed and log2m agree register-for-register on identical value
//! sets. All register writes go through `fetch_max`, which makes concurrent
//! merges into the same counter race-free and monotone: a reader may observe an
//! intermediate state, never a torn or regressed one.

use std::sync::atomic::{AtomicU8, Ordering};

/// Register-wise max of `src` into `dst`. Blocks must be the same length.
pub fn register_max(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        if *s > *d {
            *d = *s;
        }
    }
}

pub struct CounterArray {
    registers: Vec<AtomicU8>,
    counters: usize,
    m: usize,
    log2m: u32,
    seed: u64,
    alpha_mm: f64,
}

impl CounterArray {
    /// `counters` counters of `1 << log2m` registers each. `log2m` is clamped
    /// to `[4, 16]`, the range where the bias correction below is valid.
    pub fn new(counters: usize, log2m: u32, seed: u64) -> Self {
        let log2m = log2m.clamp(4, 16);
        let m = 1usize << log2m;
        let registers = (0..counters * m).map(|_| AtomicU8::new(0)).collect();
        Self {
            registers,
            counters,
            m,
            log2m,
            seed,
            alpha_mm: Self::alpha(m) * (m * m) as f64,
        }
    }

    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }

    pub fn counters(&self) -> usize {
        self.counters
    }

    /// Registers per counter.
    pub fn registers_per_counter(&self) -> usize {
        self.m
    }

    pub fn log2m(&self) -> u32 {
        self.log2m
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn hash(&self, value: u64) -> u64 {
        seahash::hash_seeded(
            &value.to_le_bytes(),
            self.seed,
            0x9e37_79b9_7f4a_7c15,
            0x6a09_e667_f3bc_c909,
            0xbb67_ae85_84ca_a73b,
        )
    }

    /// Split a hash into (register slot, rank of the first set bit).
    fn slot_rho(&self, value: u64) -> (usize, u8) {
        let h = self.hash(value);
        let slot = (h & (self.m as u64 - 1)) as usize;
        let w = h >> self.log2m;
        let rho = if w == 0 {
            (64 - self.log2m + 1) as u8
        } else {
            (w.trailing_zeros() + 1) as u8
        };
        (slot, rho)
    }

    /// Seed one value's hash into the counter at `index`.
    pub fn add(&self, index: usize, value: u64) {
        let (slot, rho) = self.slot_rho(value);
        self.registers[index * self.m + slot].fetch_max(rho, Ordering::Relaxed);
    }

    /// Seed one value's hash into a detached register block.
    pub fn seed_block(&self, block: &mut [u8], value: u64) {
        let (slot, rho) = self.slot_rho(value);
        if block[slot] < rho {
            block[slot] = rho;
        }
    }

    /// Union counter `src` of `other` into counter `dst` of `self`.
    /// Both arrays must share seed and log2m for the result to be meaningful.
    pub fn union(&self, dst: usize, other: &CounterArray, src: usize) {
        let d = dst * self.m;
        let s = src * other.m;
        for j in 0..self.m {
            let v = other.registers[s + j].load(Ordering::Relaxed);
            if v != 0 {
                self.registers[d + j].fetch_max(v, Ordering::Relaxed);
            }
        }
    }

    /// Copy the raw register block of `index` into `out`.
    pub fn counter(&self, index: usize, out: &mut [u8]) {
        let base = index * self.m;
        for (j, o) in out.iter_mut().enumerate().take(self.m) {
            *o = self.registers[base + j].load(Ordering::Relaxed);
        }
    }

    /// Overwrite the register block of `index`. Control-thread only; use
    /// [`CounterArray::merge_counter`] from concurrent contexts.
    pub fn set_counter(&self, block: &[u8], index: usize) {
        let base = index * self.m;
        for (j, &b) in block.iter().enumerate().take(self.m) {
            self.registers[base + j].store(b, Ordering::Relaxed);
        }
    }

    /// Register-wise max-merge a raw block into the counter at `index`.
    /// Safe to call concurrently with any other merge on any index.
    pub fn merge_counter(&self, block: &[u8], index: usize) {
        let base = index * self.m;
        for (j, &b) in block.iter().enumerate().take(self.m) {
            if b != 0 {
                self.registers[base + j].fetch_max(b, Ordering::Relaxed);
            }
        }
    }

    /// Register-wise max of the counter at `index` into a detached block.
    pub fn max_into_block(&self, index: usize, block: &mut [u8]) {
        let base = index * self.m;
        for (j, b) in block.iter_mut().enumerate().take(self.m) {
            let v = self.registers[base + j].load(Ordering::Relaxed);
            if v > *b {
                *b = v;
            }
        }
    }

    /// Cardinality estimate for the counter at `index`.
    pub fn count(&self, index: usize) -> f64 {
        let base = index * self.m;
        let mut inv_sum = 0.0;
        let mut zeros = 0usize;
        for j in 0..self.m {
            let r = self.registers[base + j].load(Ordering::Relaxed);
            inv_sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }
        let m = self.m as f64;
        let estimate = self.alpha_mm / inv_sum;
        // Linear counting in the small range; 64-bit hashes need no
        // large-range correction.
        if estimate <= 2.5 * m && zeros != 0 {
            m * (m / zeros as f64).ln()
        } else {
            estimate
        }
    }

    /// Grow the array by `n` zeroed counters.
    pub fn add_counters(&mut self, n: usize) {
        self.registers
            .extend((0..n * self.m).map(|_| AtomicU8::new(0)));
        self.counters += n;
    }

    /// Reset every register.
    pub fn clear(&self) {
        for r in &self.registers {
            r.store(0, Ordering::Relaxed);
        }
    }

    /// Project the counters named by `indices` (in order) into a fresh array
    /// of `count` counters with the same seed and geometry.
    pub fn extract<I>(&self, indices: I, count: usize) -> CounterArray
    where
        I: IntoIterator<Item = usize>,
    {
        let out = CounterArray::new(count, self.log2m, self.seed);
        let mut block = vec![0u8; self.m];
        for (dst, src) in indices.into_iter().take(count).enumerate() {
            self.counter(src, &mut block);
            out.set_counter(&block, dst);
        }
        out
    }

    /// Deep copy (register snapshot).
    pub fn duplicate(&self) -> CounterArray {
        let registers = self
            .registers
            .iter()
            .map(|r| AtomicU8::new(r.load(Ordering::Relaxed)))
            .collect();
        CounterArray {
            registers,
            counters: self.counters,
            m: self.m,
            log2m: self.log2m,
            seed: self.seed,
            alpha_mm: self.alpha_mm,
        }
    }

    /// True iff counter `a` of `self` and counter `b` of `other` hold
    /// identical registers.
    pub fn counter_eq(&self, a: usize, other: &CounterArray, b: usize) -> bool {
        let sa = a * self.m;
        let sb = b * other.m;
        (0..self.m).all(|j| {
            self.registers[sa + j].load(Ordering::Relaxed)
                == other.registers[sb + j].load(Ordering::Relaxed)
        })
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.registers.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value_estimate() {
        let arr = CounterArray::new(4, 10, 42);
        arr.add(0, 7);
        let c = arr.count(0);
        assert!((c - 1.0).abs() < 0.1, "got {c}");
        assert_eq!(arr.count(1), 0.0);
    }

    #[test]
    fn test_idempotent_add() {
        let arr = CounterArray::new(1, 10, 42);
        for _ in 0..100 {
            arr.add(0, 123);
        }
        let c = arr.count(0);
        assert!((c - 1.0).abs() < 0.1, "got {c}");
    }

    #[test]
    fn test_union_is_set_union() {
        let a = CounterArray::new(2, 10, 7);
        let b = CounterArray::new(2, 10, 7);
        a.add(0, 1);
        b.add(0, 2);
        a.union(0, &b, 0);
        let merged = a.count(0);
        assert!(merged > 1.5 && merged < 2.6, "got {merged}");

        // Union with an identical counter changes nothing.
        let before = a.count(0);
        a.union(0, &b, 0);
        assert_eq!(a.count(0), before);
    }

    #[test]
    fn test_extract_preserves_registers() {
        let arr = CounterArray::new(8, 8, 99);
        for i in 0..8 {
            arr.add(i, i as u64 * 11);
            arr.add(i, i as u64 * 13);
        }
        let picked = arr.extract([6usize, 2, 4], 3);
        assert_eq!(picked.counters(), 3);
        assert!(picked.counter_eq(0, &arr, 6));
        assert!(picked.counter_eq(1, &arr, 2));
        assert!(picked.counter_eq(2, &arr, 4));
    }

    #[test]
    fn test_grow_and_blocks_roundtrip() {
        let mut arr = CounterArray::new(1, 8, 5);
        arr.add(0, 42);
        arr.add_counters(2);
        assert_eq!(arr.counters(), 3);
        assert_eq!(arr.count(2), 0.0);

        let mut block = vec![0u8; arr.registers_per_counter()];
        arr.counter(0, &mut block);
        arr.merge_counter(&block, 2);
        assert!(arr.counter_eq(0, &arr, 2));
    }

    #[test]
    fn test_seed_block_matches_add() {
        let arr = CounterArray::new(2, 8, 31);
        arr.add(0, 500);
        let mut block = vec![0u8; arr.registers_per_counter()];
        arr.seed_block(&mut block, 500);
        arr.merge_counter(&block, 1);
        assert!(arr.counter_eq(0, &arr, 1));
    }

    #[test]
    fn test_linear_range_accuracy() {
        let arr = CounterArray::new(1, 10, 1234);
        for v in 0..50u64 {
            arr.add(0, v);
        }
        let c = arr.count(0);
        assert!((c - 50.0).abs() < 5.0, "got {c}");
    }
}
