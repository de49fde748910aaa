//! Bloom filter with FNV-1a-64 double hashing.
//!
//! Ported from `illume/filter/bloom.py`'s `BloomFilter`, re-expressed without
//! a `bitarray`/`bitvec` dependency: the bit storage is a `Vec<u64>` this
//! struct owns outright, which is what lets it answer the design's
//! `InsufficientMemory`/`AllocationValueError` pre-checks (`spec.md` §4.5)
//! against its own exact byte footprint rather than a wrapper crate's.

use std::f64::consts::E;

use fnv::FnvHasher;
use std::hash::Hasher;

use crate::error::{CrawlError, Result};

const WORD_BITS: usize = u64::BITS as usize;

/// A probabilistic set supporting insertion and membership tests, sized for
/// `max_n` insertions at a target false-positive rate `p`.
#[derive(Debug)]
pub struct BloomFilter {
    max_n: usize,
    p: f64,
    n: usize,
    m: usize,
    k: usize,
    bits: Vec<u64>,
}

impl BloomFilter {
    /// Construct a new bloom filter. `m` and `k` are computed from `(max_n,
    /// p)` per `spec.md` §3's invariant:
    /// `m = ceil(-n * ln(p) / (ln 2)^2)`, `k = ceil((m/n) * ln 2)`.
    pub fn new(max_n: usize, p: f64) -> Result<Self> {
        if max_n == 0 {
            return Err(CrawlError::AllocationValueError {
                name: "BloomFilter.max_n".to_string(),
                size: 0,
            });
        }
        let m_float = optimal_m(max_n, p);
        let k_float = optimal_k(m_float, max_n);
        let m = m_float.ceil() as usize;
        let k = (k_float.ceil() as usize).max(1);

        let words = m.div_ceil(WORD_BITS).max(1);
        check_alloc_size(words * std::mem::size_of::<u64>(), "BloomFilter.bits")?;

        Ok(Self {
            max_n,
            p,
            n: 0,
            m: m.max(1),
            k,
            bits: vec![0u64; words],
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Current measured false-positive-rate upper bound.
    pub fn current_p(&self) -> f64 {
        bloom_error_rate(self.m as f64, self.k as f64, self.n as f64)
    }

    /// Insert `item`, after checking the size/error-rate bounds (`spec.md`
    /// §4.5: "on insertion, if the current error-rate upper bound exceeds
    /// the configured `p`, a fault is raised").
    pub fn add(&mut self, item: &[u8]) -> Result<()> {
        self.check_bounds()?;
        let indices: Vec<usize> = self.hashes(item).collect();
        for index in indices {
            self.set_bit(index);
        }
        self.n += 1;
        Ok(())
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        self.hashes(item).all(|index| self.bit(index))
    }

    fn check_bounds(&self) -> Result<()> {
        if self.n >= self.max_n {
            return Err(CrawlError::SizeOverflow { max_n: self.max_n });
        }
        if self.current_p() > self.p {
            return Err(CrawlError::ExceedsErrorRate {
                current_p: self.current_p(),
                p: self.p,
            });
        }
        Ok(())
    }

    fn hashes(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = fnv1a64_pair(item);
        let m = self.m as u64;
        (0..self.k).map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m) as usize)
    }

    fn set_bit(&mut self, index: usize) {
        self.bits[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    fn bit(&self, index: usize) -> bool {
        self.bits[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }
}

fn optimal_m(n: usize, p: f64) -> f64 {
    -((n as f64) * p.ln()) / std::f64::consts::LN_2.powi(2)
}

fn optimal_k(m: f64, n: usize) -> f64 {
    (m / n as f64) * std::f64::consts::LN_2
}

fn bloom_error_rate(m: f64, k: f64, n: f64) -> f64 {
    (1.0 - E.powf(-k * (n + 0.5) / (m - 1.0))).powf(k)
}

/// FNV-1a-64, composited into a pair of independent seeds the way
/// `illume/filter/bloom.py`'s `fnv1a64_composite` derives `k` positions via
/// double hashing (`h_i = (h1 + i*h2) mod m`, `spec.md` §4.5).
fn fnv1a64_pair(item: &[u8]) -> (u64, u64) {
    let mut h1 = FnvHasher::default();
    h1.write(item);
    let a = h1.finish();

    let mut h2 = FnvHasher::default();
    h2.write(item);
    h2.write_u8(0xff);
    let b = h2.finish() | 1; // must be odd so it can hit every bucket mod a power-of-two m.

    (a, b)
}

/// Pre-check an allocation against available system memory, mirroring
/// `illume/util.py`'s `check_alloc_size` (backed there by `psutil`).
fn check_alloc_size(size: usize, name: &str) -> Result<()> {
    use sysinfo::System;

    if size == 0 {
        return Err(CrawlError::AllocationValueError {
            name: name.to_string(),
            size: 0,
        });
    }
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    if size as u64 > available {
        return Err(CrawlError::InsufficientMemory {
            name: name.to_string(),
            size,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_invariant_within_rounding() {
        let n = 10_000;
        let p = 0.01;
        let bf = BloomFilter::new(n, p).unwrap();
        let expected_m = optimal_m(n, p);
        assert!(bf.m() as f64 >= 0.9 * expected_m);
        let expected_k = optimal_k(expected_m, n);
        assert!(bf.k() as f64 >= expected_k.ceil() - 1.0);
    }

    #[test]
    fn member_queries_never_false_negative() {
        let mut bf = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..500u32 {
            bf.add(&i.to_le_bytes()).unwrap();
        }
        for i in 0..500u32 {
            assert!(bf.contains(&i.to_le_bytes()));
        }
    }

    #[test]
    fn refuses_insertion_past_max_n() {
        let mut bf = BloomFilter::new(2, 0.5).unwrap();
        bf.add(b"a").unwrap();
        bf.add(b"b").unwrap();
        assert!(matches!(bf.add(b"c"), Err(CrawlError::SizeOverflow { .. })));
    }

    #[test]
    fn rejects_non_positive_size() {
        assert!(matches!(
            BloomFilter::new(0, 0.01),
            Err(CrawlError::AllocationValueError { .. })
        ));
    }
}
