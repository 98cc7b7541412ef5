//! Random access streams for the masters of a cluster.
//!
//! Every master gets a list of [`Transaction`]s following an address
//! pattern. The generator shares its bookkeeping between all masters: a
//! word is never accessed again after it was written, and never written
//! after it was read, so every read in a run must return the initial
//! memory content whatever the interleaving of the masters.

use std::collections::HashSet;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Transaction;

/// Address sequence of a master. Strides and lengths count 32-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessPattern {
    #[default]
    Random,
    Linear {
        start: u64,
        stride0: u64,
    },
    TwoD {
        start: u64,
        stride0: u64,
        len_d0: u64,
        stride1: u64,
    },
    ThreeD {
        start: u64,
        stride0: u64,
        len_d0: u64,
        stride1: u64,
        len_d1: u64,
        stride2: u64,
    },
}

impl AccessPattern {
    /// Byte address of the `n`-th access, before wrapping.
    fn address(&self, n: u64) -> Option<u64> {
        let words = match *self {
            AccessPattern::Random => return None,
            AccessPattern::Linear { start, stride0 } => return Some(start + 4 * n * stride0),
            AccessPattern::TwoD {
                stride0,
                len_d0,
                stride1,
                ..
            } => {
                let len_d0 = len_d0.max(1);
                (n % len_d0) * stride0 + (n / len_d0) * stride1
            }
            AccessPattern::ThreeD {
                stride0,
                len_d0,
                stride1,
                len_d1,
                stride2,
                ..
            } => {
                let (len_d0, len_d1) = (len_d0.max(1), len_d1.max(1));
                let (i, j, k) = (n % len_d0, (n / len_d0) % len_d1, n / (len_d0 * len_d1));
                i * stride0 + j * stride1 + k * stride2
            }
        };
        Some(self.start() + 4 * words)
    }

    fn start(&self) -> u64 {
        match *self {
            AccessPattern::Random => 0,
            AccessPattern::Linear { start, .. }
            | AccessPattern::TwoD { start, .. }
            | AccessPattern::ThreeD { start, .. } => start,
        }
    }
}

/// Cycles between the grant of a transaction and the issue of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOffset {
    /// Uniform in `1..=max`.
    Random { max: u64 },
    /// Always the same gap.
    Exact(u64),
}

impl CycleOffset {
    fn draw(self, rng: &mut StdRng) -> u64 {
        match self {
            CycleOffset::Random { max } => rng.gen_range(1..=max.max(1)),
            CycleOffset::Exact(n) => n.max(1),
        }
    }
}

/// Candidate addresses tried per requested transaction before a master
/// gives up.
const ATTEMPTS_PER_TEST: u64 = 64;

pub struct StimuliGenerator {
    rng: StdRng,
    mem_bytes: u64,
    read: HashSet<u64>,
    written: HashSet<u64>,
    next_id: u64,
}

impl StimuliGenerator {
    pub fn new(seed: u64, mem_bytes: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            mem_bytes,
            read: HashSet::new(),
            written: HashSet::new(),
            next_id: 0,
        }
    }

    /// Word-aligned address, rolled over at the end of the memory.
    fn wrap(&self, add: u64) -> u64 {
        (add & !3) % self.mem_bytes
    }

    fn allowed(&self, words: &[u64], wen: bool) -> bool {
        words
            .iter()
            .all(|w| !self.written.contains(w) && (wen || !self.read.contains(w)))
    }

    /// Up to `n_test` transactions of `width` words each. Fewer are returned
    /// when the pattern runs out of addresses it may touch.
    pub fn generate(
        &mut self,
        name: &str,
        pattern: &AccessPattern,
        n_test: usize,
        width: usize,
        offset: CycleOffset,
    ) -> Vec<Transaction> {
        let mut txs = Vec::with_capacity(n_test);
        let mut n = 0;
        let limit = ATTEMPTS_PER_TEST * (n_test as u64 + 1);
        while txs.len() < n_test {
            if n == limit {
                tracing::warn!("{}: {} of {} transactions, no address left", name, txs.len(), n_test);
                break;
            }
            let wen: bool = self.rng.gen();
            let add = match pattern.address(n) {
                Some(add) => self.wrap(add),
                None => 4 * self.rng.gen_range(0..self.mem_bytes / 4),
            };
            n += 1;
            let first = add >> 2;
            let words: Vec<u64> = (first..first + width as u64).collect();
            if !self.allowed(&words, wen) {
                continue;
            }
            let set = if wen { &mut self.read } else { &mut self.written };
            set.extend(words);

            let delay = offset.draw(&mut self.rng);
            let tx = if wen {
                Transaction::read(add)
            } else {
                Transaction::write(add, (0..width).map(|_| self.rng.gen()).collect())
            };
            txs.push(tx.with_id(self.next_id).with_delay(delay));
            self.next_id += 1;
        }
        tracing::debug!("{}: {} transactions", name, txs.len());
        txs
    }

    /// Identifiers handed out so far.
    pub fn ids(&self) -> u64 {
        self.next_id
    }
}
