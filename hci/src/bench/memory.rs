use std::collections::{HashMap, VecDeque};

use crate::{
    channel::Response,
    framework::{ChannelId, Component, Diagnostics, Wires},
    utils::merge_lanes,
};

/// Deterministic content of a never-written word, indexed by its global
/// word address.
pub fn initial_word(word: u64) -> u32 {
    (word as u32).wrapping_mul(0x9e37_79b9) ^ 0x0bad_f00d
}

/// Response latency of a [`MemoryBank`], counted from the grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankLatency {
    Fixed(u64),
    /// One latency per granted request, in grant order. The last entry is
    /// reused when the script runs out. Responses are returned in the
    /// order they become due, so a script can reorder them.
    Scripted(VecDeque<u64>),
}

/// When the bank asserts `gnt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantPolicy {
    Always,
    /// Cycle `t` uses entry `t % len`.
    Pattern(Vec<bool>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResponse {
    /// Stores get no response.
    Silent,
    /// Stores are acknowledged like loads, with zero data.
    Acknowledge,
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: u64,
    seq: u64,
    rsp: Response,
}

/// Test bench memory bank. Word `i` of the bank holds global word
/// `i * n_banks + bank` of a word-interleaved memory.
pub struct MemoryBank {
    name: String,
    port: ChannelId,
    bank: u64,
    n_banks: u64,
    latency: BankLatency,
    grant: GrantPolicy,
    write_response: WriteResponse,
    reflect_id: bool,
    words: HashMap<u64, u32>,
    scheduled: Vec<Scheduled>,
    seq: u64,
    accesses: u64,
}

impl MemoryBank {
    pub fn new(name: impl Into<String>, port: ChannelId) -> Self {
        Self {
            name: name.into(),
            port,
            bank: 0,
            n_banks: 1,
            latency: BankLatency::Fixed(1),
            grant: GrantPolicy::Always,
            write_response: WriteResponse::Silent,
            reflect_id: false,
            words: HashMap::new(),
            scheduled: Vec::new(),
            seq: 0,
            accesses: 0,
        }
    }

    pub fn interleaved(self, bank: u64, n_banks: u64) -> Self {
        Self { bank, n_banks, ..self }
    }

    pub fn with_latency(self, latency: BankLatency) -> Self {
        Self { latency, ..self }
    }

    pub fn with_grant(self, grant: GrantPolicy) -> Self {
        Self { grant, ..self }
    }

    pub fn with_write_response(self, write_response: WriteResponse) -> Self {
        Self {
            write_response,
            ..self
        }
    }

    /// Return the request `id`/`user` on the response.
    pub fn with_reflect_id(self, reflect_id: bool) -> Self {
        Self { reflect_id, ..self }
    }

    fn global(&self, local_word: u64) -> u64 {
        local_word * self.n_banks + self.bank
    }

    /// Current content of a bank-local word.
    pub fn peek(&self, local_word: u64) -> u32 {
        self.words
            .get(&local_word)
            .copied()
            .unwrap_or_else(|| initial_word(self.global(local_word)))
    }

    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    /// Responses scheduled but not yet accepted.
    pub fn in_flight(&self) -> usize {
        self.scheduled.len()
    }

    fn grants(&self, cycle: u64) -> bool {
        match &self.grant {
            GrantPolicy::Always => true,
            GrantPolicy::Pattern(p) if p.is_empty() => true,
            GrantPolicy::Pattern(p) => p[(cycle % p.len() as u64) as usize],
        }
    }

    /// Index of the response presented this cycle.
    fn head(&self, cycle: u64) -> Option<usize> {
        self.scheduled
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= cycle)
            .min_by_key(|(_, s)| (s.due, s.seq))
            .map(|(i, _)| i)
    }

    fn next_latency(&mut self) -> u64 {
        match &mut self.latency {
            BankLatency::Fixed(n) => *n,
            BankLatency::Scripted(script) => {
                if script.len() > 1 {
                    script.pop_front().unwrap_or(1)
                } else {
                    script.front().copied().unwrap_or(1)
                }
            }
        }
    }
}

impl Component for MemoryBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        vec![self.port]
    }

    fn eval(&self, wires: &mut Wires) {
        let p = *wires.params(self.port);
        let cycle = wires.cycle();
        let mut rsp = match self.head(cycle) {
            Some(i) => self.scheduled[i].rsp.clone(),
            None => Response::idle(&p),
        };
        rsp.gnt = self.grants(cycle);
        wires.drive_response(self.port, rsp);
    }

    fn tick(&mut self, wires: &Wires, _diag: &mut Diagnostics) {
        let cycle = wires.cycle();
        let (req, rsp) = (wires.request(self.port), wires.response(self.port));
        let p = *wires.params(self.port);

        if rsp.accepted(req) {
            if let Some(i) = self.head(cycle) {
                self.scheduled.remove(i);
            }
        }

        if req.fire(rsp) {
            self.accesses += 1;
            let base = req.add >> 2;
            let spw = p.strobes_per_word();
            let mut r_data = vec![0; p.words()];
            for (i, word) in r_data.iter_mut().enumerate() {
                let local = base + i as u64;
                if req.wen {
                    *word = self.peek(local);
                } else {
                    let strobes = &req.be[i * spw..(i + 1) * spw];
                    let merged = merge_lanes(self.peek(local), req.data[i], strobes, p.bw);
                    self.words.insert(local, merged);
                }
            }
            if req.wen || self.write_response == WriteResponse::Acknowledge {
                let due = cycle + self.next_latency();
                let mut out = Response::idle(&p);
                out.r_valid = true;
                out.r_data = r_data;
                if self.reflect_id {
                    out.r_id = req.id;
                    out.r_user = req.user;
                }
                self.scheduled.push(Scheduled {
                    due,
                    seq: self.seq,
                    rsp: out,
                });
                self.seq += 1;
            }
        }
    }

    fn clear(&mut self) {
        self.scheduled.clear();
    }
}
