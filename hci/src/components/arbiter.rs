use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Rule, Wires},
    params::LatencyModel,
};

use super::{check_fan, check_same_size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    High,
    Low,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::High => Side::Low,
            Side::Low => Side::High,
        }
    }
}

/// How the requests of one side spread over the bank channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WidthMode {
    /// Independent narrow requests, arbitrated bank by bank.
    #[default]
    Banked,
    /// The requests of all banks belong to one wide transaction: the side
    /// is forwarded on all of its banks or on none.
    Wide,
}

/// 2:1 fixed priority arbiter over `NB_CHAN` parallel bank channels, with
/// an anti-starvation counter for the low priority side.
///
/// The high side wins contended banks unless it already won
/// `low_prio_max_stall` contended decisions in a row, in which case the low
/// side gets exactly one decision. `invert_prio` swaps which side is high.
pub struct Arbiter {
    name: String,
    high: Vec<ChannelId>,
    low: Vec<ChannelId>,
    outputs: Vec<ChannelId>,
    modes: [WidthMode; 2],
    stall: u8,
    /// Side owning a bank whose request was left pending at the last edge.
    held: Vec<Option<Side>>,
    winner_q: Vec<Option<Side>>,
    checks: Vec<LatencyCheck>,
}

struct Decision {
    owner: Vec<Option<Side>>,
    /// Banks requested by both sides.
    contended: Vec<bool>,
    /// Physical side currently holding the high priority.
    prio: Side,
}

impl Arbiter {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        high: Vec<ChannelId>,
        low: Vec<ChannelId>,
        outputs: Vec<ChannelId>,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        let n = outputs.len();
        check_fan(
            &name,
            n > 0 && high.len() == n && low.len() == n,
            format!("{} high and {} low channels onto {} banks", high.len(), low.len(), n),
        )?;
        for (&o, (&h, &l)) in outputs.iter().zip(high.iter().zip(&low)) {
            check_same_size(fabric, &name, h, o)?;
            check_same_size(fabric, &name, l, o)?;
        }
        Ok(Self {
            name,
            high,
            low,
            held: vec![None; n],
            winner_q: vec![None; n],
            checks: vec![LatencyCheck::default(); n],
            outputs,
            modes: [WidthMode::Banked; 2],
            stall: 0,
        })
    }

    pub fn with_modes(self, high: WidthMode, low: WidthMode) -> Self {
        Self {
            modes: [high, low],
            ..self
        }
    }

    fn ports(&self, side: Side) -> &[ChannelId] {
        match side {
            Side::High => &self.high,
            Side::Low => &self.low,
        }
    }

    fn mode(&self, side: Side) -> WidthMode {
        match side {
            Side::High => self.modes[0],
            Side::Low => self.modes[1],
        }
    }

    /// Contended decisions won in a row by the priority side.
    pub fn stall(&self) -> u8 {
        self.stall
    }

    fn decide(&self, wires: &Wires) -> Decision {
        let ctrl = wires.ctrl();
        let n = self.outputs.len();
        let req = |side: Side, b: usize| wires.request(self.ports(side)[b]).req;

        let prio = if ctrl.invert_prio { Side::Low } else { Side::High };
        let contended: Vec<bool> = (0..n).map(|b| req(Side::High, b) && req(Side::Low, b)).collect();
        let low_turn = ctrl.low_prio_max_stall > 0
            && self.stall >= ctrl.low_prio_max_stall
            && contended.contains(&true);
        let first = if low_turn { prio.other() } else { prio };

        let mut owner = vec![None; n];
        for (b, held) in self.held.iter().enumerate() {
            if let Some(side) = *held {
                if req(side, b) {
                    owner[b] = Some(side);
                }
            }
        }
        for side in [first, first.other()] {
            let wanted: Vec<usize> = (0..n).filter(|&b| req(side, b)).collect();
            match self.mode(side) {
                WidthMode::Banked => {
                    for b in wanted {
                        owner[b].get_or_insert(side);
                    }
                }
                WidthMode::Wide => {
                    if wanted.iter().all(|&b| owner[b].map_or(true, |s| s == side)) {
                        for b in wanted {
                            owner[b] = Some(side);
                        }
                    }
                }
            }
        }
        Decision {
            owner,
            contended,
            prio,
        }
    }

    /// Whether `side` sees its grant on bank `b`.
    fn granted(&self, wires: &Wires, owner: &[Option<Side>], side: Side, b: usize) -> bool {
        if owner[b] != Some(side) {
            return false;
        }
        match self.mode(side) {
            WidthMode::Banked => wires.response(self.outputs[b]).gnt,
            WidthMode::Wide => owner
                .iter()
                .zip(&self.outputs)
                .filter(|(o, _)| **o == Some(side))
                .all(|(_, &out)| wires.response(out).gnt),
        }
    }
}

impl Component for Arbiter {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        self.outputs.clone()
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        self.high.iter().chain(&self.low).copied().collect()
    }

    fn eval(&self, wires: &mut Wires) {
        let Decision { owner, .. } = self.decide(wires);
        for (b, &out) in self.outputs.iter().enumerate() {
            let p = *wires.params(out);
            let mut req = match owner[b] {
                Some(side) => wires.request(self.ports(side)[b]).clone(),
                None => Request::idle(&p),
            };
            req.r_ready = match self.winner_q[b] {
                Some(side) => wires.request(self.ports(side)[b]).r_ready,
                None => true,
            };
            wires.drive_request(out, req);
        }
        for side in [Side::High, Side::Low] {
            for b in 0..self.outputs.len() {
                let out_rsp = wires.response(self.outputs[b]);
                let rsp = Response {
                    gnt: self.granted(wires, &owner, side, b),
                    r_valid: self.winner_q[b] == Some(side) && out_rsp.r_valid,
                    ..out_rsp.clone()
                };
                wires.drive_response(self.ports(side)[b], rsp);
            }
        }
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let Decision {
            owner,
            contended,
            prio,
        } = self.decide(wires);
        let fire: Vec<bool> = self
            .outputs
            .iter()
            .map(|&o| wires.request(o).fire(wires.response(o)))
            .collect();
        // only wins on contended banks move the counter
        let won = |side: Side| (0..fire.len()).any(|b| fire[b] && contended[b] && owner[b] == Some(side));

        for side in [Side::High, Side::Low] {
            if self.mode(side) != WidthMode::Wide {
                continue;
            }
            let grants: Vec<bool> = (0..owner.len())
                .filter(|&b| owner[b] == Some(side))
                .map(|b| wires.response(self.outputs[b]).gnt)
                .collect();
            if grants.iter().any(|&g| g) && !grants.iter().all(|&g| g) {
                diag.report(&self.name, Rule::PartialGrant, format!("{side:?} side granted on some banks only"));
            }
        }

        let stall = if !contended.contains(&true) || won(prio.other()) {
            0
        } else if won(prio) {
            self.stall.saturating_add(1)
        } else {
            self.stall
        };
        if stall != self.stall {
            tracing::trace!("{}: stall counter {} -> {}", self.name, self.stall, stall);
        }
        self.stall = stall;

        for (b, &out) in self.outputs.iter().enumerate() {
            let (req, rsp) = (wires.request(out), wires.response(out));
            self.checks[b].observe(&self.name, fire[b], req.wen, rsp.r_valid, diag);
            self.held[b] = if req.req && !rsp.gnt { owner[b] } else { None };
            self.winner_q[b] = if fire[b] {
                owner[b]
            } else if rsp.r_valid && !req.r_ready {
                self.winner_q[b]
            } else {
                None
            };
        }
    }

    fn clear(&mut self) {
        self.stall = 0;
        self.held.fill(None);
        self.winner_q.fill(None);
        self.checks.iter_mut().for_each(LatencyCheck::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{initial_word, Initiator, MemoryBank, Transaction},
        params::{InterconnectCtrl, SizeParams},
    };

    struct Bench {
        fabric: Fabric,
        high: Vec<ChannelId>,
        low: Vec<ChannelId>,
        out: Vec<ChannelId>,
    }

    fn bench(n: usize, modes: (WidthMode, WidthMode)) -> Bench {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let high = fabric.channels("high", n, p).unwrap();
        let low = fabric.channels("low", n, p).unwrap();
        let out = fabric.channels("out", n, p).unwrap();
        let arb = Arbiter::new(&fabric, "arb", high.clone(), low.clone(), out.clone(), LatencyModel::FixedOneCycle)
            .unwrap()
            .with_modes(modes.0, modes.1);
        fabric.add(arb).unwrap();
        for (b, &o) in out.iter().enumerate() {
            fabric
                .add(MemoryBank::new(format!("mem{b}"), o).interleaved(b as u64, n as u64))
                .unwrap();
        }
        Bench { fabric, high, low, out }
    }

    fn flood(fabric: &mut Fabric, name: &str, port: ChannelId, n: usize) {
        let mut ini = Initiator::new(name, port);
        ini.extend((0..n).map(|i| Transaction::read(4 * i as u64)));
        fabric.add(ini).unwrap();
    }

    #[test]
    fn test_starvation_bound() {
        let max = 3;
        let Bench { mut fabric, high, low, out } = bench(1, (WidthMode::Banked, WidthMode::Banked));
        fabric.set_ctrl(InterconnectCtrl {
            low_prio_max_stall: max,
            ..Default::default()
        });
        flood(&mut fabric, "h", high[0], 100);
        flood(&mut fabric, "l", low[0], 100);

        let mut winners = vec![];
        for _ in 0..40 {
            fabric.settle().unwrap();
            if fabric.request(out[0]).fire(fabric.response(out[0])) {
                winners.push(fabric.response(low[0]).gnt);
            }
            fabric.tick().unwrap();
        }
        for window in winners.windows(max as usize + 1) {
            assert!(window.iter().any(|&low| low), "low side starved in {window:?}");
        }
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_free_bank_does_not_reset_the_counter() {
        let max = 3;
        let Bench { mut fabric, high, low, out } = bench(2, (WidthMode::Banked, WidthMode::Banked));
        fabric.set_ctrl(InterconnectCtrl {
            low_prio_max_stall: max,
            ..Default::default()
        });
        // the low side is served on bank 1 every cycle, bank 0 is contended
        flood(&mut fabric, "h0", high[0], 100);
        flood(&mut fabric, "l0", low[0], 100);
        flood(&mut fabric, "l1", low[1], 100);

        let mut winners = vec![];
        for _ in 0..40 {
            fabric.settle().unwrap();
            if fabric.request(out[0]).fire(fabric.response(out[0])) {
                winners.push(fabric.response(low[0]).gnt);
            }
            assert!(fabric.response(low[1]).gnt);
            fabric.tick().unwrap();
        }
        assert_eq!(winners.len(), 40);
        for window in winners.windows(max as usize + 1) {
            assert!(window.iter().any(|&low| low), "low side starved on bank 0 in {window:?}");
        }
        assert_eq!(winners.iter().filter(|&&low| low).count(), 10);
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_fixed_priority_without_counter() {
        let Bench { mut fabric, high, low, .. } = bench(1, (WidthMode::Banked, WidthMode::Banked));
        flood(&mut fabric, "h", high[0], 20);
        flood(&mut fabric, "l", low[0], 20);
        for _ in 0..10 {
            fabric.settle().unwrap();
            assert!(fabric.response(high[0]).gnt);
            assert!(!fabric.response(low[0]).gnt);
            fabric.tick().unwrap();
        }
        // swapping priorities serves the other side
        fabric.set_ctrl(InterconnectCtrl {
            invert_prio: true,
            ..Default::default()
        });
        fabric.settle().unwrap();
        assert!(!fabric.response(high[0]).gnt);
        assert!(fabric.response(low[0]).gnt);
    }

    #[test]
    fn test_wide_side_is_atomic() {
        let Bench { mut fabric, high, low, out } = bench(2, (WidthMode::Wide, WidthMode::Banked));
        let p = SizeParams::default();
        fabric.set_ctrl(InterconnectCtrl {
            low_prio_max_stall: 1,
            ..Default::default()
        });
        // the wide side requests both banks, the narrow side bank 1 only
        fabric.drive_request(high[0], Request::read(&p, 0)).unwrap();
        fabric.drive_request(high[1], Request::read(&p, 0)).unwrap();
        fabric.drive_request(low[1], Request::read(&p, 4)).unwrap();
        fabric.settle().unwrap();
        assert!(fabric.response(high[0]).gnt && fabric.response(high[1]).gnt);
        assert!(!fabric.response(low[1]).gnt);
        fabric.tick().unwrap();

        // low turn: the wide side loses both banks, not just the contended one
        fabric.drive_request(high[0], Request::read(&p, 4)).unwrap();
        fabric.drive_request(high[1], Request::read(&p, 4)).unwrap();
        fabric.settle().unwrap();
        assert!(fabric.response(low[1]).gnt);
        assert!(!fabric.response(high[0]).gnt && !fabric.response(high[1]).gnt);
        assert!(!fabric.request(out[0]).req);
        fabric.tick().unwrap();
        fabric.settle().unwrap();
        assert_eq!(fabric.response(low[1]).r_data, vec![initial_word(3)]);
        assert!(fabric.response(low[1]).r_valid);
        assert_eq!(fabric.diagnostics().count(Rule::PartialGrant), 0);
    }
}
