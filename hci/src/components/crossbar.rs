//! Adapter to the legacy logarithmic crossbar.
//!
//! The crossbar itself is an external black box behind [`LegacyCrossbar`]:
//! it only sees the narrow legacy bundles, without id, user nor ECC, and
//! answers every granted access (load or store) one cycle later.
//! [`LogInterconnect`] attaches any such crossbar to channels and restores
//! the transaction metadata on the way back.

use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Rule, Wires},
    params::{LatencyModel, SizeParams},
    utils::{clog2, is_pow2},
};

use super::{check_fan, rr_winner};

/// Legacy request bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XbarReq {
    pub req: bool,
    pub add: u64,
    pub wen: bool,
    pub wdata: u32,
    /// One bit per byte.
    pub be: u8,
}

/// Legacy response bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XbarRsp {
    pub gnt: bool,
    pub r_valid: bool,
    pub r_data: u32,
}

/// An N:M crossbar from initiators to banks.
///
/// `eval` maps the initiator requests and the bank responses to the
/// initiator responses and the bank requests. `policy` is the 2-bit
/// `arb_policy` control, interpreted by the crossbar only.
pub trait LegacyCrossbar {
    fn eval(&self, policy: u8, reqs: &[XbarReq], bank_rsps: &[XbarRsp]) -> (Vec<XbarRsp>, Vec<XbarReq>);
    fn tick(&mut self, policy: u8, reqs: &[XbarReq], bank_rsps: &[XbarRsp]);
    fn clear(&mut self);
}

/// Word-interleaved crossbar: bank `(add >> 2) mod M`, bank-local address
/// `(add >> (2 + log2 M)) << 2`. Policy `1` is a fixed priority to the lowest
/// index, any other value a round robin per bank.
#[derive(Debug, Clone)]
pub struct InterleavedCrossbar {
    n_banks: usize,
    rr: Vec<usize>,
    /// Bank serving each initiator's access granted at the last edge.
    served_q: Vec<Option<usize>>,
    /// Initiator left waiting for the grant of each bank at the last edge.
    pending: Vec<Option<usize>>,
}

impl InterleavedCrossbar {
    pub fn new(n_initiators: usize, n_banks: usize) -> Self {
        Self {
            n_banks,
            rr: vec![0; n_banks],
            served_q: vec![None; n_initiators],
            pending: vec![None; n_banks],
        }
    }

    fn bank_of(&self, add: u64) -> usize {
        ((add >> 2) as usize) & (self.n_banks - 1)
    }

    /// A stalled request keeps its bank until granted, so the bank channel
    /// stays stable while the bank refuses.
    fn winners(&self, policy: u8, reqs: &[XbarReq]) -> Vec<Option<usize>> {
        (0..self.n_banks)
            .map(|b| {
                if let Some(i) = self.pending[b] {
                    if reqs[i].req && self.bank_of(reqs[i].add) == b {
                        return Some(i);
                    }
                }
                let requests: Vec<bool> = reqs.iter().map(|r| r.req && self.bank_of(r.add) == b).collect();
                if !requests.iter().any(|&r| r) {
                    return None;
                }
                let start = if policy == 1 { 0 } else { self.rr[b] };
                Some(rr_winner(start, &requests))
            })
            .collect()
    }
}

impl LegacyCrossbar for InterleavedCrossbar {
    fn eval(&self, policy: u8, reqs: &[XbarReq], bank_rsps: &[XbarRsp]) -> (Vec<XbarRsp>, Vec<XbarReq>) {
        let bits = clog2(self.n_banks);
        let winners = self.winners(policy, reqs);

        let mut up: Vec<XbarRsp> = self
            .served_q
            .iter()
            .map(|s| match s {
                Some(b) => XbarRsp {
                    gnt: false,
                    r_valid: true,
                    r_data: bank_rsps[*b].r_data,
                },
                None => XbarRsp::default(),
            })
            .collect();
        let mut down = vec![XbarReq::default(); self.n_banks];
        for (b, w) in winners.iter().enumerate() {
            if let Some(i) = *w {
                down[b] = XbarReq {
                    add: (reqs[i].add >> (2 + bits)) << 2,
                    ..reqs[i]
                };
                up[i].gnt = bank_rsps[b].gnt;
            }
        }
        (up, down)
    }

    fn tick(&mut self, policy: u8, reqs: &[XbarReq], bank_rsps: &[XbarRsp]) {
        let winners = self.winners(policy, reqs);
        self.served_q.fill(None);
        self.pending.fill(None);
        for (b, w) in winners.into_iter().enumerate() {
            match (w, bank_rsps[b].gnt) {
                (Some(i), true) => {
                    self.served_q[i] = Some(b);
                    self.rr[b] = (i + 1) % reqs.len();
                }
                (Some(i), false) => self.pending[b] = Some(i),
                (None, _) => {}
            }
        }
    }

    fn clear(&mut self) {
        self.rr.fill(0);
        self.served_q.fill(None);
        self.pending.fill(None);
    }
}

/// Channel wrapper around a [`LegacyCrossbar`] from N 32-bit initiators to M
/// 32-bit bank channels.
pub struct LogInterconnect<X> {
    name: String,
    inputs: Vec<ChannelId>,
    outputs: Vec<ChannelId>,
    xbar: X,
    id_q: Vec<u64>,
    user_q: Vec<u64>,
    checks: Vec<LatencyCheck>,
}

impl<X: LegacyCrossbar> LogInterconnect<X> {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        inputs: Vec<ChannelId>,
        outputs: Vec<ChannelId>,
        xbar: X,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        check_fan(&name, !inputs.is_empty(), "no initiator")?;
        check_fan(&name, is_pow2(outputs.len()), format!("{} banks is not a power of two", outputs.len()))?;
        for &c in inputs.iter().chain(&outputs) {
            let p = fabric.params(c);
            if p.dw != 32 || p.bw != 8 {
                return Err(ConfigError::SizeMismatch {
                    component: name,
                    left: fabric.wires().name(c).to_string(),
                    right: "legacy crossbar".into(),
                    detail: "legacy ports are 32 bits with byte strobes".into(),
                });
            }
        }
        let n = inputs.len();
        Ok(Self {
            name,
            checks: vec![LatencyCheck::default(); outputs.len()],
            inputs,
            outputs,
            xbar,
            id_q: vec![0; n],
            user_q: vec![0; n],
        })
    }

    pub fn crossbar(&self) -> &X {
        &self.xbar
    }

    fn legacy(&self, wires: &Wires) -> (Vec<XbarReq>, Vec<XbarRsp>) {
        let reqs = self
            .inputs
            .iter()
            .map(|&c| {
                let r = wires.request(c);
                XbarReq {
                    req: r.req,
                    add: r.add,
                    wen: r.wen,
                    wdata: r.data[0],
                    be: pack_be(&r.be),
                }
            })
            .collect();
        let rsps = self
            .outputs
            .iter()
            .map(|&c| {
                let r = wires.response(c);
                XbarRsp {
                    gnt: r.gnt,
                    r_valid: r.r_valid,
                    r_data: r.r_data[0],
                }
            })
            .collect();
        (reqs, rsps)
    }
}

fn pack_be(be: &[bool]) -> u8 {
    be.iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (u8::from(b) << i))
}

fn unpack_be(be: u8, p: &SizeParams) -> Vec<bool> {
    (0..p.strobes()).map(|i| (be >> i) & 1 == 1).collect()
}

impl<X: LegacyCrossbar + 'static> Component for LogInterconnect<X> {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        self.outputs.clone()
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        self.inputs.clone()
    }

    fn eval(&self, wires: &mut Wires) {
        let (reqs, rsps) = self.legacy(wires);
        let (up, down) = self.xbar.eval(wires.ctrl().policy(), &reqs, &rsps);

        for (&c, r) in self.outputs.iter().zip(down) {
            let p = *wires.params(c);
            let req = Request {
                req: r.req,
                add: r.add,
                wen: r.wen,
                data: vec![r.wdata],
                be: unpack_be(r.be, &p),
                ..Request::idle(&p)
            };
            wires.drive_request(c, req);
        }
        for (i, (&c, r)) in self.inputs.iter().zip(up).enumerate() {
            let p = *wires.params(c);
            let rsp = Response {
                gnt: r.gnt,
                r_valid: r.r_valid,
                r_data: vec![r.r_data],
                r_id: self.id_q[i],
                r_user: self.user_q[i],
                ..Response::idle(&p)
            };
            wires.drive_response(c, rsp);
        }
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        for (check, &c) in self.checks.iter_mut().zip(&self.outputs) {
            let (req, rsp) = (wires.request(c), wires.response(c));
            check.observe(&self.name, req.fire(rsp), req.wen, rsp.r_valid, diag);
        }
        for (i, &c) in self.inputs.iter().enumerate() {
            let (req, rsp) = (wires.request(c), wires.response(c));
            if req.fire(rsp) {
                self.id_q[i] = req.id;
                self.user_q[i] = req.user;
            }
            if rsp.r_valid && !req.r_ready {
                tracing::error!("{}: response to a stalled initiator is lost", self.name);
                diag.report(&self.name, Rule::ResponseOverflow, format!("response on input {i} dropped"));
            }
        }
        let (reqs, rsps) = self.legacy(wires);
        self.xbar.tick(wires.ctrl().policy(), &reqs, &rsps);
    }

    fn clear(&mut self) {
        self.xbar.clear();
        self.id_q.fill(0);
        self.user_q.fill(0);
        self.checks.iter_mut().for_each(LatencyCheck::clear);
    }
}
