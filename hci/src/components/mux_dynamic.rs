use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Wires},
    params::LatencyModel,
};

use super::{check_fan, check_same_size, rr_winner};

/// N:M round-robin multiplexer. Input `k * M + j` competes for output `j`.
///
/// Responses are not tagged: they are steered back to the input that won
/// the previous cycle, which is only correct when the downstream answers
/// every granted read exactly one cycle later.
pub struct DynamicMux {
    name: String,
    inputs: Vec<ChannelId>,
    outputs: Vec<ChannelId>,
    guarded: bool,
    /// Shared round-robin pointer in `0..N/M`.
    rr: usize,
    /// Registered winner per output, steering this cycle's response.
    winner_q: Vec<usize>,
    /// Winner of a request left pending downstream at the last edge.
    pending: Vec<Option<usize>>,
    checks: Vec<LatencyCheck>,
}

impl DynamicMux {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        inputs: Vec<ChannelId>,
        outputs: Vec<ChannelId>,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        let (n, m) = (inputs.len(), outputs.len());
        check_fan(&name, m > 0 && n >= m, format!("{n} inputs onto {m} outputs"))?;
        check_fan(&name, n % m == 0, format!("{n} inputs not divisible by {m} outputs"))?;
        for &i in &inputs {
            check_same_size(fabric, &name, i, outputs[0])?;
        }
        for &o in &outputs {
            check_same_size(fabric, &name, o, outputs[0])?;
        }
        Ok(Self {
            name,
            inputs,
            winner_q: vec![0; m],
            pending: vec![None; m],
            checks: vec![LatencyCheck::default(); m],
            outputs,
            guarded: false,
            rr: 0,
        })
    }

    /// Keep the winner of a pending request until it is granted, so that a
    /// newer request cannot overtake it on the output.
    pub fn guarded(self, guarded: bool) -> Self {
        Self { guarded, ..self }
    }

    fn per_output(&self) -> usize {
        self.inputs.len() / self.outputs.len()
    }

    fn input(&self, k: usize, j: usize) -> ChannelId {
        self.inputs[k * self.outputs.len() + j]
    }

    fn winner(&self, wires: &Wires, j: usize) -> usize {
        if let (true, Some(k)) = (self.guarded, self.pending[j]) {
            return k;
        }
        let requests: Vec<bool> = (0..self.per_output())
            .map(|k| wires.request(self.input(k, j)).req)
            .collect();
        rr_winner(self.rr, &requests)
    }

    pub fn rr(&self) -> usize {
        self.rr
    }
}

impl Component for DynamicMux {
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
        for (j, &out) in self.outputs.iter().enumerate() {
            let winner = self.winner(wires, j);
            let steer = self.winner_q[j];
            let out_rsp = wires.response(out).clone();

            let mut req: Request = wires.request(self.input(winner, j)).clone();
            req.r_ready = wires.request(self.input(steer, j)).r_ready;
            wires.drive_request(out, req);

            for k in 0..self.per_output() {
                let rsp = Response {
                    gnt: k == winner && out_rsp.gnt,
                    r_valid: k == steer && out_rsp.r_valid,
                    ..out_rsp.clone()
                };
                wires.drive_response(self.input(k, j), rsp);
            }
        }
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let mut handshake = false;
        for (j, &out) in self.outputs.iter().enumerate() {
            let winner = self.winner(wires, j);
            let (req, rsp) = (wires.request(out), wires.response(out));
            let fire = req.fire(rsp);
            self.checks[j].observe(&self.name, fire, req.wen, rsp.r_valid, diag);
            if fire {
                tracing::debug!("{}: output {} granted to input {}", self.name, j, winner);
            }
            handshake |= fire;
            self.pending[j] = (req.req && !rsp.gnt).then_some(winner);
            self.winner_q[j] = winner;
        }
        if handshake {
            self.rr = (self.rr + 1) % self.per_output();
        }
    }

    fn clear(&mut self) {
        self.rr = 0;
        self.winner_q.fill(0);
        self.pending.fill(None);
        self.checks.iter_mut().for_each(LatencyCheck::clear);
    }
}
