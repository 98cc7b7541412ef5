use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Rule, Wires},
    params::LatencyModel,
};

use super::{check_same_size, rr_winner};

const LOAD: usize = 0;
const STORE: usize = 1;

/// Two-way round robin between a load stream and a store stream sharing one
/// output.
///
/// There is no winner register on the response path: every response belongs
/// to the load side, since stores are never answered downstream.
pub struct LoadStoreMixer {
    name: String,
    /// `[load, store]`.
    inputs: [ChannelId; 2],
    output: ChannelId,
    rr: usize,
    pending: Option<usize>,
    /// A store was granted at the last edge.
    store_q: bool,
    check: LatencyCheck,
}

impl LoadStoreMixer {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        load: ChannelId,
        store: ChannelId,
        output: ChannelId,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        check_same_size(fabric, &name, load, output)?;
        check_same_size(fabric, &name, store, output)?;
        Ok(Self {
            name,
            inputs: [load, store],
            output,
            rr: 0,
            pending: None,
            store_q: false,
            check: LatencyCheck::default(),
        })
    }

    fn winner(&self, wires: &Wires) -> usize {
        self.pending.unwrap_or_else(|| {
            let requests = self.inputs.map(|c| wires.request(c).req);
            rr_winner(self.rr, &requests)
        })
    }
}

impl Component for LoadStoreMixer {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![self.output]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        self.inputs.to_vec()
    }

    fn eval(&self, wires: &mut Wires) {
        let winner = self.winner(wires);
        let mut req: Request = wires.request(self.inputs[winner]).clone();
        req.r_ready = wires.request(self.inputs[LOAD]).r_ready;
        wires.drive_request(self.output, req);

        let out = wires.response(self.output).clone();
        let load = Response {
            gnt: winner == LOAD && out.gnt,
            ..out.clone()
        };
        let store = Response {
            gnt: winner == STORE && out.gnt,
            ..out.silenced()
        };
        wires.drive_response(self.inputs[LOAD], load);
        wires.drive_response(self.inputs[STORE], store);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let winner = self.winner(wires);
        let (req, rsp) = (wires.request(self.output), wires.response(self.output));
        let fire = req.fire(rsp);

        if self.store_q && rsp.r_valid {
            diag.report(&self.name, Rule::LatencyContract, "store answered, response steered to the load side");
        }
        self.check.observe(&self.name, fire, req.wen, rsp.r_valid, diag);

        self.store_q = fire && winner == STORE;
        self.pending = (req.req && !rsp.gnt).then_some(winner);
        if fire {
            self.rr = 1 - winner;
        }
    }

    fn clear(&mut self) {
        self.rr = 0;
        self.pending = None;
        self.store_q = false;
        self.check.clear();
    }
}
