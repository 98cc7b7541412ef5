use crate::{
    channel::Response,
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Rule, Wires},
    utils::{clog2, mask},
};

use super::{check_fan, check_same_size, rr_winner};

/// Field carrying the slot index of the originating input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagField {
    Id,
    /// Legacy targets without an id field.
    User,
}

/// N:1 multiplexer tagging every request with the index of its input, so
/// responses may come back with any latency and in any order.
///
/// Everything downstream must return the tag unchanged on `r_id` (or
/// `r_user`).
pub struct OooMux {
    name: String,
    inputs: Vec<ChannelId>,
    output: ChannelId,
    tag: TagField,
    rr: usize,
    pending: Option<usize>,
    priority_force: bool,
    priority: Vec<usize>,
}

impl OooMux {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        inputs: Vec<ChannelId>,
        output: ChannelId,
        tag: TagField,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_fan(&name, !inputs.is_empty(), "no input channel")?;
        for &i in &inputs {
            check_same_size(fabric, &name, i, output)?;
        }
        let p = fabric.params(output);
        let width = match tag {
            TagField::Id => p.iw,
            TagField::User => p.uw,
        };
        if (width as u32) < clog2(inputs.len()) {
            return Err(ConfigError::IdWidth {
                component: name,
                width,
                channels: inputs.len(),
            });
        }
        Ok(Self {
            name,
            priority: (0..inputs.len()).collect(),
            inputs,
            output,
            tag,
            rr: 0,
            pending: None,
            priority_force: false,
        })
    }

    /// Bypass round robin: the first requesting input in `order` wins.
    pub fn set_priority(&mut self, force: bool, order: Vec<usize>) {
        self.priority_force = force;
        if order.iter().all(|&i| i < self.inputs.len()) && !order.is_empty() {
            self.priority = order;
        } else {
            tracing::warn!("{}: ignore invalid priority order {:?}", self.name, order);
        }
    }

    fn winner(&self, wires: &Wires) -> usize {
        if let Some(k) = self.pending {
            return k;
        }
        let requests: Vec<bool> = self.inputs.iter().map(|&c| wires.request(c).req).collect();
        if self.priority_force {
            self.priority
                .iter()
                .copied()
                .find(|&k| requests[k])
                .unwrap_or(self.priority[0])
        } else {
            rr_winner(self.rr, &requests)
        }
    }

    /// Input a response belongs to, from its tag.
    fn owner(&self, rsp: &Response, width: usize) -> u64 {
        let tag = match self.tag {
            TagField::Id => rsp.r_id,
            TagField::User => rsp.r_user,
        };
        tag & mask(width)
    }

    fn tag_width(&self, wires: &Wires) -> usize {
        let p = wires.params(self.output);
        match self.tag {
            TagField::Id => p.iw,
            TagField::User => p.uw,
        }
    }
}

impl Component for OooMux {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![self.output]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        self.inputs.clone()
    }

    fn eval(&self, wires: &mut Wires) {
        let winner = self.winner(wires);
        let out_rsp = wires.response(self.output).clone();
        let owner = self.owner(&out_rsp, self.tag_width(wires));

        let mut req = wires.request(self.inputs[winner]).clone();
        match self.tag {
            TagField::Id => req.id = winner as u64,
            TagField::User => req.user = winner as u64,
        }
        req.r_ready = match self.inputs.get(owner as usize) {
            Some(&c) => wires.request(c).r_ready,
            None => true,
        };
        wires.drive_request(self.output, req);

        for (k, &c) in self.inputs.iter().enumerate() {
            let rsp = Response {
                gnt: k == winner && out_rsp.gnt,
                r_valid: k as u64 == owner && out_rsp.r_valid,
                ..out_rsp.clone()
            };
            wires.drive_response(c, rsp);
        }
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let winner = self.winner(wires);
        let (req, rsp) = (wires.request(self.output), wires.response(self.output));
        if rsp.r_valid && self.owner(rsp, self.tag_width(wires)) as usize >= self.inputs.len() {
            diag.report(&self.name, Rule::ResponseOverflow, "response tag matches no input");
        }
        if req.fire(rsp) {
            tracing::debug!("{}: granted input {}", self.name, winner);
            self.rr = (self.rr + 1) % self.inputs.len();
        }
        self.pending = (req.req && !rsp.gnt).then_some(winner);
    }

    fn clear(&mut self) {
        self.rr = 0;
        self.pending = None;
    }
}
