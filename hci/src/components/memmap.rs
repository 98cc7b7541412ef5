use std::ops::Range;

use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Wires},
    params::LatencyModel,
};

use super::check_same_size;

/// Data of every word of the response to an unmapped access.
pub const FAULT_DATA: u32 = 0xbada_cce5;

/// Byte address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRegion {
    pub start: u64,
    pub end: u64,
}

impl AddrRegion {
    pub fn contains(&self, add: u64) -> bool {
        (self.start..self.end).contains(&add)
    }
}

impl From<Range<u64>> for AddrRegion {
    fn from(r: Range<u64>) -> Self {
        Self {
            start: r.start,
            end: r.end,
        }
    }
}

/// Target of the transaction granted at the last edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemmapState {
    #[default]
    Idle,
    OnTcdm,
    OnPer,
    Error,
}

/// Address-range demultiplexer from one initiator to the shared memory
/// (`tcdm`) and the peripheral target (`per`).
///
/// The first `nb_interleaved` regions map to the memory, the others to the
/// peripherals. An access to no region is granted at once, forwarded
/// nowhere and answered one cycle later with `r_opc` set and
/// [`FAULT_DATA`].
pub struct MemmapFilter {
    name: String,
    input: ChannelId,
    tcdm: ChannelId,
    per: ChannelId,
    regions: Vec<AddrRegion>,
    nb_interleaved: usize,
    state: MemmapState,
    id_q: u64,
    user_q: u64,
    checks: [LatencyCheck; 2],
}

impl MemmapFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        tcdm: ChannelId,
        per: ChannelId,
        regions: Vec<AddrRegion>,
        nb_interleaved: usize,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        check_same_size(fabric, &name, input, tcdm)?;
        check_same_size(fabric, &name, input, per)?;
        if nb_interleaved > regions.len() {
            return Err(ConfigError::Invalid {
                component: name,
                detail: format!("{nb_interleaved} interleaved regions out of {}", regions.len()),
            });
        }
        if let Some(r) = regions.iter().find(|r| r.start >= r.end) {
            return Err(ConfigError::Invalid {
                component: name,
                detail: format!("empty region {:#x}..{:#x}", r.start, r.end),
            });
        }
        Ok(Self {
            name,
            input,
            tcdm,
            per,
            regions,
            nb_interleaved,
            state: MemmapState::Idle,
            id_q: 0,
            user_q: 0,
            checks: Default::default(),
        })
    }

    pub fn state(&self) -> MemmapState {
        self.state
    }

    /// Target state an access to `add` leads to.
    pub fn decode(&self, add: u64) -> MemmapState {
        match self.regions.iter().position(|r| r.contains(add)) {
            Some(i) if i < self.nb_interleaved => MemmapState::OnTcdm,
            Some(_) => MemmapState::OnPer,
            None => MemmapState::Error,
        }
    }
}

impl Component for MemmapFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![self.tcdm, self.per]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        vec![self.input]
    }

    fn eval(&self, wires: &mut Wires) {
        let p = *wires.params(self.input);
        let req = wires.request(self.input).clone();
        let target = self.decode(req.add);

        for (port, state) in [(self.tcdm, MemmapState::OnTcdm), (self.per, MemmapState::OnPer)] {
            let down = Request {
                req: req.req && target == state,
                ..req.clone()
            };
            wires.drive_request(port, down);
        }

        let mut up = match self.state {
            MemmapState::Idle => Response::idle(&p),
            MemmapState::OnTcdm => wires.response(self.tcdm).clone(),
            MemmapState::OnPer => wires.response(self.per).clone(),
            MemmapState::Error => Response {
                r_valid: true,
                r_opc: true,
                r_data: vec![FAULT_DATA; p.words()],
                r_id: self.id_q,
                r_user: self.user_q,
                ..Response::idle(&p)
            },
        };
        up.gnt = match target {
            MemmapState::OnTcdm => wires.response(self.tcdm).gnt,
            MemmapState::OnPer => wires.response(self.per).gnt,
            _ => req.req,
        };
        wires.drive_response(self.input, up);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        for (check, port) in self.checks.iter_mut().zip([self.tcdm, self.per]) {
            let (req, rsp) = (wires.request(port), wires.response(port));
            check.observe(&self.name, req.fire(rsp), req.wen, rsp.r_valid, diag);
        }

        let (req, rsp) = (wires.request(self.input), wires.response(self.input));
        let next = if req.fire(rsp) {
            self.decode(req.add)
        } else {
            MemmapState::Idle
        };
        if next == MemmapState::Error {
            tracing::warn!("{}: unmapped access at {:#x}", self.name, req.add);
            self.id_q = req.id;
            self.user_q = req.user;
        }
        if next != self.state {
            tracing::debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        }
        self.state = next;
    }

    fn clear(&mut self) {
        self.state = MemmapState::Idle;
        self.id_q = 0;
        self.user_q = 0;
        self.checks.iter_mut().for_each(LatencyCheck::clear);
    }
}
