use crate::{
    channel::Response,
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Wires},
    params::LatencyModel,
};

use super::check_same_size;

/// Which response field a [`ResponseFilter`] restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// `r_id` from the granted `id`.
    Id,
    /// `r_user` from the granted `user`.
    User,
    /// `r_valid` from a granted load, for targets without a valid wire.
    Valid,
}

/// One-cycle shift register replaying a request field onto the response.
///
/// Must sit at a boundary where a granted read is answered exactly one
/// cycle later and writes are never answered, usually right in front of a
/// physical memory.
pub struct ResponseFilter {
    name: String,
    input: ChannelId,
    output: ChannelId,
    kind: FilterKind,
    gnt_q: bool,
    wen_q: bool,
    id_q: u64,
    user_q: u64,
    check: LatencyCheck,
}

impl ResponseFilter {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        output: ChannelId,
        kind: FilterKind,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        check_same_size(fabric, &name, input, output)?;
        Ok(Self {
            name,
            input,
            output,
            kind,
            gnt_q: false,
            wen_q: false,
            id_q: 0,
            user_q: 0,
            check: LatencyCheck::default(),
        })
    }
}

impl Component for ResponseFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![self.output]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        vec![self.input]
    }

    fn eval(&self, wires: &mut Wires) {
        let req = wires.request(self.input).clone();
        wires.drive_request(self.output, req);

        let rsp = wires.response(self.output);
        let rsp = match self.kind {
            FilterKind::Id => Response {
                r_id: self.id_q,
                ..rsp.clone()
            },
            FilterKind::User => Response {
                r_user: self.user_q,
                ..rsp.clone()
            },
            FilterKind::Valid => Response {
                r_valid: self.gnt_q && self.wen_q,
                ..rsp.clone()
            },
        };
        wires.drive_response(self.input, rsp);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let (req, rsp) = (wires.request(self.output), wires.response(self.output));
        let fire = req.fire(rsp);
        if self.kind != FilterKind::Valid {
            self.check.observe(&self.name, fire, req.wen, rsp.r_valid, diag);
        }
        self.gnt_q = fire;
        if fire {
            self.wen_q = req.wen;
            self.id_q = req.id;
            self.user_q = req.user;
        }
    }

    fn clear(&mut self) {
        self.gnt_q = false;
        self.wen_q = false;
        self.id_q = 0;
        self.user_q = 0;
        self.check.clear();
    }
}
