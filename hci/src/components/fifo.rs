use std::collections::VecDeque;

use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Rule, Wires},
    utils::is_pow2,
};

use super::check_same_size;

/// Elastic buffer between an upstream and a downstream channel, with one
/// queue per direction and a one-entry skid register on the response side.
pub struct Fifo {
    name: String,
    input: ChannelId,
    output: ChannelId,
    depth: usize,
    outgoing: VecDeque<Request>,
    incoming: VecDeque<Response>,
    skid: Option<Response>,
    /// A request was granted downstream at the last edge, so a response
    /// may arrive this cycle.
    grant_q: bool,
}

impl Fifo {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        output: ChannelId,
        depth: usize,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if depth < 2 || !is_pow2(depth) {
            return Err(ConfigError::FifoDepth {
                component: name,
                depth,
            });
        }
        check_same_size(fabric, &name, input, output)?;
        Ok(Self {
            name,
            input,
            output,
            depth,
            outgoing: VecDeque::with_capacity(depth),
            incoming: VecDeque::with_capacity(depth),
            skid: None,
            grant_q: false,
        })
    }

    /// Free response slots, the skid register included.
    fn free(&self) -> usize {
        (self.depth - self.incoming.len()).saturating_sub(usize::from(self.skid.is_some()))
    }

    pub fn occupancy(&self) -> (usize, usize) {
        (self.outgoing.len(), self.incoming.len() + usize::from(self.skid.is_some()))
    }
}

impl Component for Fifo {
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
        let p = *wires.params(self.input);
        let up_ready = wires.request(self.input).r_ready;

        // a response may be on its way that the consumer will not take.
        // This can withdraw a pending request, which the monitor reports.
        let withhold = self.free() == 0 || (self.free() == 1 && self.grant_q && !up_ready);
        let mut down = match self.outgoing.front() {
            Some(head) => Request {
                req: !withhold,
                ..head.clone()
            },
            None => Request::idle(&p),
        };
        down.r_ready = self.skid.is_none();
        wires.drive_request(self.output, down);

        let mut up = match self.incoming.front() {
            Some(head) => head.clone(),
            None => Response::idle(&p),
        };
        up.gnt = self.outgoing.len() < self.depth;
        wires.drive_response(self.input, up);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let (in_req, in_rsp) = (wires.request(self.input), wires.response(self.input));
        let (out_req, out_rsp) = (wires.request(self.output), wires.response(self.output));

        if out_req.fire(out_rsp) {
            self.outgoing.pop_front();
        }
        if in_req.fire(in_rsp) {
            self.outgoing.push_back(Request {
                req: true,
                ..in_req.clone()
            });
        }

        if in_rsp.accepted(in_req) {
            self.incoming.pop_front();
        }
        if self.incoming.len() < self.depth {
            if let Some(rsp) = self.skid.take() {
                self.incoming.push_back(rsp);
            }
        }
        if out_rsp.accepted(out_req) {
            let rsp = Response {
                gnt: false,
                r_valid: true,
                ..out_rsp.clone()
            };
            if self.incoming.len() < self.depth {
                self.incoming.push_back(rsp);
            } else if self.skid.is_none() {
                self.skid = Some(rsp);
            } else {
                tracing::error!("{}: response dropped", self.name);
                diag.report(&self.name, Rule::ResponseOverflow, "response queue and skid register full");
            }
        }
        self.grant_q = out_req.fire(out_rsp);
    }

    fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        self.skid = None;
        self.grant_q = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{initial_word, GrantPolicy, Initiator, MemoryBank, Transaction},
        params::SizeParams,
    };

    fn setup(depth: usize, mem: impl FnOnce(ChannelId) -> MemoryBank) -> (Fabric, ChannelId, ChannelId) {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let a = fabric.channel("a", p).unwrap();
        let b = fabric.channel("b", p).unwrap();
        fabric.add(Fifo::new(&fabric, "fifo", a, b, depth).unwrap()).unwrap();
        fabric.add(mem(b)).unwrap();
        (fabric, a, b)
    }

    #[test]
    fn test_depth_validation() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let a = fabric.channel("a", p).unwrap();
        let b = fabric.channel("b", p).unwrap();
        let c = fabric.channel("c", p.with_dw(64)).unwrap();
        for depth in [0, 1, 3, 6] {
            assert!(matches!(
                Fifo::new(&fabric, "f", a, b, depth),
                Err(ConfigError::FifoDepth { .. })
            ));
        }
        assert!(matches!(
            Fifo::new(&fabric, "f", a, c, 4),
            Err(ConfigError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_stream_through() {
        let (mut fabric, a, _) = setup(4, |b| MemoryBank::new("mem", b));
        let mut ini = Initiator::new("ini", a);
        ini.extend((0..8).map(|i| Transaction::read(4 * i)));
        let ini = fabric.add(ini).unwrap();
        assert!(fabric.run_until(100, |f| f.get(ini).is_done()).unwrap());
        let data: Vec<u32> = fabric.get(ini).completions().iter().map(|c| c.r_data[0]).collect();
        assert_eq!(data, (0..8).map(initial_word).collect::<Vec<_>>());
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_backpressure_without_loss() {
        let (mut fabric, a, b) = setup(2, |b| {
            MemoryBank::new("mem", b).with_grant(GrantPolicy::Pattern(vec![true, false, true]))
        });
        let mut ini = Initiator::new("ini", a);
        ini.extend((0..6).map(|i| Transaction::read(4 * i)));
        ini.set_r_ready(false);
        let ini = fabric.add(ini).unwrap();
        fabric.waive(b, Rule::Rq4NoRetire);

        for _ in 0..20 {
            fabric.step().unwrap();
        }
        // the consumer stalls: the buffer fills up and stops issuing
        let fifo_full = !fabric.request(b).req;
        assert!(fifo_full);
        assert!(fabric.get(ini).completions().is_empty());

        fabric.get_mut(ini).set_r_ready(true);
        assert!(fabric.run_until(100, |f| f.get(ini).is_done()).unwrap());
        let data: Vec<u32> = fabric.get(ini).completions().iter().map(|c| c.r_data[0]).collect();
        assert_eq!(data, (0..6).map(initial_word).collect::<Vec<_>>());
        assert_eq!(fabric.diagnostics().count(Rule::ResponseOverflow), 0);
    }
}
