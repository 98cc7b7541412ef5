use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Handle, Rule, Wires},
};

use super::{check_fan, Fifo};

/// Request side state: which sub-channels already took their part of the
/// current wide request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GrantState {
    NoGrant,
    Grant(Vec<bool>),
}

/// Splits one wide channel into `NB_OUT` equal narrower channels at the data
/// level: sub-channel `i` carries word slice `i` at `add + i * sub_bytes`,
/// with `wen`, `user`, `id` and `ecc` shared.
///
/// Sub-channels may be granted and answer at different cycles. The wide
/// request is granted once every part was taken, and the wide response is
/// presented only when all parts of it are valid, all consumed at once.
pub struct Split {
    name: String,
    input: ChannelId,
    outputs: Vec<ChannelId>,
    /// Sub-channels hold their responses until `r_ready` (buffered
    /// downstream). Otherwise responses are captured locally.
    buffered: bool,
    grant: GrantState,
    held: Vec<Option<Response>>,
}

impl Split {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        outputs: Vec<ChannelId>,
        buffered: bool,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let p = *fabric.params(input);
        let n = outputs.len();
        check_fan(&name, n > 0 && p.words() % n == 0, format!("{} words over {n} sub-channels", p.words()))?;
        let expect = p.with_dw(p.dw / n);
        for &o in &outputs {
            if *fabric.params(o) != expect {
                return Err(ConfigError::SizeMismatch {
                    component: name,
                    left: fabric.wires().name(input).to_string(),
                    right: fabric.wires().name(o).to_string(),
                    detail: format!("sub-channels must be {} bits wide", expect.dw),
                });
            }
        }
        Ok(Self {
            name,
            input,
            held: vec![None; n],
            outputs,
            buffered,
            grant: GrantState::NoGrant,
        })
    }

    /// Split with an elastic buffer of `fifo_depth` in front of every
    /// sub-channel. Without buffers the split captures early responses
    /// itself.
    pub fn build(
        fabric: &mut Fabric,
        name: &str,
        input: ChannelId,
        outputs: Vec<ChannelId>,
        fifo_depth: usize,
    ) -> Result<(Handle<Split>, Vec<Handle<Fifo>>), ConfigError> {
        if fifo_depth == 0 {
            let split = Split::new(fabric, name, input, outputs, false)?;
            return Ok((fabric.add(split)?, vec![]));
        }
        let mut subs = vec![];
        let mut fifos = vec![];
        for (i, &o) in outputs.iter().enumerate() {
            let sub = fabric.channel(format!("{name}.sub[{i}]"), *fabric.params(o))?;
            let fifo = Fifo::new(fabric, format!("{name}.fifo[{i}]"), sub, o, fifo_depth)?;
            fifos.push(fabric.add(fifo)?);
            subs.push(sub);
        }
        let split = Split::new(fabric, name, input, subs, true)?;
        Ok((fabric.add(split)?, fifos))
    }

    fn done(&self, i: usize) -> bool {
        match &self.grant {
            GrantState::NoGrant => false,
            GrantState::Grant(done) => done[i],
        }
    }

    fn valid(&self, wires: &Wires, i: usize) -> bool {
        self.held[i].is_some() || wires.response(self.outputs[i]).r_valid
    }

    fn part<'a>(&'a self, wires: &'a Wires, i: usize) -> &'a Response {
        self.held[i]
            .as_ref()
            .unwrap_or_else(|| wires.response(self.outputs[i]))
    }
}

impl Component for Split {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        self.outputs.clone()
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        vec![self.input]
    }

    fn eval(&self, wires: &mut Wires) {
        let p = *wires.params(self.input);
        let n = self.outputs.len();
        let sub = p.with_dw(p.dw / n);
        let (words, strobes) = (sub.words(), sub.strobes());
        let req = wires.request(self.input).clone();

        let all_valid = (0..n).all(|i| self.valid(wires, i));
        for (i, &o) in self.outputs.iter().enumerate() {
            let r_ready = if self.buffered {
                req.r_ready && all_valid
            } else {
                true
            };
            let part = Request {
                req: req.req && !self.done(i),
                add: req.add + (i * sub.dw / 8) as u64,
                data: req.data[i * words..(i + 1) * words].to_vec(),
                be: req.be[i * strobes..(i + 1) * strobes].to_vec(),
                r_ready,
                ..req.clone()
            };
            wires.drive_request(o, part);
        }

        let mut up = Response::idle(&p);
        up.gnt = req.req && (0..n).all(|i| self.done(i) || wires.response(self.outputs[i]).gnt);
        if all_valid {
            up.r_valid = true;
            let first = self.part(wires, 0);
            up.r_id = first.r_id;
            up.r_user = first.r_user;
            up.r_ecc = first.r_ecc;
            for i in 0..n {
                let part = self.part(wires, i);
                up.r_data[i * words..(i + 1) * words].copy_from_slice(&part.r_data);
                up.r_opc |= part.r_opc;
            }
        }
        wires.drive_response(self.input, up);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let n = self.outputs.len();
        let (req, rsp) = (wires.request(self.input), wires.response(self.input));

        self.grant = if req.fire(rsp) || !req.req {
            GrantState::NoGrant
        } else {
            let done: Vec<bool> = (0..n)
                .map(|i| {
                    let o = self.outputs[i];
                    self.done(i) || wires.request(o).fire(wires.response(o))
                })
                .collect();
            if done.iter().any(|&d| d) {
                tracing::debug!("{}: partial grant {:?}", self.name, done);
                GrantState::Grant(done)
            } else {
                GrantState::NoGrant
            }
        };

        if self.buffered {
            return;
        }
        if rsp.accepted(req) {
            self.held.fill(None);
            return;
        }
        for i in 0..n {
            let part = wires.response(self.outputs[i]);
            if !part.r_valid {
                continue;
            }
            if self.held[i].is_some() {
                diag.report(&self.name, Rule::ResponseOverflow, format!("second response on sub-channel {i}"));
            } else {
                self.held[i] = Some(part.clone());
            }
        }
    }

    fn clear(&mut self) {
        self.grant = GrantState::NoGrant;
        self.held.fill(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{initial_word, BankLatency, GrantPolicy, Initiator, MemoryBank, Transaction},
        params::SizeParams,
    };

    fn split_fabric(fifo_depth: usize, banks: [MemoryBank; 2]) -> (Fabric, ChannelId, Vec<ChannelId>, Handle<Split>) {
        let mut fabric = Fabric::new();
        let wide = fabric.channel("wide", SizeParams::default().with_dw(64)).unwrap();
        let narrow = fabric.channels("narrow", 2, SizeParams::default()).unwrap();
        let (split, _) = Split::build(&mut fabric, "split", wide, narrow.clone(), fifo_depth).unwrap();
        for mem in banks {
            fabric.add(mem).unwrap();
        }
        (fabric, wide, narrow, split)
    }

    #[test]
    fn test_response_atomicity() {
        // channels are numbered in creation order
        let narrow_ids = [ChannelId(1), ChannelId(2)];
        let banks = [
            MemoryBank::new("mem0", narrow_ids[0]).with_latency(BankLatency::Fixed(1)),
            MemoryBank::new("mem1", narrow_ids[1]).with_latency(BankLatency::Fixed(4)),
        ];
        let (mut fabric, wide, narrow, split) = split_fabric(2, banks);
        assert_eq!(narrow, narrow_ids);
        let subs = fabric.get(split).outputs.clone();
        let mut ini = Initiator::new("hwpe", wide);
        ini.push(Transaction::read(0));
        let ini = fabric.add(ini).unwrap();

        let mut first_valid = [None, None];
        let mut consumed = [None, None];
        let mut merged = None;
        for _ in 0..12 {
            fabric.settle().unwrap();
            let cycle = fabric.cycle();
            for i in 0..2 {
                if fabric.response(narrow[i]).r_valid && first_valid[i].is_none() {
                    first_valid[i] = Some(cycle);
                }
                if fabric.response(subs[i]).accepted(fabric.request(subs[i])) {
                    consumed[i] = Some(cycle);
                }
            }
            if fabric.response(wide).r_valid && merged.is_none() {
                merged = Some(cycle);
            }
            fabric.tick().unwrap();
        }
        let (t0, t1) = (first_valid[0].unwrap(), first_valid[1].unwrap());
        assert_eq!(t1, t0 + 3);
        assert!(merged.unwrap() > t1);
        assert_eq!(consumed, [merged, merged]);
        let done = fabric.get(ini).completions();
        assert_eq!(done[0].r_data, vec![initial_word(0), initial_word(1)]);
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_partial_grant_is_not_replayed() {
        let narrow_ids = [ChannelId(1), ChannelId(2)];
        let banks = [
            MemoryBank::new("mem0", narrow_ids[0]),
            MemoryBank::new("mem1", narrow_ids[1]).with_grant(GrantPolicy::Pattern(vec![false, false, true])),
        ];
        let (mut fabric, wide, narrow, split) = split_fabric(0, banks);
        assert_eq!(narrow, narrow_ids);
        let mut ini = Initiator::new("hwpe", wide);
        ini.push(Transaction::read(8));
        let ini = fabric.add(ini).unwrap();

        fabric.step().unwrap();
        assert_eq!(fabric.get(split).grant, GrantState::Grant(vec![true, false]));
        fabric.settle().unwrap();
        assert!(!fabric.request(narrow[0]).req);
        assert!(fabric.request(narrow[1]).req);

        assert!(fabric.run_until(10, |f| f.get(ini).is_done()).unwrap());
        let done = fabric.get(ini).completions();
        assert_eq!(done[0].granted, 2);
        assert_eq!(done[0].r_data, vec![initial_word(2), initial_word(3)]);
        assert!(fabric.diagnostics().violations().is_empty());
    }
}
