use crate::{
    channel::{Request, Response},
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, LatencyCheck, Rule, Wires},
    params::LatencyModel,
    utils::{clog2, is_pow2, mask},
};

use super::check_fan;

/// Response bookkeeping for the transaction granted at the last edge.
#[derive(Debug, Clone)]
struct Granted {
    banks: Vec<usize>,
    id: u64,
    user: u64,
}

/// Splits one wide channel of `k` words over `NB_OUT` word-interleaved
/// 32-bit bank channels, without arbitration.
///
/// Word `i` of a request at word address `a` goes to bank
/// `(a + i) mod NB_OUT`; slices that run past the last bank wrap around to
/// the next row. Every bank must answer one cycle after the grant: the
/// response is assembled from the banks registered at the grant.
pub struct Router {
    name: String,
    input: ChannelId,
    outputs: Vec<ChannelId>,
    granted: Option<Granted>,
    checks: Vec<LatencyCheck>,
}

impl Router {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        outputs: Vec<ChannelId>,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        latency.require_fixed(&name)?;
        let p = *fabric.params(input);
        let (k, nb) = (p.words(), outputs.len());
        check_fan(&name, is_pow2(nb), format!("{nb} banks is not a power of two"))?;
        check_fan(&name, k <= nb, format!("{k} words cannot spread over {nb} banks"))?;
        if p.aw > 32 {
            return Err(ConfigError::Invalid {
                component: name,
                detail: format!("address width {} does not fit 32 bits", p.aw),
            });
        }
        for &o in &outputs {
            let q = fabric.params(o);
            if q.dw != 32 || q.bw != p.bw {
                return Err(ConfigError::SizeMismatch {
                    component: name,
                    left: fabric.wires().name(input).to_string(),
                    right: fabric.wires().name(o).to_string(),
                    detail: "bank channels must be 32 bits wide with the same strobe size".into(),
                });
            }
        }
        Ok(Self {
            name,
            input,
            checks: vec![LatencyCheck::default(); nb],
            outputs,
            granted: None,
        })
    }

    /// Bank and bank-local byte address of every word of a request.
    pub fn map(&self, add: u64, words: usize) -> Vec<(usize, u64)> {
        let nb = self.outputs.len();
        let bits = clog2(nb);
        let offset = ((add >> 2) & mask(bits as usize)) as usize;
        let row = add >> (2 + bits);
        (0..words)
            .map(|i| {
                let bank = offset + i;
                if bank >= nb {
                    (bank - nb, (row + 1) << 2)
                } else {
                    (bank, row << 2)
                }
            })
            .collect()
    }
}

impl Component for Router {
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
        let spw = p.strobes_per_word();
        let req = wires.request(self.input).clone();
        let slices = self.map(req.add, p.words());

        let mut down: Vec<Request> = self
            .outputs
            .iter()
            .map(|&o| Request::idle(wires.params(o)))
            .collect();
        for (i, &(bank, add)) in slices.iter().enumerate() {
            down[bank] = Request {
                req: req.req,
                add,
                wen: req.wen,
                data: vec![req.data[i]],
                be: req.be[i * spw..(i + 1) * spw].to_vec(),
                user: req.user,
                id: req.id,
                ecc: req.ecc,
                r_ready: true,
                ..Default::default()
            };
        }
        for (&o, r) in self.outputs.iter().zip(down) {
            wires.drive_request(o, r);
        }

        let mut up = Response::idle(&p);
        up.gnt = wires.response(self.outputs[slices[0].0]).gnt;
        if let Some(g) = &self.granted {
            up.r_valid = true;
            up.r_id = g.id;
            up.r_user = g.user;
            for (i, &bank) in g.banks.iter().enumerate() {
                let bank_rsp = wires.response(self.outputs[bank]);
                up.r_data[i] = bank_rsp.r_data.first().copied().unwrap_or(0);
                up.r_opc |= bank_rsp.r_opc;
            }
        }
        wires.drive_response(self.input, up);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let (req, rsp) = (wires.request(self.input), wires.response(self.input));
        let slices = self.map(req.add, wires.params(self.input).words());

        if req.req {
            let grants: Vec<bool> = slices
                .iter()
                .map(|&(b, _)| wires.response(self.outputs[b]).gnt)
                .collect();
            if grants.iter().any(|&g| g != grants[0]) {
                diag.report(&self.name, Rule::PartialGrant, format!("bank grants {grants:?} for {:#x}", req.add));
            }
        }
        for (b, &o) in self.outputs.iter().enumerate() {
            let (breq, brsp) = (wires.request(o), wires.response(o));
            self.checks[b].observe(&self.name, breq.fire(brsp), breq.wen, brsp.r_valid, diag);
        }
        if rsp.r_valid && !req.r_ready {
            tracing::error!("{}: response to a stalled initiator is lost", self.name);
            diag.report(&self.name, Rule::ResponseOverflow, format!("response to {:#x} dropped", req.add));
        }

        self.granted = req.fire(rsp).then(|| Granted {
            banks: slices.iter().map(|&(b, _)| b).collect(),
            id: req.id,
            user: req.user,
        });
    }

    fn clear(&mut self) {
        self.granted = None;
        self.checks.iter_mut().for_each(LatencyCheck::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{initial_word, Initiator, MemoryBank, Transaction},
        params::SizeParams,
    };

    fn router_fabric(dw: usize, nb: usize) -> (Fabric, ChannelId, Vec<ChannelId>, Router) {
        let mut fabric = Fabric::new();
        let wide = fabric.channel("wide", SizeParams::default().with_dw(dw)).unwrap();
        let banks = fabric.channels("bank", nb, SizeParams::default()).unwrap();
        let router = Router::new(&fabric, "router", wide, banks.clone(), LatencyModel::FixedOneCycle).unwrap();
        (fabric, wide, banks, router)
    }

    #[test]
    fn test_wraparound_mapping() {
        let (_, _, _, router) = router_fabric(128, 8);
        // row 5, offset 6
        let add = (5 << 5) | (6 << 2);
        assert_eq!(
            router.map(add, 4),
            vec![(6, 5 << 2), (7, 5 << 2), (0, 6 << 2), (1, 6 << 2)]
        );
        assert_eq!(router.map(0, 4), vec![(0, 0), (1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn test_wide_read_write() {
        let (mut fabric, wide, banks, router) = router_fabric(128, 8);
        fabric.add(router).unwrap();
        let mems: Vec<_> = banks
            .iter()
            .enumerate()
            .map(|(b, &c)| fabric.add(MemoryBank::new(format!("mem{b}"), c).interleaved(b as u64, 8)).unwrap())
            .collect();
        let add = (5 << 5) | (6 << 2);
        let mut ini = Initiator::new("hwpe", wide).with_write_response(true);
        ini.push(Transaction::read(add));
        ini.push(Transaction::write(add, vec![1, 2, 3, 4]));
        ini.push(Transaction::read(add));
        let ini = fabric.add(ini).unwrap();
        assert!(fabric.run_until(20, |f| f.get(ini).is_done()).unwrap());

        let done = fabric.get(ini).completions();
        let first = add >> 2;
        assert_eq!(done[0].r_data, (first..first + 4).map(initial_word).collect::<Vec<_>>());
        assert_eq!(done[2].r_data, vec![1, 2, 3, 4]);
        assert_eq!(fabric.get(mems[0]).peek(6), 3);
        assert_eq!(fabric.get(mems[7]).peek(5), 2);
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_stalled_initiator_loses_response() {
        let (mut fabric, wide, banks, router) = router_fabric(64, 2);
        fabric.add(router).unwrap();
        for (b, &c) in banks.iter().enumerate() {
            fabric.add(MemoryBank::new(format!("mem{b}"), c).interleaved(b as u64, 2)).unwrap();
        }
        let mut ini = Initiator::new("hwpe", wide);
        ini.set_r_ready(false);
        ini.push(Transaction::read(0x10));
        let ini = fabric.add(ini).unwrap();
        for _ in 0..3 {
            fabric.step().unwrap();
        }
        assert_eq!(fabric.diagnostics().count(Rule::ResponseOverflow), 1);
        assert_eq!(fabric.get(ini).outstanding(), 1);
    }

    #[test]
    fn test_preconditions() {
        let mut fabric = Fabric::new();
        let wide = fabric.channel("wide", SizeParams::default().with_dw(256)).unwrap();
        let banks = fabric.channels("bank", 4, SizeParams::default()).unwrap();
        assert!(Router::new(&fabric, "r", wide, banks.clone(), LatencyModel::FixedOneCycle).is_err());
        let wide = fabric.channel("w64", SizeParams::default().with_dw(64).with_aw(40)).unwrap();
        assert!(Router::new(&fabric, "r", wide, banks, LatencyModel::FixedOneCycle).is_err());
    }
}
