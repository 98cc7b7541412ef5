use crate::{
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Wires},
    params::LatencyModel,
};

use super::{Arbiter, WidthMode};

/// Per-bank merge of the wide accelerator side and the narrow logarithmic
/// side in front of the memory banks.
///
/// The accelerator side has the high priority (unless `invert_prio` is set)
/// and is forwarded atomically over all the banks it addresses; the
/// logarithmic side is arbitrated bank by bank. The low side gets one turn
/// after `low_prio_max_stall` contended decisions.
pub struct ShallowInterconnect {
    arbiter: Arbiter,
}

impl ShallowInterconnect {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        hwpe: Vec<ChannelId>,
        log: Vec<ChannelId>,
        banks: Vec<ChannelId>,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let arbiter = Arbiter::new(fabric, name, hwpe, log, banks, latency)?
            .with_modes(WidthMode::Wide, WidthMode::Banked);
        Ok(Self { arbiter })
    }

    pub fn stall(&self) -> u8 {
        self.arbiter.stall()
    }
}

impl Component for ShallowInterconnect {
    fn name(&self) -> &str {
        self.arbiter.name()
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        self.arbiter.initiator_ports()
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        self.arbiter.target_ports()
    }

    fn eval(&self, wires: &mut Wires) {
        self.arbiter.eval(wires)
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        self.arbiter.tick(wires, diag)
    }

    fn clear(&mut self) {
        self.arbiter.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{Initiator, MemoryBank, Transaction},
        params::{InterconnectCtrl, SizeParams},
    };

    #[test]
    fn test_hwpe_priority_and_swap() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let hwpe = fabric.channels("hwpe", 4, p).unwrap();
        let log = fabric.channels("log", 4, p).unwrap();
        let banks = fabric.channels("bank", 4, p).unwrap();
        let sh = ShallowInterconnect::new(&fabric, "shallow", hwpe.clone(), log.clone(), banks.clone(), LatencyModel::FixedOneCycle)
            .unwrap();
        let sh = fabric.add(sh).unwrap();
        for (b, &c) in banks.iter().enumerate() {
            fabric
                .add(MemoryBank::new(format!("mem{b}"), c).interleaved(b as u64, 4))
                .unwrap();
        }
        for b in [1, 2] {
            let mut ini = Initiator::new(format!("hwpe{b}"), hwpe[b]);
            ini.extend((0..20).map(|i| Transaction::read(4 * i)));
            fabric.add(ini).unwrap();
        }
        for b in [2, 3] {
            let mut ini = Initiator::new(format!("core{b}"), log[b]);
            ini.extend((0..20).map(|i| Transaction::read(4 * i)));
            fabric.add(ini).unwrap();
        }

        fabric.settle().unwrap();
        // bank 3 is free of accelerator traffic, bank 2 is contended
        assert!(fabric.response(hwpe[1]).gnt && fabric.response(hwpe[2]).gnt);
        assert!(fabric.response(log[3]).gnt);
        assert!(!fabric.response(log[2]).gnt);
        fabric.tick().unwrap();

        fabric.set_ctrl(InterconnectCtrl {
            invert_prio: true,
            ..Default::default()
        });
        fabric.settle().unwrap();
        assert!(fabric.response(log[2]).gnt && fabric.response(log[3]).gnt);
        // the accelerator stalls on every bank it needs
        assert!(!fabric.response(hwpe[1]).gnt && !fabric.response(hwpe[2]).gnt);
        assert_eq!(fabric.get(sh).stall(), 1);
    }
}
