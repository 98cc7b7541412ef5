use crate::{
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Wires},
};

use super::{check_fan, check_same_size};

/// N:1 multiplexer with an externally fixed selection. Unselected inputs
/// see neither grants nor responses.
pub struct StaticMux {
    name: String,
    inputs: Vec<ChannelId>,
    output: ChannelId,
    sel: usize,
}

impl StaticMux {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        inputs: Vec<ChannelId>,
        output: ChannelId,
        sel: usize,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_fan(&name, !inputs.is_empty(), "no input channel")?;
        check_fan(&name, sel < inputs.len(), format!("selection {sel} out of range"))?;
        for &i in &inputs {
            check_same_size(fabric, &name, i, output)?;
        }
        Ok(Self {
            name,
            inputs,
            output,
            sel,
        })
    }

    pub fn sel(&self) -> usize {
        self.sel
    }

    /// Change the selection. Meant for reconfiguration while the fabric is
    /// idle: switching with a transaction in flight misroutes its response.
    pub fn set_sel(&mut self, sel: usize) {
        if sel < self.inputs.len() {
            self.sel = sel;
        } else {
            tracing::warn!("{}: ignore out of range selection {}", self.name, sel);
        }
    }
}

impl Component for StaticMux {
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
        let sel = self.inputs[self.sel];
        wires.drive_request(self.output, wires.request(sel).clone());
        let rsp = wires.response(self.output).clone();
        for &i in &self.inputs {
            if i == sel {
                wires.drive_response(i, rsp.clone());
            } else {
                wires.drive_response(i, rsp.clone().silenced());
            }
        }
    }

    fn tick(&mut self, _wires: &Wires, _diag: &mut Diagnostics) {}

    fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{Request, Response},
        params::SizeParams,
    };

    #[test]
    fn test_selection() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let ins = fabric.channels("in", 3, p).unwrap();
        let out = fabric.channel("out", p).unwrap();
        let mux = fabric
            .add(StaticMux::new(&fabric, "mux", ins.clone(), out, 1).unwrap())
            .unwrap();
        for (i, &c) in ins.iter().enumerate() {
            fabric.drive_request(c, Request::read(&p, 0x100 * i as u64)).unwrap();
        }
        let mut rsp = Response::idle(&p);
        rsp.gnt = true;
        fabric.drive_response(out, rsp).unwrap();
        fabric.settle().unwrap();
        assert_eq!(fabric.request(out).add, 0x100);
        assert!(fabric.response(ins[1]).gnt);
        assert!(!fabric.response(ins[0]).gnt && !fabric.response(ins[2]).gnt);

        fabric.get_mut(mux).set_sel(2);
        fabric.get_mut(mux).set_sel(7);
        assert_eq!(fabric.get(mux).sel(), 2);
    }
}
