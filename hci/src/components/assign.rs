use crate::{
    error::ConfigError,
    framework::{ChannelId, Component, Diagnostics, Fabric, Wires},
};

/// Pure wiring between two channels. The output may be wider than the
/// input: extra data words and strobes are tied to zero and the response
/// data is truncated on the way back.
pub struct Assign {
    name: String,
    input: ChannelId,
    output: ChannelId,
}

impl Assign {
    pub fn new(
        fabric: &Fabric,
        name: impl Into<String>,
        input: ChannelId,
        output: ChannelId,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let (i, o) = (*fabric.params(input), *fabric.params(output));
        if o.dw < i.dw || i.with_dw(o.dw) != o {
            return Err(ConfigError::SizeMismatch {
                component: name,
                left: fabric.wires().name(input).to_string(),
                right: fabric.wires().name(output).to_string(),
                detail: "only the data width may grow across an assign".into(),
            });
        }
        Ok(Self {
            name,
            input,
            output,
        })
    }
}

impl Component for Assign {
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
        let (i, o) = (*wires.params(self.input), *wires.params(self.output));
        let mut req = wires.request(self.input).clone();
        req.data.resize(o.words(), 0);
        req.be.resize(o.strobes(), false);
        wires.drive_request(self.output, req);

        let mut rsp = wires.response(self.output).clone();
        rsp.r_data.truncate(i.words());
        wires.drive_response(self.input, rsp);
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
    fn test_identity() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default().with_iw(4).with_uw(2);
        let a = fabric.channel("a", p).unwrap();
        let b = fabric.channel("b", p).unwrap();
        let asg = Assign::new(&fabric, "asg", a, b).unwrap();
        fabric.add(asg).unwrap();

        let req = Request::write(&p, 0x1234, vec![0xdead_beef])
            .with_id(5)
            .with_user(3);
        let rsp = Response {
            gnt: true,
            r_valid: true,
            r_data: vec![0x55aa_55aa],
            r_id: 9,
            r_user: 1,
            r_opc: true,
            ..Response::idle(&p)
        };
        fabric.drive_request(a, req).unwrap();
        fabric.drive_response(b, rsp).unwrap();
        fabric.settle().unwrap();
        assert_eq!(fabric.request(a), fabric.request(b));
        assert_eq!(fabric.response(a), fabric.response(b));
    }

    #[test]
    fn test_width_expansion() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let a = fabric.channel("a", p).unwrap();
        let b = fabric.channel("b", p.with_dw(64)).unwrap();
        fabric.add(Assign::new(&fabric, "asg", a, b).unwrap()).unwrap();
        fabric.drive_request(a, Request::write(&p, 0, vec![7])).unwrap();
        fabric.settle().unwrap();
        assert_eq!(fabric.request(b).data, vec![7, 0]);
        assert_eq!(fabric.request(b).be, vec![true, true, true, true, false, false, false, false]);

        assert!(Assign::new(&fabric, "bad", b, a).is_err());
    }
}
