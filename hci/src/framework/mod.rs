//! A general cycle-level simulator for request/response fabrics.
//!
//! During a cycle, values are propagated through the combinational logic of
//! every component until the wires settle. The clock edge then latches the
//! registered state of every component. Therefore two basic operations are
//! enough to simulate a fabric: [`Fabric::settle`] and [`Fabric::tick`].
pub mod diag;
mod monitor;
mod propagate;
mod record;

use std::{any::Any, fmt, marker::PhantomData};

use crate::{
    channel::{Channel, Request, Response},
    error::{ConfigError, SimError},
    params::{InterconnectCtrl, SizeParams},
};

pub use diag::{Diagnostics, LatencyCheck, Rule, Severity, Violation};
pub use monitor::ProtocolMonitor;
pub use propagate::{topo, PropOrder};
pub use record::{ChannelRecord, CycleRecord};

/// Index of a channel inside [`Wires`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Current value of every channel of a fabric.
#[derive(Debug, Default)]
pub struct Wires {
    pub(crate) channels: Vec<Channel>,
    ctrl: InterconnectCtrl,
    cycle: u64,
    /// Whether any drive changed a value since the flag was last cleared.
    changed: bool,
}

impl Wires {
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub fn request(&self, id: ChannelId) -> &Request {
        &self.channels[id.0].request
    }

    pub fn response(&self, id: ChannelId) -> &Response {
        &self.channels[id.0].response
    }

    pub fn params(&self, id: ChannelId) -> &SizeParams {
        &self.channels[id.0].params
    }

    pub fn name(&self, id: ChannelId) -> &str {
        &self.channels[id.0].name
    }

    pub fn ctrl(&self) -> InterconnectCtrl {
        self.ctrl
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Write the initiator-owned half of a channel. Handshake ECC shadows
    /// are derived from the handshake bits.
    pub fn drive_request(&mut self, id: ChannelId, mut value: Request) {
        let ch = &mut self.channels[id.0];
        value.seal(ch.params.ehw);
        if ch.request != value {
            ch.request = value;
            self.changed = true;
        }
    }

    /// Write the target-owned half of a channel.
    pub fn drive_response(&mut self, id: ChannelId, mut value: Response) {
        let ch = &mut self.channels[id.0];
        value.seal(ch.params.ehw);
        if ch.response != value {
            ch.response = value;
            self.changed = true;
        }
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A clocked block attached to channels.
///
/// `eval` must be a pure function of the wires and the registered state:
/// it may be called any number of times per cycle.
pub trait Component: AsAny {
    fn name(&self) -> &str;
    /// Channels whose request half this component drives.
    fn initiator_ports(&self) -> Vec<ChannelId>;
    /// Channels whose response half this component drives.
    fn target_ports(&self) -> Vec<ChannelId>;
    /// Combinational logic.
    fn eval(&self, wires: &mut Wires);
    /// Clock edge.
    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics);
    /// Synchronous clear: back to the reset state.
    fn clear(&mut self);
}

/// Typed reference to a component owned by a [`Fabric`].
pub struct Handle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

/// Channels, components and the checks running on them.
pub struct Fabric {
    wires: Wires,
    components: Vec<Box<dyn Component>>,
    request_driver: Vec<Option<usize>>,
    response_driver: Vec<Option<usize>>,
    order: Option<PropOrder>,
    monitor: ProtocolMonitor,
    diag: Diagnostics,
    clear: bool,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            wires: Wires::default(),
            components: Vec::new(),
            request_driver: Vec::new(),
            response_driver: Vec::new(),
            order: None,
            monitor: ProtocolMonitor::default(),
            diag: Diagnostics::default(),
            clear: false,
        }
    }

    /// Create a channel. Both halves start idle.
    pub fn channel(
        &mut self,
        name: impl Into<String>,
        params: SizeParams,
    ) -> Result<ChannelId, ConfigError> {
        params.validate()?;
        let id = ChannelId(self.wires.channels.len());
        self.wires.channels.push(Channel::new(name, params));
        self.request_driver.push(None);
        self.response_driver.push(None);
        Ok(id)
    }

    /// Create `n` channels named `prefix[i]`.
    pub fn channels(
        &mut self,
        prefix: &str,
        n: usize,
        params: SizeParams,
    ) -> Result<Vec<ChannelId>, ConfigError> {
        (0..n)
            .map(|i| self.channel(format!("{prefix}[{i}]"), params))
            .collect()
    }

    pub fn wires(&self) -> &Wires {
        &self.wires
    }

    pub fn params(&self, id: ChannelId) -> &SizeParams {
        self.wires.params(id)
    }

    pub fn request(&self, id: ChannelId) -> &Request {
        self.wires.request(id)
    }

    pub fn response(&self, id: ChannelId) -> &Response {
        self.wires.response(id)
    }

    pub fn cycle(&self) -> u64 {
        self.wires.cycle
    }

    /// Attach a component. Every channel half may have a single driver.
    pub fn add<T: Component + 'static>(&mut self, component: T) -> Result<Handle<T>, ConfigError> {
        let index = self.components.len();
        for (ports, drivers, half) in [
            (component.initiator_ports(), &self.request_driver, "request"),
            (component.target_ports(), &self.response_driver, "response"),
        ] {
            for id in ports {
                if let Some(existing) = drivers[id.0] {
                    return Err(ConfigError::MultipleDrivers {
                        channel: self.wires.name(id).to_string(),
                        half,
                        existing: self.components[existing].name().to_string(),
                    });
                }
            }
        }
        for id in component.initiator_ports() {
            self.request_driver[id.0] = Some(index);
        }
        for id in component.target_ports() {
            self.response_driver[id.0] = Some(index);
        }
        tracing::debug!("attach `{}` as component {}", component.name(), index);
        self.components.push(Box::new(component));
        self.order = None;
        Ok(Handle {
            index,
            _marker: PhantomData,
        })
    }

    /// # Panics
    ///
    /// Panics if the handle was issued by another fabric.
    pub fn get<T: Component + 'static>(&self, handle: Handle<T>) -> &T {
        let c: &dyn Component = &*self.components[handle.index];
        match c.as_any().downcast_ref::<T>() {
            Some(c) => c,
            None => panic!("handle does not refer to a `{}`", std::any::type_name::<T>()),
        }
    }

    /// # Panics
    ///
    /// Panics if the handle was issued by another fabric.
    pub fn get_mut<T: Component + 'static>(&mut self, handle: Handle<T>) -> &mut T {
        let c: &mut dyn Component = &mut *self.components[handle.index];
        match c.as_any_mut().downcast_mut::<T>() {
            Some(c) => c,
            None => panic!("handle does not refer to a `{}`", std::any::type_name::<T>()),
        }
    }

    /// Drive the request half of a channel no component drives.
    pub fn drive_request(&mut self, id: ChannelId, value: Request) -> Result<(), ConfigError> {
        if let Some(existing) = self.request_driver[id.0] {
            return Err(ConfigError::MultipleDrivers {
                channel: self.wires.name(id).to_string(),
                half: "request",
                existing: self.components[existing].name().to_string(),
            });
        }
        self.wires.drive_request(id, value);
        Ok(())
    }

    /// Drive the response half of a channel no component drives.
    pub fn drive_response(&mut self, id: ChannelId, value: Response) -> Result<(), ConfigError> {
        if let Some(existing) = self.response_driver[id.0] {
            return Err(ConfigError::MultipleDrivers {
                channel: self.wires.name(id).to_string(),
                half: "response",
                existing: self.components[existing].name().to_string(),
            });
        }
        self.wires.drive_response(id, value);
        Ok(())
    }

    pub fn ctrl(&self) -> InterconnectCtrl {
        self.wires.ctrl
    }

    pub fn set_ctrl(&mut self, ctrl: InterconnectCtrl) {
        self.wires.ctrl = ctrl;
    }

    /// Assert (or release) the synchronous clear for the following edges.
    pub fn set_clear(&mut self, clear: bool) {
        self.clear = clear;
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn set_severity(&mut self, severity: Severity) {
        self.diag.set_severity(severity);
    }

    /// Silence one rule on one channel.
    pub fn waive(&mut self, id: ChannelId, rule: Rule) {
        let name = self.wires.name(id).to_string();
        self.diag.waive(name, rule);
    }

    fn build_order(&self) -> Result<PropOrder, ConfigError> {
        let edges: Vec<(usize, usize)> = self
            .request_driver
            .iter()
            .zip(&self.response_driver)
            .filter_map(|pair| match pair {
                (Some(a), Some(b)) if a != b => Some((*a, *b)),
                _ => None,
            })
            .collect();
        PropOrder::build(self.components.len(), &edges)
    }

    /// Propagate combinational values until no wire changes.
    pub fn settle(&mut self) -> Result<(), SimError> {
        let order = match &self.order {
            Some(order) => order.clone(),
            None => {
                let order = self.build_order()?;
                self.order = Some(order.clone());
                order
            }
        };
        let passes = 2 * self.components.len() + 8;
        for _ in 0..passes {
            self.wires.changed = false;
            for i in order.forward() {
                self.components[i].eval(&mut self.wires);
            }
            for i in order.backward() {
                self.components[i].eval(&mut self.wires);
            }
            if !self.wires.changed {
                return Ok(());
            }
        }
        Err(SimError::NoFixpoint { passes })
    }

    /// Clock edge: protocol checks, then the registered state of every
    /// component, then the cycle counter.
    pub fn tick(&mut self) -> Result<(), SimError> {
        self.diag.set_cycle(self.wires.cycle);
        if self.clear {
            for c in self.components.iter_mut() {
                c.clear();
            }
            self.monitor.reset();
        } else {
            self.monitor.check(&self.wires.channels, &mut self.diag);
            for c in self.components.iter_mut() {
                c.tick(&self.wires, &mut self.diag);
            }
        }
        self.wires.cycle += 1;
        match self.diag.take_fatal() {
            Some(v) => Err(SimError::ProtocolViolation(v)),
            None => Ok(()),
        }
    }

    pub fn step(&mut self) -> Result<(), SimError> {
        self.settle()?;
        self.tick()
    }

    /// Step until `done` holds on the settled wires or `max_cycles` edges
    /// passed. Returns whether `done` was reached.
    pub fn run_until(
        &mut self,
        max_cycles: u64,
        mut done: impl FnMut(&Fabric) -> bool,
    ) -> Result<bool, SimError> {
        for _ in 0..max_cycles {
            self.settle()?;
            if done(self) {
                return Ok(true);
            }
            self.tick()?;
        }
        self.settle()?;
        Ok(done(self))
    }

    /// Handshakes of every active channel in the current cycle.
    pub fn snapshot(&self) -> CycleRecord {
        CycleRecord::capture(self.wires.cycle, &self.wires.channels)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Grants everything and answers every request one cycle later with the
    /// address as data.
    pub(crate) struct Echo {
        pub port: ChannelId,
        pub pending: Option<Request>,
    }

    impl Component for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn initiator_ports(&self) -> Vec<ChannelId> {
            vec![]
        }
        fn target_ports(&self) -> Vec<ChannelId> {
            vec![self.port]
        }
        fn eval(&self, wires: &mut Wires) {
            let p = *wires.params(self.port);
            let mut rsp = Response::idle(&p);
            rsp.gnt = true;
            if let Some(req) = &self.pending {
                rsp.r_valid = true;
                rsp.r_data = vec![req.add as u32; p.words()];
                rsp.r_id = req.id;
            }
            wires.drive_response(self.port, rsp);
        }
        fn tick(&mut self, wires: &Wires, _diag: &mut Diagnostics) {
            let req = wires.request(self.port);
            self.pending = req.fire(wires.response(self.port)).then(|| req.clone());
        }
        fn clear(&mut self) {
            self.pending = None;
        }
    }

    #[test]
    fn test_step_and_handles() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let c = fabric.channel("c", p).unwrap();
        let h = fabric.add(Echo { port: c, pending: None }).unwrap();
        fabric.drive_request(c, Request::read(&p, 0x40)).unwrap();
        fabric.step().unwrap();
        fabric.drive_request(c, Request::idle(&p)).unwrap();
        fabric.settle().unwrap();
        assert!(fabric.response(c).r_valid);
        assert_eq!(fabric.response(c).r_data, vec![0x40]);
        assert!(fabric.get(h).pending.is_some());
        assert_eq!(fabric.cycle(), 1);

        fabric.set_clear(true);
        fabric.tick().unwrap();
        assert!(fabric.get(h).pending.is_none());
    }

    #[test]
    fn test_single_driver() {
        let mut fabric = Fabric::new();
        let c = fabric.channel("c", SizeParams::default()).unwrap();
        fabric.add(Echo { port: c, pending: None }).unwrap();
        let err = fabric.add(Echo { port: c, pending: None }).unwrap_err();
        assert!(matches!(err, ConfigError::MultipleDrivers { half: "response", .. }));
        assert!(fabric
            .drive_response(c, Response::idle(&SizeParams::default()))
            .is_err());
    }

    #[test]
    fn test_fatal_violation_fails_step() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let c = fabric.channel("c", p).unwrap();
        fabric.set_severity(Severity::Fatal);
        fabric.drive_request(c, Request::read(&p, 0)).unwrap();
        fabric.step().unwrap();
        fabric.drive_request(c, Request::idle(&p)).unwrap();
        let err = fabric.step().unwrap_err();
        assert!(matches!(err, SimError::ProtocolViolation(v) if v.rule == Rule::Rq4NoRetire));
    }

    #[test]
    fn test_waiver() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let c = fabric.channel("c", p).unwrap();
        fabric.waive(c, Rule::Rq3Stability);
        fabric.drive_request(c, Request::read(&p, 0)).unwrap();
        fabric.step().unwrap();
        fabric.drive_request(c, Request::read(&p, 4)).unwrap();
        fabric.step().unwrap();
        assert!(fabric.diagnostics().violations().is_empty());
    }
}
