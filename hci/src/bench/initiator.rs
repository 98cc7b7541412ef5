use std::collections::VecDeque;

use serde::Serialize;

use crate::{
    channel::Request,
    framework::{ChannelId, Component, Diagnostics, Rule, Wires},
};

/// One access issued by an [`Initiator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub add: u64,
    /// `true` = load.
    pub wen: bool,
    /// Store data, one entry per 32-bit word. Missing words are zero.
    pub data: Vec<u32>,
    /// Byte enables. Empty means all enabled.
    pub be: Vec<bool>,
    pub user: u64,
    pub id: u64,
    /// Cycles between the grant of the previous transaction and the issue
    /// of this one. `1` means back to back.
    pub delay: u64,
}

impl Transaction {
    pub fn read(add: u64) -> Self {
        Self {
            add,
            wen: true,
            data: vec![],
            be: vec![],
            user: 0,
            id: 0,
            delay: 1,
        }
    }

    pub fn write(add: u64, data: Vec<u32>) -> Self {
        Self {
            wen: false,
            data,
            ..Self::read(add)
        }
    }

    pub fn with_delay(self, delay: u64) -> Self {
        Self { delay, ..self }
    }

    pub fn with_id(self, id: u64) -> Self {
        Self { id, ..self }
    }

    pub fn with_user(self, user: u64) -> Self {
        Self { user, ..self }
    }

    pub fn with_be(self, be: Vec<bool>) -> Self {
        Self { be, ..self }
    }
}

/// Life of a transaction through the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub tx: Transaction,
    /// Cycle the request was first presented.
    pub issued: u64,
    pub granted: u64,
    /// `None` for stores that expect no response.
    pub responded: Option<u64>,
    pub r_data: Vec<u32>,
    pub r_id: u64,
    pub r_user: u64,
    pub r_opc: bool,
}

impl Completion {
    /// Cycles from issue to response (or to grant without response).
    pub fn latency(&self) -> u64 {
        self.responded.unwrap_or(self.granted) - self.issued
    }
}

/// Test bench initiator: plays a queue of transactions on one channel while
/// honouring the request rules, and matches responses in order.
pub struct Initiator {
    name: String,
    port: ChannelId,
    queue: VecDeque<Transaction>,
    /// Idle cycles left before the queue head is presented.
    wait: u64,
    presented_at: Option<u64>,
    outstanding: VecDeque<Completion>,
    completions: Vec<Completion>,
    r_ready: bool,
    write_response: bool,
    unexpected: usize,
}

impl Initiator {
    pub fn new(name: impl Into<String>, port: ChannelId) -> Self {
        Self {
            name: name.into(),
            port,
            queue: VecDeque::new(),
            wait: 0,
            presented_at: None,
            outstanding: VecDeque::new(),
            completions: Vec::new(),
            r_ready: true,
            write_response: false,
            unexpected: 0,
        }
    }

    /// Whether stores wait for a response (targets that acknowledge writes).
    pub fn with_write_response(self, write_response: bool) -> Self {
        Self {
            write_response,
            ..self
        }
    }

    pub fn push(&mut self, tx: Transaction) {
        if self.queue.is_empty() && self.presented_at.is_none() {
            self.wait = tx.delay.saturating_sub(1);
        }
        self.queue.push_back(tx);
    }

    pub fn extend(&mut self, txs: impl IntoIterator<Item = Transaction>) {
        for tx in txs {
            self.push(tx);
        }
    }

    pub fn set_r_ready(&mut self, r_ready: bool) {
        self.r_ready = r_ready;
    }

    pub fn port(&self) -> ChannelId {
        self.port
    }

    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Responses that matched no outstanding transaction.
    pub fn unexpected(&self) -> usize {
        self.unexpected
    }

    pub fn is_done(&self) -> bool {
        self.queue.is_empty() && self.outstanding.is_empty()
    }

    fn presenting(&self) -> Option<&Transaction> {
        (self.wait == 0).then(|| self.queue.front()).flatten()
    }
}

impl Component for Initiator {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiator_ports(&self) -> Vec<ChannelId> {
        vec![self.port]
    }

    fn target_ports(&self) -> Vec<ChannelId> {
        vec![]
    }

    fn eval(&self, wires: &mut Wires) {
        let p = *wires.params(self.port);
        let mut req = Request::idle(&p);
        req.r_ready = self.r_ready;
        if let Some(tx) = self.presenting() {
            req.req = true;
            req.add = tx.add;
            req.wen = tx.wen;
            req.user = tx.user;
            req.id = tx.id;
            req.data = tx.data.clone();
            req.data.resize(p.words(), 0);
            req.be = if tx.be.is_empty() {
                vec![true; p.strobes()]
            } else {
                tx.be.clone()
            };
            req.be.resize(p.strobes(), false);
        }
        wires.drive_request(self.port, req);
    }

    fn tick(&mut self, wires: &Wires, diag: &mut Diagnostics) {
        let cycle = wires.cycle();
        let (req, rsp) = (wires.request(self.port), wires.response(self.port));

        if req.req {
            let issued = *self.presented_at.get_or_insert(cycle);
            if req.fire(rsp) {
                if let Some(tx) = self.queue.pop_front() {
                    let done = Completion {
                        tx,
                        issued,
                        granted: cycle,
                        responded: None,
                        r_data: vec![],
                        r_id: 0,
                        r_user: 0,
                        r_opc: false,
                    };
                    if done.tx.wen || self.write_response {
                        self.outstanding.push_back(done);
                    } else {
                        self.completions.push(done);
                    }
                }
                self.presented_at = None;
                self.wait = self.queue.front().map_or(0, |tx| tx.delay.saturating_sub(1));
            }
        } else if self.wait > 0 {
            self.wait -= 1;
        }

        if rsp.accepted(req) {
            match self.outstanding.pop_front() {
                Some(mut done) => {
                    done.responded = Some(cycle);
                    done.r_data = rsp.r_data.clone();
                    done.r_id = rsp.r_id;
                    done.r_user = rsp.r_user;
                    done.r_opc = rsp.r_opc;
                    tracing::trace!("{}: {:#x} done after {} cycles", self.name, done.tx.add, done.latency());
                    self.completions.push(done);
                }
                None => {
                    self.unexpected += 1;
                    diag.report(&self.name, Rule::ResponseOverflow, "response without outstanding request");
                }
            }
        }
    }

    fn clear(&mut self) {
        self.presented_at = None;
        self.outstanding.clear();
    }
}
