//! The request/response channel, the unit of composition of the fabric.
//!
//! A channel is split in two halves with disjoint owners:
//!
//! - [`Request`] is driven by the initiator: the request wires plus the
//!   response back-pressure `r_ready`.
//! - [`Response`] is driven by the target: the grant plus the response wires.
//!
//! Note the inverted write-enable polarity: `wen == true` is a load.

use crate::{params::SizeParams, utils::mask};

crate::define_bundle! {
    /// Initiator-owned half of a channel.
    Request {
        .handshake(
            req: bool,
            /// Whether the initiator can take a response this cycle. Legacy
            /// initiators keep it asserted.
            r_ready: bool,
            ereq: u64,
            r_eready: u64,
        )
        .payload(
            /// Byte address.
            add: u64,
            /// `true` = load, `false` = store.
            wen: bool,
            data: Vec<u32>,
            be: Vec<bool>,
            user: u64,
            id: u64,
            ecc: u64,
        )
    }

    /// Target-owned half of a channel.
    Response {
        .handshake(
            gnt: bool,
            r_valid: bool,
            egnt: u64,
            r_evalid: u64,
        )
        .payload(
            r_data: Vec<u32>,
            r_user: u64,
            r_id: u64,
            /// Operation error flag.
            r_opc: bool,
            r_ecc: u64,
        )
    }
}

/// Redundant encoding of one handshake wire: the bit replicated `ehw` times.
/// Without handshake ECC (`ehw == 0`) there are no shadow wires.
pub fn hsk_encode(bit: bool, ehw: usize) -> u64 {
    if bit {
        mask(ehw)
    } else {
        0
    }
}

impl Request {
    /// No request, ready for responses, payload zeroed to the channel size.
    pub fn idle(p: &SizeParams) -> Self {
        Self {
            r_ready: true,
            data: vec![0; p.words()],
            be: vec![false; p.strobes()],
            ..Default::default()
        }
    }

    /// A load of the full channel width.
    pub fn read(p: &SizeParams, add: u64) -> Self {
        Self {
            req: true,
            add,
            wen: true,
            be: vec![true; p.strobes()],
            ..Self::idle(p)
        }
    }

    /// A store of the full channel width.
    pub fn write(p: &SizeParams, add: u64, data: Vec<u32>) -> Self {
        debug_assert_eq!(data.len(), p.words());
        Self {
            req: true,
            add,
            wen: false,
            data,
            be: vec![true; p.strobes()],
            ..Self::idle(p)
        }
    }

    pub fn with_id(self, id: u64) -> Self {
        Self { id, ..self }
    }

    pub fn with_user(self, user: u64) -> Self {
        Self { user, ..self }
    }

    /// The same payload with `req` lowered.
    pub fn withdrawn(self) -> Self {
        Self { req: false, ..self }
    }

    /// Request and grant in the same cycle.
    pub fn fire(&self, rsp: &Response) -> bool {
        self.req && rsp.gnt
    }

    /// Recompute the handshake shadows from the handshake bits.
    pub(crate) fn seal(&mut self, ehw: usize) {
        self.ereq = hsk_encode(self.req, ehw);
        self.r_eready = hsk_encode(self.r_ready, ehw);
    }
}

impl Response {
    /// No grant, no response, payload zeroed to the channel size.
    pub fn idle(p: &SizeParams) -> Self {
        Self {
            r_data: vec![0; p.words()],
            ..Default::default()
        }
    }

    /// Response handshake in this cycle.
    pub fn accepted(&self, req: &Request) -> bool {
        self.r_valid && req.r_ready
    }

    /// The same payload without grant nor response.
    pub fn silenced(self) -> Self {
        Self {
            gnt: false,
            r_valid: false,
            ..self
        }
    }

    pub(crate) fn seal(&mut self, ehw: usize) {
        self.egnt = hsk_encode(self.gnt, ehw);
        self.r_evalid = hsk_encode(self.r_valid, ehw);
    }
}

/// A channel instance: its sizing and the current value of both halves.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub params: SizeParams,
    pub(crate) request: Request,
    pub(crate) response: Response,
}

impl Channel {
    pub fn new(name: impl Into<String>, params: SizeParams) -> Self {
        Self {
            name: name.into(),
            request: Request::idle(&params),
            response: Response::idle(&params),
            params,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}
