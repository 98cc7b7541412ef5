//! Cycle-to-cycle protocol checks shared by every channel.

use crate::channel::{Channel, Request, Response};

use super::diag::{Diagnostics, Rule};

/// Watches every channel at each clock edge for the stability and no-retire
/// rules of both halves.
#[derive(Debug, Default)]
pub struct ProtocolMonitor {
    /// Channel values at the previous edge.
    last: Vec<Option<(Request, Response)>>,
}

impl ProtocolMonitor {
    /// Compare the settled values of this cycle against the previous edge.
    pub fn check(&mut self, channels: &[Channel], diag: &mut Diagnostics) {
        self.last.resize(channels.len(), None);
        for (ch, last) in channels.iter().zip(self.last.iter_mut()) {
            let (req, rsp) = (&ch.request, &ch.response);
            if let Some((prev_req, prev_rsp)) = last {
                // a request left pending at the previous edge
                if prev_req.req && !prev_rsp.gnt {
                    if !req.req {
                        diag.report(&ch.name, Rule::Rq4NoRetire, "request withdrawn before grant");
                    } else {
                        let diff = prev_req.payload_diff(req);
                        if !diff.is_empty() {
                            diag.report(
                                &ch.name,
                                Rule::Rq3Stability,
                                format!("pending request changed: {}", diff.join(", ")),
                            );
                        }
                    }
                }
                // a response left pending at the previous edge
                if prev_rsp.r_valid && !prev_req.r_ready {
                    if !rsp.r_valid {
                        diag.report(&ch.name, Rule::Rsp5NoRetire, "response withdrawn before r_ready");
                    } else {
                        let diff = prev_rsp.payload_diff(rsp);
                        if !diff.is_empty() {
                            diag.report(
                                &ch.name,
                                Rule::Rsp3Stability,
                                format!("pending response changed: {}", diff.join(", ")),
                            );
                        }
                    }
                }
            }
            *last = Some((req.clone(), rsp.clone()));
        }
    }

    /// Forget the history, e.g. after a synchronous clear.
    pub fn reset(&mut self) {
        self.last.clear();
    }
}
