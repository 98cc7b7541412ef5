use serde::Serialize;

use crate::channel::Channel;

/// Handshake activity of one channel in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRecord {
    pub name: String,
    pub req: bool,
    pub gnt: bool,
    pub add: u64,
    pub wen: bool,
    pub id: u64,
    pub r_valid: bool,
    pub r_ready: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub r_opc: bool,
}

/// One line of a simulation trace.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    /// Channels with a request or a response in flight; idle ones are omitted.
    pub channels: Vec<ChannelRecord>,
}

impl CycleRecord {
    pub fn capture(cycle: u64, channels: &[Channel]) -> Self {
        let channels = channels
            .iter()
            .filter(|ch| ch.request.req || ch.response.r_valid)
            .map(|ch| ChannelRecord {
                name: ch.name.clone(),
                req: ch.request.req,
                gnt: ch.response.gnt,
                add: ch.request.add,
                wen: ch.request.wen,
                id: ch.request.id,
                r_valid: ch.response.r_valid,
                r_ready: ch.request.r_ready,
                r_opc: ch.response.r_opc,
            })
            .collect();
        Self { cycle, channels }
    }
}
