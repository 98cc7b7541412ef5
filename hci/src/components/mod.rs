//! The library of fabric elements. Every element is a [`Component`] attached
//! to channels created beforehand on a [`Fabric`]; constructors validate the
//! channel sizes and fail with a [`ConfigError`] on mismatch.
//!
//! [`Component`]: crate::framework::Component

mod arbiter;
mod arbiter_tree;
mod assign;
mod crossbar;
mod fifo;
mod filters;
mod memmap;
mod mixer;
mod mux_dynamic;
mod mux_ooo;
mod mux_static;
mod router;
mod shallow;
mod split;

pub use arbiter::{Arbiter, Side, WidthMode};
pub use arbiter_tree::ArbiterTree;
pub use assign::Assign;
pub use crossbar::{InterleavedCrossbar, LegacyCrossbar, LogInterconnect, XbarReq, XbarRsp};
pub use fifo::Fifo;
pub use filters::{FilterKind, ResponseFilter};
pub use memmap::{AddrRegion, MemmapFilter, MemmapState, FAULT_DATA};
pub use mixer::LoadStoreMixer;
pub use mux_dynamic::DynamicMux;
pub use mux_ooo::{OooMux, TagField};
pub use mux_static::StaticMux;
pub use router::Router;
pub use shallow::ShallowInterconnect;
pub use split::Split;

use crate::{
    error::ConfigError,
    framework::{ChannelId, Fabric},
};

/// Both channels must carry the same sizing.
pub(crate) fn check_same_size(
    fabric: &Fabric,
    component: &str,
    left: ChannelId,
    right: ChannelId,
) -> Result<(), ConfigError> {
    let (l, r) = (fabric.params(left), fabric.params(right));
    if l != r {
        return Err(ConfigError::SizeMismatch {
            component: component.to_string(),
            left: fabric.wires().name(left).to_string(),
            right: fabric.wires().name(right).to_string(),
            detail: format!("{l:?} != {r:?}"),
        });
    }
    Ok(())
}

pub(crate) fn check_fan(component: &str, ok: bool, detail: impl Into<String>) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::FanCount {
            component: component.to_string(),
            detail: detail.into(),
        })
    }
}

/// Round-robin winner-take-all: first requester at or after `start` in
/// rotated order. Without any requester the start position wins.
pub(crate) fn rr_winner(start: usize, requests: &[bool]) -> usize {
    let n = requests.len();
    (0..n)
        .map(|k| (start + k) % n)
        .find(|&k| requests[k])
        .unwrap_or(start % n.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr_winner() {
        assert_eq!(rr_winner(0, &[false, true, true]), 1);
        assert_eq!(rr_winner(2, &[true, true, false]), 0);
        assert_eq!(rr_winner(2, &[false, false, true]), 2);
        assert_eq!(rr_winner(1, &[false, false, false]), 1);
    }
}
