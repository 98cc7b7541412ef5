//! Sizing record and runtime control register shared by all components.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable channel sizing (`hci_size_parameter`). It is threaded through
/// the composition when channels are created and never recomputed while the
/// fabric runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeParams {
    /// Data width in bits. Must be a multiple of 32.
    pub dw: usize,
    /// Address width in bits.
    pub aw: usize,
    /// Bits covered by one byte-enable strobe.
    pub bw: usize,
    /// User field width.
    pub uw: usize,
    /// Transaction id width.
    pub iw: usize,
    /// Per-beat ECC width.
    pub ew: usize,
    /// Handshake ECC width, one copy per handshake wire.
    pub ehw: usize,
}

impl Default for SizeParams {
    fn default() -> Self {
        Self {
            dw: 32,
            aw: 32,
            bw: 8,
            uw: 0,
            iw: 0,
            ew: 0,
            ehw: 0,
        }
    }
}

impl SizeParams {
    /// Number of 32-bit data words.
    pub fn words(&self) -> usize {
        self.dw / 32
    }

    /// Number of byte-enable strobes.
    pub fn strobes(&self) -> usize {
        self.dw / self.bw
    }

    /// Number of strobes covering one 32-bit word.
    pub fn strobes_per_word(&self) -> usize {
        32 / self.bw
    }

    pub fn with_dw(self, dw: usize) -> Self {
        Self { dw, ..self }
    }

    pub fn with_aw(self, aw: usize) -> Self {
        Self { aw, ..self }
    }

    pub fn with_uw(self, uw: usize) -> Self {
        Self { uw, ..self }
    }

    pub fn with_iw(self, iw: usize) -> Self {
        Self { iw, ..self }
    }

    pub fn with_ew(self, ew: usize) -> Self {
        Self { ew, ..self }
    }

    pub fn with_ehw(self, ehw: usize) -> Self {
        Self { ehw, ..self }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |msg: String| Err(ConfigError::InvalidSize(msg));
        if self.dw == 0 || self.dw % 32 != 0 {
            return err(format!("DW = {} is not a positive multiple of 32", self.dw));
        }
        if self.bw == 0 || 32 % self.bw != 0 {
            return err(format!("BW = {} does not divide a 32-bit word", self.bw));
        }
        if self.aw == 0 || self.aw > 64 {
            return err(format!("AW = {} out of range 1..=64", self.aw));
        }
        for (name, w) in [("UW", self.uw), ("IW", self.iw), ("EW", self.ew), ("EHW", self.ehw)] {
            if w > 64 {
                return err(format!("{name} = {w} exceeds 64 bits"));
            }
        }
        Ok(())
    }
}

/// Runtime-configurable arbitration control (`hci_interconnect_ctrl`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterconnectCtrl {
    /// Legacy crossbar arbitration policy, 2 bits, forwarded opaquely.
    pub arb_policy: u8,
    /// Swap the high and low priority side of priority arbiters.
    pub invert_prio: bool,
    /// Contended decisions won by the high side before the low side gets one
    /// turn. Zero disables the anti-starvation mechanism.
    pub low_prio_max_stall: u8,
}

impl InterconnectCtrl {
    pub fn policy(&self) -> u8 {
        self.arb_policy & 0b11
    }
}

/// Response-latency contract offered by the target side of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyModel {
    /// A granted read is answered exactly one cycle later and nothing else
    /// produces a response (a zero-latency boundary next to memory).
    FixedOneCycle,
    /// Any latency, responses possibly reordered.
    Arbitrary,
}

impl LatencyModel {
    /// Reject boundaries that do not offer the fixed one-cycle latency.
    pub(crate) fn require_fixed(self, component: &str) -> Result<(), ConfigError> {
        match self {
            LatencyModel::FixedOneCycle => Ok(()),
            LatencyModel::Arbitrary => Err(ConfigError::LatencyContract {
                component: component.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(SizeParams::default().validate().is_ok());
        assert!(SizeParams::default().with_dw(48).validate().is_err());
        assert!(SizeParams::default().with_iw(65).validate().is_err());
        let p = SizeParams::default().with_dw(128);
        assert_eq!(p.words(), 4);
        assert_eq!(p.strobes(), 16);
        assert_eq!(p.strobes_per_word(), 4);
    }

    #[test]
    fn test_latency_contract() {
        assert!(LatencyModel::FixedOneCycle.require_fixed("mux").is_ok());
        assert_eq!(
            LatencyModel::Arbitrary.require_fixed("mux"),
            Err(ConfigError::LatencyContract {
                component: "mux".into()
            })
        );
    }
}
