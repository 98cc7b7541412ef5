//! Cluster description files.
//!
//! ```toml
//! [hci]
//! n_core = 8
//! n_hwpe = 1
//! hwpe_width = 4
//! n_banks = 8
//! tot_mem_size = 32
//!
//! [sim]
//! n_test = 100
//! max_cycle_offset_hwpe = 2
//! exact_offset = false
//! seed = 1
//!
//! [ctrl]
//! low_prio_max_stall = 4
//!
//! [[master]]
//! branch = "hwpe"
//! pattern = { kind = "linear", start = 0x100, stride0 = 4 }
//! ```
//!
//! Masters without a `[[master]]` entry use random accesses.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    bench::{AccessPattern, CycleOffset},
    params::InterconnectCtrl,
    utils::is_pow2,
};

/// Hardware parameters of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HciParams {
    /// Core ports on the logarithmic branch.
    pub n_core: usize,
    /// DMA ports on the logarithmic branch.
    pub n_dma: usize,
    /// External ports on the logarithmic branch.
    pub n_ext: usize,
    /// Accelerator ports on the wide branch.
    pub n_hwpe: usize,
    /// Words of one accelerator port.
    pub hwpe_width: usize,
    pub n_banks: usize,
    /// Total memory size in kB of 1000 bytes.
    pub tot_mem_size: u64,
    /// Width of a narrow port and of a bank, in bits.
    pub data_width: usize,
    /// Test-and-set address bit of the logarithmic branch. Memory addresses
    /// must stay below it.
    pub ts_bit: u32,
    /// Depth of the elastic buffer in front of every accelerator router.
    /// Zero means none.
    pub expfifo: usize,
    /// Logarithmic crossbar flavour. Only the word-interleaved one (0) is
    /// modelled.
    pub sel_lic: u8,
}

impl Default for HciParams {
    fn default() -> Self {
        Self {
            n_core: 8,
            n_dma: 0,
            n_ext: 0,
            n_hwpe: 0,
            hwpe_width: 4,
            n_banks: 8,
            tot_mem_size: 32,
            data_width: 32,
            ts_bit: 21,
            expfifo: 0,
            sel_lic: 0,
        }
    }
}

impl HciParams {
    pub fn n_log(&self) -> usize {
        self.n_core + self.n_dma + self.n_ext
    }

    pub fn n_master(&self) -> usize {
        self.n_log() + self.n_hwpe
    }

    pub fn mem_bytes(&self) -> u64 {
        self.tot_mem_size * 1000
    }

    /// Words of one bank.
    pub fn bank_words(&self) -> u64 {
        self.mem_bytes() / self.n_banks as u64 / 4
    }
}

/// Stimuli parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Transactions of every logarithmic master.
    pub n_test: usize,
    /// Largest number of cycles between two requests of a master.
    pub max_cycle_offset: u64,
    /// Same for the accelerator masters. Defaults to `max_cycle_offset`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycle_offset_hwpe: Option<u64>,
    /// Use the offsets as exact gaps instead of random upper bounds.
    pub exact_offset: bool,
    /// Transactions of an accelerator master relative to `n_test`.
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            n_test: 3,
            max_cycle_offset: 5,
            max_cycle_offset_hwpe: None,
            exact_offset: false,
            test_ratio: 1.0,
            seed: 0,
        }
    }
}

impl SimParams {
    pub fn n_test_hwpe(&self) -> usize {
        (self.n_test as f64 * self.test_ratio) as usize
    }

    pub fn cycle_offset(&self, branch: Branch) -> CycleOffset {
        let n = match branch {
            Branch::Log => self.max_cycle_offset,
            Branch::Hwpe => self.max_cycle_offset_hwpe.unwrap_or(self.max_cycle_offset),
        };
        if self.exact_offset {
            CycleOffset::Exact(n)
        } else {
            CycleOffset::Random { max: n }
        }
    }
}

/// Branch of the cluster a master belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Log,
    Hwpe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub branch: Branch,
    #[serde(default)]
    pub pattern: AccessPattern,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub hci: HciParams,
    pub sim: SimParams,
    pub ctrl: InterconnectCtrl,
    /// Access patterns, in master order within each branch.
    #[serde(rename = "master")]
    pub masters: Vec<MasterConfig>,
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read file `{}`", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid cluster file `{}`", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let hci = &self.hci;
        ensure!(hci.n_master() > 0, "the number of masters must be > 0");
        ensure!(hci.data_width == 32, "data width {} is not supported, banks are 32 bits", hci.data_width);
        ensure!(is_pow2(hci.n_banks), "the number of banks ({}) must be a power of two", hci.n_banks);
        ensure!(
            hci.mem_bytes() % (hci.n_banks as u64 * 4) == 0,
            "the number of words per bank is not an integer value"
        );
        ensure!(
            hci.mem_bytes() <= 1 << hci.ts_bit,
            "memory of {} bytes overlaps the test-and-set bit {}",
            hci.mem_bytes(),
            hci.ts_bit
        );
        ensure!(hci.sel_lic == 0, "crossbar flavour {} is not modelled", hci.sel_lic);
        if hci.n_hwpe > 0 {
            ensure!(
                hci.hwpe_width >= 1 && hci.hwpe_width <= hci.n_banks,
                "accelerator width {} must be in 1..={}",
                hci.hwpe_width,
                hci.n_banks
            );
        }
        ensure!(
            hci.expfifo == 0 || (hci.expfifo >= 2 && is_pow2(hci.expfifo)),
            "fifo depth {} must be zero or a power of two >= 2",
            hci.expfifo
        );
        ensure!(self.sim.max_cycle_offset >= 1, "the minimum cycle offset is 1");
        ensure!(
            self.sim.max_cycle_offset_hwpe.map_or(true, |n| n >= 1),
            "the minimum accelerator cycle offset is 1"
        );
        ensure!(self.sim.test_ratio >= 0.0, "negative test ratio");

        for (branch, n) in [(Branch::Log, hci.n_log()), (Branch::Hwpe, hci.n_hwpe)] {
            let given = self.masters.iter().filter(|m| m.branch == branch).count();
            ensure!(given <= n, "{given} {branch:?} patterns for {n} masters");
        }
        Ok(())
    }

    /// Access pattern of the `index`-th master of a branch.
    pub fn pattern(&self, branch: Branch, index: usize) -> AccessPattern {
        self.masters
            .iter()
            .filter(|m| m.branch == branch)
            .nth(index)
            .map(|m| m.pattern.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let config = ClusterConfig::parse(
            r#"
            [hci]
            n_core = 2
            n_hwpe = 1
            hwpe_width = 2
            n_banks = 4

            [sim]
            max_cycle_offset_hwpe = 2
            exact_offset = true

            [ctrl]
            low_prio_max_stall = 3

            [[master]]
            branch = "hwpe"
            pattern = { kind = "two_d", start = 64, stride0 = 2, len_d0 = 4, stride1 = 16 }
            "#,
        )
        .unwrap();
        assert_eq!(config.hci.n_log(), 2);
        assert_eq!(config.ctrl.low_prio_max_stall, 3);
        assert_eq!(config.sim.cycle_offset(Branch::Log), CycleOffset::Exact(5));
        assert_eq!(config.sim.cycle_offset(Branch::Hwpe), CycleOffset::Exact(2));
        assert_eq!(
            ClusterConfig::default().sim.cycle_offset(Branch::Hwpe),
            CycleOffset::Random { max: 5 }
        );
        assert_eq!(config.pattern(Branch::Log, 1), AccessPattern::Random);
        assert_eq!(
            config.pattern(Branch::Hwpe, 0),
            AccessPattern::TwoD {
                start: 64,
                stride0: 2,
                len_d0: 4,
                stride1: 16
            }
        );
    }

    #[test]
    fn test_validation() {
        let bad = [
            "[hci]\nn_core = 0",
            "[hci]\nn_banks = 6",
            "[hci]\ntot_mem_size = 33\nn_banks = 16",
            "[hci]\nn_hwpe = 1\nhwpe_width = 16",
            "[hci]\nexpfifo = 3",
            "[sim]\nmax_cycle_offset_hwpe = 0",
            "[[master]]\nbranch = \"hwpe\"",
        ];
        for content in bad {
            assert!(ClusterConfig::parse(content).is_err(), "{content}");
        }
        assert!(ClusterConfig::parse("").is_ok());
    }
}
