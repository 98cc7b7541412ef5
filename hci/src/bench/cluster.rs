//! The reference cluster: narrow masters through the logarithmic crossbar
//! and wide accelerator masters through routers and an arbiter tree, merged
//! per bank by the shallow interconnect in front of the memory banks.
//!
//! ```text
//! core/dma/ext ──> LogInterconnect ────────────────> log_bank[b] ──┐
//! hwpe[h] ─> (Fifo) ─> Router ─> ArbiterTree ─> hwpe_bank[b] ──────┤ Shallow ─> bank[b] ─> mem[b]
//! ```

use std::{fmt, io::Write};

use anyhow::{Context, Result};
use ansi_term::Colour::{Green, Red, Yellow};
use serde::Serialize;

use crate::{
    components::{
        ArbiterTree, Fifo, InterleavedCrossbar, LogInterconnect, Router, ShallowInterconnect, WidthMode,
    },
    config::{Branch, ClusterConfig},
    framework::{Fabric, Handle, Severity, Violation},
    params::{LatencyModel, SizeParams},
    utils::clog2,
};

use super::{initial_word, Completion, Initiator, MemoryBank, StimuliGenerator};

struct Master {
    name: String,
    branch: Branch,
    handle: Handle<Initiator>,
}

pub struct Cluster {
    fabric: Fabric,
    masters: Vec<Master>,
    banks: Vec<Handle<MemoryBank>>,
}

/// Per-master outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct MasterReport {
    pub name: String,
    pub branch: Branch,
    pub reads: usize,
    pub writes: usize,
    /// Transactions still queued or waiting for their response.
    pub unfinished: usize,
    /// Mean cycles from issue to response.
    pub mean_latency: f64,
}

/// A read that did not return the expected data, or a write whose data is
/// not in memory at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub master: String,
    pub add: u64,
    pub wen: bool,
    pub expected: Vec<u32>,
    pub got: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub cycles: u64,
    /// Every master ran out of transactions.
    pub drained: bool,
    pub masters: Vec<MasterReport>,
    pub mismatches: Vec<Mismatch>,
    pub violations: Vec<Violation>,
}

impl Cluster {
    pub fn build(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let hci = &config.hci;
        let sim = &config.sim;
        let n_banks = hci.n_banks;
        let n_test_hwpe = sim.n_test_hwpe();
        let total = hci.n_log() * sim.n_test + hci.n_hwpe * n_test_hwpe;
        let narrow = SizeParams::default().with_iw((clog2(total) as usize).max(1));
        let wide = narrow.with_dw(32 * hci.hwpe_width);

        let mut fabric = Fabric::new();
        fabric.set_ctrl(config.ctrl);

        let log_bank = fabric.channels("log_bank", n_banks, narrow)?;
        let hwpe_bank = fabric.channels("hwpe_bank", n_banks, narrow)?;
        let bank = fabric.channels("bank", n_banks, narrow)?;

        let log_ports = fabric.channels("log", hci.n_log(), narrow)?;
        if !log_ports.is_empty() {
            let xbar = InterleavedCrossbar::new(log_ports.len(), n_banks);
            let lic = LogInterconnect::new(
                &fabric,
                "lic",
                log_ports.clone(),
                log_bank.clone(),
                xbar,
                LatencyModel::FixedOneCycle,
            )?;
            fabric.add(lic)?;
        }

        let mut hwpe_ports = vec![];
        let mut leaves = vec![];
        for h in 0..hci.n_hwpe {
            let port = fabric.channel(format!("hwpe[{h}]"), wide)?;
            let routed = if hci.expfifo > 0 {
                let buffered = fabric.channel(format!("hwpe_fifo[{h}]"), wide)?;
                let fifo = Fifo::new(&fabric, format!("hwpe{h}.fifo"), port, buffered, hci.expfifo)?;
                fabric.add(fifo)?;
                buffered
            } else {
                port
            };
            let leaf = fabric.channels(&format!("hwpe{h}.bank"), n_banks, narrow)?;
            let router = Router::new(&fabric, format!("hwpe{h}.router"), routed, leaf.clone(), LatencyModel::FixedOneCycle)?;
            fabric.add(router)?;
            hwpe_ports.push(port);
            leaves.push(leaf);
        }
        if !leaves.is_empty() {
            let tree = ArbiterTree::build(
                &mut fabric,
                "hwpe_tree",
                leaves,
                hwpe_bank.clone(),
                WidthMode::Wide,
                LatencyModel::FixedOneCycle,
            )?;
            tracing::debug!("accelerator tree of depth {}", tree.depth());
        }

        let shallow = ShallowInterconnect::new(&fabric, "shallow", hwpe_bank, log_bank, bank.clone(), LatencyModel::FixedOneCycle)?;
        fabric.add(shallow)?;
        let banks = bank
            .iter()
            .enumerate()
            .map(|(b, &c)| fabric.add(MemoryBank::new(format!("mem[{b}]"), c).interleaved(b as u64, n_banks as u64)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut gen = StimuliGenerator::new(sim.seed, hci.mem_bytes());
        let mut masters = vec![];
        let log_names = (0..hci.n_core)
            .map(|i| format!("core{i}"))
            .chain((0..hci.n_dma).map(|i| format!("dma{i}")))
            .chain((0..hci.n_ext).map(|i| format!("ext{i}")));
        for (i, (name, port)) in log_names.zip(log_ports).enumerate() {
            let txs = gen.generate(
                &name,
                &config.pattern(Branch::Log, i),
                sim.n_test,
                1,
                sim.cycle_offset(Branch::Log),
            );
            masters.push((name, Branch::Log, port, txs));
        }
        for (h, port) in hwpe_ports.into_iter().enumerate() {
            let name = format!("hwpe{h}");
            let txs = gen.generate(
                &name,
                &config.pattern(Branch::Hwpe, h),
                n_test_hwpe,
                hci.hwpe_width,
                sim.cycle_offset(Branch::Hwpe),
            );
            masters.push((name, Branch::Hwpe, port, txs));
        }
        let masters = masters
            .into_iter()
            .map(|(name, branch, port, txs)| {
                let mut ini = Initiator::new(name.clone(), port).with_write_response(true);
                ini.extend(txs);
                let handle = fabric.add(ini)?;
                Ok(Master { name, branch, handle })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            "cluster: {} masters, {} banks, {} transactions",
            masters.len(),
            n_banks,
            gen.ids()
        );

        Ok(Self {
            fabric,
            masters,
            banks,
        })
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn set_severity(&mut self, severity: Severity) {
        self.fabric.set_severity(severity);
    }

    fn drained(&self) -> bool {
        self.masters.iter().all(|m| self.fabric.get(m.handle).is_done())
    }

    /// Simulate until every master drained or `max_cycles` edges passed,
    /// then check the data seen by every master. With `trace`, one JSON
    /// line per cycle records the active channels.
    pub fn run<W: Write>(&mut self, max_cycles: u64, mut trace: Option<W>) -> Result<Report> {
        let drained = loop {
            self.fabric.settle()?;
            if let Some(out) = trace.as_mut() {
                serde_json::to_writer(&mut *out, &self.fabric.snapshot()).context("could not write trace")?;
                writeln!(out).context("could not write trace")?;
            }
            if self.drained() {
                break true;
            }
            if self.fabric.cycle() >= max_cycles {
                tracing::warn!("cycle limit {} reached", max_cycles);
                break false;
            }
            self.fabric
                .tick()
                .with_context(|| format!("simulation failed at cycle {}", self.fabric.cycle()))?;
        };
        if let Some(out) = trace.as_mut() {
            out.flush().context("could not write trace")?;
        }

        let masters = self.masters.iter().map(|m| self.master_report(m)).collect();
        let mismatches = self
            .masters
            .iter()
            .flat_map(|m| {
                let ini = self.fabric.get(m.handle);
                ini.completions()
                    .iter()
                    .filter_map(|c| self.check(&m.name, c))
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(Report {
            cycles: self.fabric.cycle(),
            drained,
            masters,
            mismatches,
            violations: self.fabric.diagnostics().violations().to_vec(),
        })
    }

    fn master_report(&self, m: &Master) -> MasterReport {
        let ini = self.fabric.get(m.handle);
        let done = ini.completions();
        let mean_latency = if done.is_empty() {
            0.0
        } else {
            done.iter().map(Completion::latency).sum::<u64>() as f64 / done.len() as f64
        };
        MasterReport {
            name: m.name.clone(),
            branch: m.branch,
            reads: done.iter().filter(|c| c.tx.wen).count(),
            writes: done.iter().filter(|c| !c.tx.wen).count(),
            unfinished: ini.pending() + ini.outstanding(),
            mean_latency,
        }
    }

    /// Reads see the initial content, writes land in the banks.
    fn check(&self, master: &str, c: &Completion) -> Option<Mismatch> {
        let n_banks = self.banks.len() as u64;
        let first = c.tx.add >> 2;
        let words = (first..).take(c.tx.data.len().max(c.r_data.len()));
        let (expected, got): (Vec<u32>, Vec<u32>) = if c.tx.wen {
            (words.map(initial_word).collect(), c.r_data.clone())
        } else {
            let got = words
                .map(|w| self.fabric.get(self.banks[(w % n_banks) as usize]).peek(w / n_banks))
                .collect();
            (c.tx.data.clone(), got)
        };
        (expected != got || c.r_opc).then(|| Mismatch {
            master: master.to_string(),
            add: c.tx.add,
            wen: c.tx.wen,
            expected,
            got,
        })
    }
}

impl Report {
    pub fn passed(&self) -> bool {
        self.drained && self.mismatches.is_empty()
    }

    /// Human readable summary, coloured for a terminal when `color` is set.
    pub fn render(&self, color: bool) -> String {
        Rendered { report: self, color }.to_string()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plain = Rendered {
            report: self,
            color: false,
        };
        fmt::Display::fmt(&plain, f)
    }
}

struct Rendered<'a> {
    report: &'a Report,
    color: bool,
}

impl Rendered<'_> {
    fn paint(&self, c: ansi_term::Colour, s: String) -> String {
        if self.color {
            c.bold().paint(s).to_string()
        } else {
            s
        }
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.report;
        writeln!(f, "{} cycles", r.cycles)?;
        writeln!(f, "{:<10} {:>6} {:>6} {:>10} {:>12}", "master", "reads", "writes", "unfinished", "mean latency")?;
        for m in &r.masters {
            writeln!(
                f,
                "{:<10} {:>6} {:>6} {:>10} {:>12.2}",
                m.name, m.reads, m.writes, m.unfinished, m.mean_latency
            )?;
        }
        for v in &r.violations {
            writeln!(f, "{}", self.paint(Yellow, format!("warning: {v}")))?;
        }
        for m in &r.mismatches {
            let line = format!(
                "{}: {} {:#x}: expected {:08x?}, got {:08x?}",
                m.master,
                if m.wen { "read" } else { "write" },
                m.add,
                m.expected,
                m.got
            );
            writeln!(f, "{}", self.paint(Red, line))?;
        }
        let verdict = match (r.drained, r.mismatches.len()) {
            (false, _) => self.paint(Red, "FAIL: masters did not drain".to_string()),
            (true, 0) => self.paint(Green, "PASS".to_string()),
            (true, n) => self.paint(Red, format!("FAIL: {n} mismatches")),
        };
        writeln!(f, "{verdict}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::AccessPattern;
    use crate::config::MasterConfig;

    fn small_config() -> ClusterConfig {
        let mut config = ClusterConfig::default();
        config.hci.n_core = 4;
        config.hci.n_hwpe = 2;
        config.hci.hwpe_width = 4;
        config.hci.n_banks = 8;
        config.hci.tot_mem_size = 4;
        config.sim.n_test = 20;
        config.sim.seed = 5;
        config.ctrl.low_prio_max_stall = 3;
        config
    }

    #[test]
    fn test_small_cluster_passes() {
        let mut cluster = Cluster::build(&small_config()).unwrap();
        let report = cluster.run(5_000, None::<std::fs::File>).unwrap();
        assert!(report.passed(), "{}", report.render(false));
        assert!(report.violations.is_empty(), "{}", report.render(false));
        assert_eq!(report.masters.len(), 6);
        for m in &report.masters {
            assert_eq!(m.reads + m.writes, 20, "{}", m.name);
        }
    }

    #[test]
    fn test_report_text() {
        let report = Report {
            cycles: 12,
            drained: true,
            masters: vec![],
            mismatches: vec![Mismatch {
                master: "core0".into(),
                add: 0x40,
                wen: true,
                expected: vec![1],
                got: vec![2],
            }],
            violations: vec![],
        };
        let text = report.to_string();
        assert_eq!(text, report.render(false));
        assert!(text.starts_with("12 cycles\n"));
        assert!(text.contains("core0: read 0x40: expected [00000001], got [00000002]"));
        assert!(text.ends_with("FAIL: 1 mismatches\n"));
        assert!(report.render(true).contains("\u{1b}["));
    }

    #[test]
    fn test_wide_masters_through_fifo() {
        let mut config = small_config();
        config.hci.n_core = 1;
        config.hci.n_hwpe = 3;
        config.hci.expfifo = 2;
        config.masters = (0..3)
            .map(|h| MasterConfig {
                branch: Branch::Hwpe,
                pattern: AccessPattern::Linear {
                    start: 0x200 * h,
                    stride0: 4,
                },
            })
            .collect();
        let mut cluster = Cluster::build(&config).unwrap();
        let mut trace = vec![];
        let report = cluster.run(5_000, Some(&mut trace)).unwrap();
        assert!(report.passed(), "{}", report.render(false));
        let lines = String::from_utf8(trace).unwrap();
        assert_eq!(lines.lines().count() as u64, report.cycles + 1);
        let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(first["cycle"], 0);
    }
}
