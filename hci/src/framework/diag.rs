//! Diagnostics collected while the fabric runs.
//!
//! Protocol violations are design bugs: they are reported (and by default
//! only logged as warnings), never corrected.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Rule broken by a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rule {
    /// Pending request payload changed.
    Rq3Stability,
    /// Pending request withdrawn.
    Rq4NoRetire,
    /// Pending response payload changed.
    Rsp3Stability,
    /// Pending response withdrawn.
    Rsp5NoRetire,
    /// A block relying on the fixed one-cycle grant to response latency saw
    /// a different timing.
    LatencyContract,
    /// Sub-words of one transaction were granted in different cycles.
    PartialGrant,
    /// A response arrived with nowhere to go.
    ResponseOverflow,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rule::Rq3Stability => "RQ-3 stability",
            Rule::Rq4NoRetire => "RQ-4 no-retire",
            Rule::Rsp3Stability => "RSP-3 stability",
            Rule::Rsp5NoRetire => "RSP-5 no-retire",
            Rule::LatencyContract => "latency contract",
            Rule::PartialGrant => "partial grant",
            Rule::ResponseOverflow => "response overflow",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub cycle: u64,
    /// Channel or component reporting the violation.
    pub source: String,
    pub rule: Rule,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: `{}`: {}: {}",
            self.cycle, self.source, self.rule, self.detail
        )
    }
}

/// How a violation affects the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Severity {
    /// Log and keep running.
    #[default]
    Warning,
    /// Log and fail the current step.
    Fatal,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    violations: Vec<Violation>,
    waivers: HashSet<(String, Rule)>,
    severity: Severity,
    cycle: u64,
    /// Index of the first violation not yet returned by [`Diagnostics::take_fatal`].
    checked: usize,
}

impl Diagnostics {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            ..Default::default()
        }
    }

    pub(crate) fn set_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn set_severity(&mut self, severity: Severity) {
        self.severity = severity;
    }

    /// Silence `rule` for `source` (a channel or component name).
    pub fn waive(&mut self, source: impl Into<String>, rule: Rule) {
        self.waivers.insert((source.into(), rule));
    }

    pub fn is_waived(&self, source: &str, rule: Rule) -> bool {
        self.waivers.contains(&(source.to_string(), rule))
    }

    pub fn report(&mut self, source: &str, rule: Rule, detail: impl Into<String>) {
        if self.is_waived(source, rule) {
            return;
        }
        let v = Violation {
            cycle: self.cycle,
            source: source.to_string(),
            rule,
            detail: detail.into(),
        };
        tracing::warn!("{}", v);
        self.violations.push(v);
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn count(&self, rule: Rule) -> usize {
        self.violations.iter().filter(|v| v.rule == rule).count()
    }

    /// First violation reported since the previous call, if the severity
    /// makes violations fatal.
    pub(crate) fn take_fatal(&mut self) -> Option<Violation> {
        let fresh = self.violations.get(self.checked).cloned();
        self.checked = self.violations.len();
        match self.severity {
            Severity::Fatal => fresh,
            Severity::Warning => None,
        }
    }
}

/// Checks the fixed one-cycle latency assumption at a boundary:
/// a granted read at cycle t must be answered at t + 1, and a cycle without
/// grant must not be followed by a response. Granted writes leave the next
/// cycle unconstrained.
#[derive(Debug, Clone, Default)]
pub struct LatencyCheck {
    expect: Option<bool>,
}

impl LatencyCheck {
    /// Feed the downstream handshake seen at the current clock edge.
    pub fn observe(
        &mut self,
        source: &str,
        granted: bool,
        wen: bool,
        r_valid: bool,
        diag: &mut Diagnostics,
    ) {
        match self.expect {
            Some(true) if !r_valid => {
                diag.report(source, Rule::LatencyContract, "granted read not answered after one cycle")
            }
            Some(false) if r_valid => {
                diag.report(source, Rule::LatencyContract, "response without a grant in the previous cycle")
            }
            _ => {}
        }
        self.expect = match (granted, wen) {
            (true, true) => Some(true),
            (true, false) => None,
            (false, _) => Some(false),
        };
    }

    pub fn clear(&mut self) {
        self.expect = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiver_and_fatal() {
        let mut d = Diagnostics::new(Severity::Fatal);
        d.waive("a", Rule::Rq4NoRetire);
        d.report("a", Rule::Rq4NoRetire, "dropped");
        assert!(d.violations().is_empty());
        d.report("a", Rule::Rq3Stability, "changed");
        assert_eq!(d.take_fatal().map(|v| v.rule), Some(Rule::Rq3Stability));
        assert_eq!(d.take_fatal(), None);
    }

    #[test]
    fn test_latency_check() {
        let mut d = Diagnostics::default();
        let mut c = LatencyCheck::default();
        c.observe("x", true, true, false, &mut d);
        c.observe("x", false, false, true, &mut d); // answered: ok
        c.observe("x", true, false, false, &mut d); // write: unconstrained next
        c.observe("x", false, false, true, &mut d); // write ack: ok
        assert!(d.violations().is_empty());
        c.observe("x", false, false, true, &mut d);
        c.observe("x", true, true, false, &mut d);
        c.observe("x", false, false, false, &mut d);
        assert_eq!(d.count(Rule::LatencyContract), 2);
    }
}
