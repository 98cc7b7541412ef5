//! Test bench: initiators and memories to drive a fabric, the stimuli
//! generator and the reference cluster.
mod cluster;
mod initiator;
mod memory;
mod stimuli;

pub use cluster::{Cluster, MasterReport, Mismatch, Report};
pub use initiator::{Completion, Initiator, Transaction};
pub use memory::{initial_word, BankLatency, GrantPolicy, MemoryBank, WriteResponse};
pub use stimuli::{AccessPattern, CycleOffset, StimuliGenerator};
