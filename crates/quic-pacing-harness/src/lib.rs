pub mod capture;
pub mod experiment;
pub mod flows;
pub mod measurement;
pub mod schedule;
pub mod topology;

#[cfg(test)]
mod mock;

pub use experiment::{Experiment, ExperimentOutcome};
pub use flows::{FlowSet, FlowSpec};
pub use measurement::{FlowReport, format_rate, rate_mbps};
pub use topology::Topology;
