mod app;
pub mod engine;
pub mod monitor;
pub mod trace;

pub use engine::Simulator;
pub use monitor::{FlowClassifier, FlowMonitor};
pub use trace::SimulationReport;
