pub mod config;
pub mod error;
pub mod flow;
pub mod interface;
pub mod overrides;
pub mod packet;
pub mod units;

pub use config::{
    ExperimentConfig, FlowConfig, LinkConfig, ObservationWindow, PacingConfig, PortPolicy,
    ReportConfig, ScheduleConfig, TopologyConfig, TraceConfig, TransportConfig,
};
pub use error::{SimError, SimResult};
pub use flow::{FiveTuple, FlowId, FlowStats};
pub use interface::{AppId, ApplicationContainer, DeviceId, NodeId, SimulationEngine};
pub use overrides::ExperimentOverride;
pub use packet::{Packet, PacketKind, QuicHeader};
pub use units::{DataRate, SimTime};
