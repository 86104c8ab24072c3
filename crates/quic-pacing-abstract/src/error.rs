use std::path::PathBuf;
use thiserror::Error;

use crate::flow::FlowId;
use crate::interface::{AppId, DeviceId, NodeId};

/// Failures reported by a simulation engine or by configuration checks.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flow {0} is not known to the classifier")]
    UnknownFlow(FlowId),

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("device {0} does not exist")]
    UnknownDevice(DeviceId),

    #[error("application {0} does not exist")]
    UnknownApp(AppId),
}

impl SimError {
    pub fn config(message: impl Into<String>) -> Self {
        SimError::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
