use thiserror::Error;

/// A result type for committee algorithms
pub type Result<T> = std::result::Result<T, CommitteeError>;

/// An error when building or evaluating a committee of GP experts
#[derive(Error, Debug)]
pub enum CommitteeError {
    /// When a Gaussian Process expert fails
    #[error("GP error: {0}")]
    GpError(#[from] distgp_gp::GpError),
    /// When a json document (cluster spec, saved model) cannot be (de)serialized
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// When a device is unknown or cannot be parsed
    #[error("Placement error: {0}")]
    PlacementError(String),
    /// When the cluster runtime cannot be built
    #[error("Cluster error: {0}")]
    ClusterError(String),
    /// When an operation is not available for a node
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// When reading or writing a file fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
