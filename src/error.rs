use thiserror::Error;

/// Errors surfaced by the engine. Every variant is fatal to the run: there is
/// no local recovery, the engine tears down its runtime resources and returns
/// the error to the caller.
#[derive(Error, Debug)]
pub enum EpsilodError {
    /// Bad configuration: unknown partition string, heuristic/partition
    /// mismatch, unsupported dimensionality, unknown comm method.
    #[error("configuration error: {0}")]
    Config(String),

    /// A rank's block is smaller than the stencil radius along `axis`, so a
    /// halo would reach past the immediate neighbor. Raised on every rank
    /// after a global reduce.
    #[error("not enough data after partition, too many processes in topology axis {axis}")]
    PartitionTooFine { axis: usize },

    /// Propagated verbatim from the device runtime.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Propagated from the messaging layer. A disconnected peer shows up
    /// here, which is how a fatal error on one rank aborts the others.
    #[error("messaging error: {0}")]
    Messaging(String),

    /// From user-supplied init/output callbacks.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EpsilodError>;
