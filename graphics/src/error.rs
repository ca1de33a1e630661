//! Graphics error types.

use thiserror::Error;

use crate::graph::PassId;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// Failed to initialize a backend object required at startup.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// The surface is outdated and the swapchain must be recreated.
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated by the windowing layer.
    #[error("surface lost, needs recreation")]
    SurfaceLost,
    /// A per-frame resource is too small for the data submitted this frame.
    ///
    /// This is never recovered by truncation.
    #[error("{resource} exhausted: requested {requested}, capacity {capacity}")]
    ResourceExhausted {
        /// Which resource ran out.
        resource: &'static str,
        /// Number of elements the frame asked for.
        requested: usize,
        /// Number of elements preallocated.
        capacity: usize,
    },
    /// The swapchain kept reporting out-of-date after the configured number of recreations.
    #[error("swapchain still out of date after {0} recreation attempts")]
    SwapchainRecreationExhausted(u32),
}

/// Errors produced while scheduling the pass graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The derived pass graph contains a cycle.
    ///
    /// `remaining` lists the passes that could not be scheduled.
    #[error("render graph contains cyclic dependency between passes {remaining:?}")]
    CyclicDependency {
        /// Passes still holding a non-zero indegree when the sort stalled.
        remaining: Vec<PassId>,
    },
    /// A pass id that is not part of the graph was referenced.
    #[error("unknown pass {0:?}")]
    UnknownPass(PassId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no fence".to_string());
        assert_eq!(err.to_string(), "initialization failed: no fence");
    }

    #[test]
    fn test_exhausted_display() {
        let err = GraphicsError::ResourceExhausted {
            resource: "bone buffer",
            requested: 130,
            capacity: 128,
        };
        assert_eq!(
            err.to_string(),
            "bone buffer exhausted: requested 130, capacity 128"
        );
    }

    #[test]
    fn test_cycle_display() {
        let err = GraphError::CyclicDependency {
            remaining: vec![PassId(0), PassId(1)],
        };
        assert!(err.to_string().contains("cyclic dependency"));
    }
}
