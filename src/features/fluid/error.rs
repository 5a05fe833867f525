use super::kernels::FluidKernel;

/// Failures surfaced by the fluid simulator and its devices.
///
/// Configuration problems are not errors: grid sizes are rounded and
/// below-tile grids dispatch nothing. Releasing is never an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FluidError {
    /// Device could not allocate a buffer or texture. Fatal to the instance.
    #[error("failed to allocate {resource} ({cells} cells)")]
    Allocation { resource: &'static str, cells: usize },

    /// `step` called with no buffers bound.
    #[error("fluid simulator stepped before initialization")]
    NotInitialized,

    /// `step` re-entered while a step was being issued.
    #[error("fluid step already in progress")]
    StepInProgress,

    /// A dispatch referenced a buffer or texture that was already released.
    #[error("{kernel:?} dispatched against a released {resource}")]
    StaleResource { kernel: FluidKernel, resource: &'static str },

    /// The output texture has not reached the device yet, or its size does
    /// not match the grid.
    #[error("fluid output texture unavailable")]
    TextureUnavailable,
}

impl FluidError {
    /// Whether the instance must be torn down. Only a missing texture is
    /// worth waiting on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FluidError::TextureUnavailable)
    }
}
