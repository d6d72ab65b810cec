// Initialization failure taxonomy.
//
// Every variant is fatal: the failing operation reports its diagnostic and
// the process exits with a non-zero code. Nothing is retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// No hardware-backed GPU is available. Software rasterizers are
    /// rejected; there is no fallback path.
    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    /// Shader source missing, unreadable, or rejected by the compiler.
    /// Carries the compiler diagnostics verbatim.
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Buffer, view, layout, or pipeline creation rejected by the driver.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
}
