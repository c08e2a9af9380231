//! Error types for encode operations.

/// Errors raised by the encoder.
///
/// `Clone` because a single failed compilation is shared by every caller
/// awaiting the same program handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Requested format (or alias/channel mask) is not supported by the device.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A kernel failed to compile or link. Only affects that format.
    #[error("Shader compilation failed for {format}: {message}")]
    ShaderCompile { format: &'static str, message: String },

    /// Missing or non-positive dimensions, malformed pixel data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The kernel source collaborator could not provide a kernel.
    #[error("Kernel source not available: {0}")]
    KernelNotFound(String),

    /// The image loader failed to produce pixels for a URL/path source.
    #[error("Failed to load image: {0}")]
    ImageLoad(String),

    /// The device or context was lost.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Any other backend failure (allocation, mapping, readback).
    #[error("GPU backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EncodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unsupported_format() {
        let err = EncodeError::UnsupportedFormat("bc6h".to_string());
        assert_eq!(err.to_string(), "Unsupported format: bc6h");
    }

    #[test]
    fn test_display_shader_compile() {
        let err = EncodeError::ShaderCompile {
            format: "bc7-rgb",
            message: "unknown identifier".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Shader compilation failed for bc7-rgb: unknown identifier"
        );
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err = EncodeError::DeviceLost("reset".to_string());
        assert_eq!(err.clone(), err);
    }
}
