//! blockpress - GPU block-compression encoder
//!
//! Turns RGBA images or device textures into BC/ETC2/EAC/ASTC textures by
//! running per-format compute kernels on the GPU. Two backends share one
//! orchestrator: a WebGPU backend on wgpu and an immediate-mode GL backend
//! that drives a host-provided context.

pub mod backend;
pub mod capability;
pub mod channels;
pub mod encoder;
pub mod error;
pub mod format;
pub mod kernels;
pub mod layout;
pub mod options;
pub mod program_cache;
pub mod source;
pub mod state;

pub use capability::{CapabilitySet, CompressionFeature, FormatSelector};
pub use encoder::{CompressedTexture, Encoder};
pub use error::{EncodeError, Result};
pub use format::FormatId;
pub use options::{EncodeOptions, EncoderConfig, Preload, WrapMode};
pub use source::ImageSource;
