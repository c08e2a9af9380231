//! Kernel source loading
//!
//! Encode kernels are opaque text modules, one per format and backend, loaded
//! by file name. The only transformation applied here is the 16-bit float
//! patch for devices without `shader-f16`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use tracing::debug;

use crate::error::{EncodeError, Result};

/// Utility kernel module for the compute backend (mipmap, resize, flipy,
/// detect_channel_count).
pub const UTILS_KERNEL: &str = "utils.wgsl";

/// Supplies kernel source text by file name.
pub trait KernelSource: Send + Sync {
    fn load(&self, name: &str) -> BoxFuture<'static, Result<String>>;
}

/// Kernels read from a directory on disk.
#[derive(Debug, Clone)]
pub struct KernelDir {
    root: PathBuf,
}

impl KernelDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl KernelSource for KernelDir {
    fn load(&self, name: &str) -> BoxFuture<'static, Result<String>> {
        let path = self.root.join(name);
        async move {
            debug!("Loading kernel {}", path.display());
            // Plain file read so the future also completes outside a runtime
            std::fs::read_to_string(&path)
                .map_err(|e| EncodeError::KernelNotFound(format!("{}: {}", path.display(), e)))
        }
        .boxed()
    }
}

/// In-memory kernels, e.g. embedded with `include_str!`.
#[derive(Debug, Clone, Default)]
pub struct StaticKernels {
    sources: HashMap<String, Arc<str>>,
}

impl StaticKernels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<Arc<str>>) {
        self.sources.insert(name.into(), source.into());
    }
}

impl KernelSource for StaticKernels {
    fn load(&self, name: &str) -> BoxFuture<'static, Result<String>> {
        let result = self
            .sources
            .get(name)
            .map(|source| source.to_string())
            .ok_or_else(|| EncodeError::KernelNotFound(name.to_string()));
        futures::future::ready(result).boxed()
    }
}

struct HalfPatterns {
    enable: Regex,
    scalar: Regex,
    vector: Regex,
    matrix: Regex,
    literal: Regex,
}

fn half_patterns() -> &'static HalfPatterns {
    static PATTERNS: OnceLock<HalfPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HalfPatterns {
        enable: Regex::new(r"(?m)^enable f16;\s*").expect("valid regex"),
        scalar: Regex::new(r"\bf16\b").expect("valid regex"),
        vector: Regex::new(r"\bvec([234])h\b").expect("valid regex"),
        matrix: Regex::new(r"\bmat([234]x[234])h\b").expect("valid regex"),
        literal: Regex::new(r"\b(\d*\.\d+|\d+\.)h\b").expect("valid regex"),
    })
}

/// Rewrite a WGSL kernel that uses `f16` so it compiles without the
/// `shader-f16` feature: drop the `enable` directive and promote half types
/// and literals to 32-bit.
pub fn strip_f16(source: &str) -> Cow<'_, str> {
    if !source.contains("f16") {
        return Cow::Borrowed(source);
    }

    let p = half_patterns();
    let out = p.enable.replace_all(source, "");
    let out = p.scalar.replace_all(&out, "f32");
    let out = p.vector.replace_all(&out, "vec${1}f");
    let out = p.matrix.replace_all(&out, "mat${1}f");
    let out = p.literal.replace_all(&out, "${1}");
    Cow::Owned(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_f16() {
        let src = "enable f16;\nvar<private> a: f16 = 1.5h;\nlet v: vec3h = vec3h(0.h, 0.5h, 2.0h);\nlet m: mat2x2h;\n";
        let out = strip_f16(src);
        assert!(!out.contains("enable f16"));
        assert!(out.contains("var<private> a: f32 = 1.5;"));
        assert!(out.contains("let v: vec3f = vec3f(0., 0.5, 2.0);"));
        assert!(out.contains("let m: mat2x2f;"));
    }

    #[test]
    fn test_strip_f16_leaves_identifiers() {
        let src = "fn hash(x: u32) -> u32 { let f16x = x; return f16x; }";
        assert_eq!(strip_f16(src), src);
    }

    #[tokio::test]
    async fn test_static_kernels() {
        let kernels = StaticKernels::new().with("a.wgsl", "fn main() {}");
        assert_eq!(kernels.load("a.wgsl").await.unwrap(), "fn main() {}");
        let err = kernels.load("missing.wgsl").await.unwrap_err();
        assert!(matches!(err, EncodeError::KernelNotFound(_)));
    }

    #[tokio::test]
    async fn test_kernel_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("spark_bc1_rgb.wgsl"), "// bc1").unwrap();

        let kernels = KernelDir::new(dir.path());
        assert_eq!(kernels.load("spark_bc1_rgb.wgsl").await.unwrap(), "// bc1");
        assert!(matches!(
            kernels.load("spark_bc4_r.wgsl").await,
            Err(EncodeError::KernelNotFound(_))
        ));
    }
}
