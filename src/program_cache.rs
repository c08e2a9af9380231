//! Deduplicated, lazily compiled encode programs
//!
//! One program per format, compiled at most once per device. The cache stores
//! the in-flight compilation itself (a shared future), inserted under the map
//! lock before any work starts, so concurrent callers for the same format all
//! await the same compilation. A resolved entry is never recompiled; a failed
//! one keeps returning its error to whoever awaits it without affecting other
//! formats.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::error::{EncodeError, Result};
use crate::format::FormatId;
use crate::kernels::{strip_f16, KernelSource};

/// Compiles kernel text into a backend program.
pub trait ProgramCompiler: Send + Sync + 'static {
    type Program: Send + Sync + 'static;

    /// Kernel file for a format, or `None` if this backend has no kernel for it.
    fn kernel_name(&self, format: FormatId) -> Option<&'static str>;

    /// Whether kernels must be rewritten to avoid 16-bit floats.
    fn needs_f16_patch(&self) -> bool {
        false
    }

    /// Whether compilation may run on another thread. Immediate-mode contexts
    /// are bound to their thread and return `false`.
    fn background_compile(&self) -> bool {
        true
    }

    fn compile_program(
        &self,
        format: FormatId,
        source: String,
    ) -> BoxFuture<'static, Result<Self::Program>>;
}

/// A compiled (or compiling) program, shareable between callers.
pub type ProgramHandle<P> = Shared<BoxFuture<'static, Result<Arc<P>>>>;

pub struct ProgramCache<C: ProgramCompiler> {
    compiler: Arc<C>,
    kernels: Arc<dyn KernelSource>,
    entries: Mutex<HashMap<FormatId, ProgramHandle<C::Program>>>,
}

impl<C: ProgramCompiler> ProgramCache<C> {
    pub fn new(compiler: Arc<C>, kernels: Arc<dyn KernelSource>) -> Self {
        Self {
            compiler,
            kernels,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for a format, starting its compilation on first request.
    pub fn handle(&self, format: FormatId) -> ProgramHandle<C::Program> {
        let mut entries = self.entries.lock().expect("program cache lock poisoned");
        entries
            .entry(format)
            .or_insert_with(|| self.compile(format))
            .clone()
    }

    /// Get the program for a format, compiling it if necessary.
    pub async fn get(&self, format: FormatId) -> Result<Arc<C::Program>> {
        self.handle(format).await
    }

    /// Whether a compilation has finished (successfully or not).
    pub fn is_resolved(&self, format: FormatId) -> bool {
        let entries = self.entries.lock().expect("program cache lock poisoned");
        entries
            .get(&format)
            .map(|handle| handle.peek().is_some())
            .unwrap_or(false)
    }

    /// Number of formats requested so far.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("program cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start compiling the given formats without waiting for them.
    ///
    /// Failures are logged, never returned; they stay in the cache and
    /// surface again to whoever later awaits that format.
    pub fn preload<I>(&self, formats: I)
    where
        I: IntoIterator<Item = FormatId>,
    {
        let runtime = tokio::runtime::Handle::try_current().ok();

        for format in formats {
            let handle = self.handle(format);
            if handle.peek().is_some() {
                continue;
            }

            match (&runtime, self.compiler.background_compile()) {
                (Some(runtime), true) => {
                    runtime.spawn(async move {
                        if let Err(e) = handle.await {
                            error!("Failed to preload program for {}: {}", format, e);
                        }
                    });
                }
                _ => {
                    // Drive the compilation as far as it goes on this thread;
                    // anything still pending resumes on first await.
                    if let Some(Err(e)) = handle.now_or_never() {
                        error!("Failed to preload program for {}: {}", format, e);
                    }
                }
            }
        }
    }

    fn compile(&self, format: FormatId) -> ProgramHandle<C::Program> {
        let compiler = Arc::clone(&self.compiler);
        let kernels = Arc::clone(&self.kernels);

        async move {
            let kernel = compiler.kernel_name(format).ok_or_else(|| {
                EncodeError::UnsupportedFormat(format!("no kernel available for {}", format))
            })?;

            let started = Instant::now();
            let source = kernels.load(kernel).await?;
            let source = if compiler.needs_f16_patch() {
                strip_f16(&source).into_owned()
            } else {
                source
            };

            let program = compiler.compile_program(format, source).await?;
            info!(
                "Compiled program for {} in {:.1} ms",
                format,
                started.elapsed().as_secs_f64() * 1000.0
            );
            Ok(Arc::new(program))
        }
        .inspect(move |result| {
            if let Err(e) = result {
                debug!("Program for {} failed: {}", format, e);
            }
        })
        .boxed()
        .shared()
    }
}
