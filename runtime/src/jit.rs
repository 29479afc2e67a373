//! The context kernels are built in.

use std::path::Path;
use std::sync::Arc;

use tessera_device::{DylibRuntime, ExecutionRuntime, KernelCompiler, Operator};
use tessera_dtype::Signature;

use crate::artifact_cache::ArtifactCache;
use crate::config::JitConfig;
use crate::error::Result;
use crate::toolchain::{NativeOpBuilder, SystemToolchain, Toolchain};

/// Configuration plus the collaborators every kernel needs.
///
/// Kernels created from the same `Jit` share one artifact cache and its loaded
/// operators. Several `Jit`s may point at the same cache root; the on-disk build
/// lock keeps them from compiling a key twice.
pub struct Jit {
    config: JitConfig,
    runtime: Arc<dyn ExecutionRuntime>,
    compiler: Arc<dyn KernelCompiler>,
    cache: ArtifactCache,
    builder: NativeOpBuilder,
}

impl Jit {
    /// Context compiling with the system toolchain named in `config`.
    pub fn new(config: JitConfig, runtime: Arc<dyn ExecutionRuntime>, compiler: Arc<dyn KernelCompiler>) -> Self {
        let toolchain = Arc::new(SystemToolchain::new(config.build_timeout));
        Self::with_toolchain(config, runtime, compiler, toolchain)
    }

    pub fn with_toolchain(
        config: JitConfig,
        runtime: Arc<dyn ExecutionRuntime>,
        compiler: Arc<dyn KernelCompiler>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let cache = ArtifactCache::new(&config.cache_root, Arc::clone(&runtime));
        let builder = NativeOpBuilder::new(&config, toolchain, Arc::clone(&compiler), Arc::clone(&runtime));
        Self { config, runtime, compiler, cache, builder }
    }

    /// Context backed by a native runtime library that also acts as kernel compiler.
    pub fn from_dylib(config: JitConfig, library: impl AsRef<Path>) -> Result<Self> {
        let native = Arc::new(DylibRuntime::open(library.as_ref())?);
        Ok(Self::new(config, native.clone(), native))
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ExecutionRuntime> {
        &self.runtime
    }

    pub fn compiler(&self) -> &Arc<dyn KernelCompiler> {
        &self.compiler
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Operator for `signature`, compiled on demand.
    pub fn operator(&self, signature: &Signature) -> Result<Arc<dyn Operator>> {
        self.cache.resolve(signature, &self.builder)
    }
}

impl std::fmt::Debug for Jit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jit").field("config", &self.config).field("cache", &self.cache).finish_non_exhaustive()
    }
}
