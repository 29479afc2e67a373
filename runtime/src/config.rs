//! Build configuration for the kernel cache.
//!
//! Provides typed configuration with bon builders and environment variable fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use bon::bon;

use crate::error::{NoHomeDirectorySnafu, Result};

/// Default toolchain deadline.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Default compiler program.
pub const DEFAULT_COMPILER: &str = "c++";

/// Where artifacts live, which toolchain builds them and how long a build may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Root directory of the artifact cache.
    pub cache_root: PathBuf,
    /// Compiler program used for glue source.
    pub compiler: String,
    /// Deadline for a single toolchain invocation. `None` waits forever.
    pub build_timeout: Option<Duration>,
    /// Flags appended after the optimization level.
    pub extra_cflags: Vec<String>,
}

/// `~/.tessera/ops`.
pub fn default_cache_root() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| NoHomeDirectorySnafu.build())?;
    Ok(home.join(".tessera").join("ops"))
}

// Homeless environments (some containers) still get a usable cache.
fn fallback_cache_root() -> PathBuf {
    default_cache_root().unwrap_or_else(|_| std::env::temp_dir().join("tessera").join("ops"))
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            cache_root: fallback_cache_root(),
            compiler: DEFAULT_COMPILER.to_string(),
            build_timeout: Some(DEFAULT_BUILD_TIMEOUT),
            extra_cflags: Vec::new(),
        }
    }
}

#[bon]
impl JitConfig {
    /// Create a configuration with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = fallback_cache_root(), into)] cache_root: PathBuf,
        #[builder(default = DEFAULT_COMPILER.to_string(), into)] compiler: String,
        #[builder(default = DEFAULT_BUILD_TIMEOUT.as_secs())] build_timeout_secs: u64,
        #[builder(default)] extra_cflags: Vec<String>,
    ) -> Self {
        Self { cache_root, compiler, build_timeout: timeout_from_secs(build_timeout_secs), extra_cflags }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_CACHE_DIR` - Cache root (default: `~/.tessera/ops`)
    /// * `CXX` - Compiler program (default: `c++`)
    /// * `TESSERA_BUILD_TIMEOUT` - Build deadline in seconds, `0` disables (default: 600)
    /// * `TESSERA_EXTRA_CFLAGS` - Whitespace separated extra compiler flags
    pub fn from_env() -> Self {
        let cache_root = std::env::var_os("TESSERA_CACHE_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(fallback_cache_root);
        let compiler =
            std::env::var("CXX").ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| DEFAULT_COMPILER.to_string());
        let timeout_secs = std::env::var("TESSERA_BUILD_TIMEOUT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_BUILD_TIMEOUT.as_secs());
        let extra_cflags = std::env::var("TESSERA_EXTRA_CFLAGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self { cache_root, compiler, build_timeout: timeout_from_secs(timeout_secs), extra_cflags }
    }

    /// Same configuration rooted elsewhere.
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
