//! Compilation of glue source into loadable operators.
//!
//! Glue source is compiled with the configured C++ compiler into a shared library
//! that links against the execution runtime, then loaded into the runtime's operator
//! namespace.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use snafu::ResultExt;
use tessera_device::{ExecutionRuntime, KernelCompiler, Operator};
use tessera_dtype::Signature;

use crate::artifact_cache::{ArtifactCache, CacheEntry};
use crate::config::JitConfig;
use crate::error::{
    BuildOutputSnafu, PersistArtifactSnafu, Result, ToolchainFailedSnafu, ToolchainSpawnSnafu, ToolchainTimeoutSnafu,
};

/// Language standard some older big-iron toolchains need spelled out.
pub const LEGACY_STD_FLAG: &str = "-std=gnu++11";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Whether hosts of this architecture get [`LEGACY_STD_FLAG`].
pub fn needs_legacy_std(arch: &str, little_endian: bool) -> bool {
    arch == "powerpc64" && little_endian
}

fn host_needs_legacy_std() -> bool {
    needs_legacy_std(std::env::consts::ARCH, cfg!(target_endian = "little"))
}

/// One compiler run producing a shared library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub cflags: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    pub link_dirs: Vec<PathBuf>,
    pub link_libs: Vec<String>,
}

impl Invocation {
    /// Command line arguments, without the program.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-shared", "-fPIC", "-O2"].into_iter().map(OsString::from).collect();
        args.extend(self.cflags.iter().map(OsString::from));
        args.extend(self.include_dirs.iter().map(|dir| prefixed("-I", dir.as_os_str())));
        args.push("-o".into());
        args.push(self.output.clone().into());
        args.push(self.source.clone().into());
        args.extend(self.link_dirs.iter().map(|dir| prefixed("-L", dir.as_os_str())));
        args.extend(self.link_libs.iter().map(|lib| OsString::from(format!("-l{lib}"))));
        args
    }
}

fn prefixed(flag: &str, value: &std::ffi::OsStr) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(value);
    arg
}

/// Runs compiler invocations.
pub trait Toolchain: Send + Sync {
    fn compile(&self, invocation: &Invocation) -> Result<()>;
}

/// Toolchain that spawns the compiler as a child process.
///
/// On Unix the compiler runs in its own process group, so a timeout also takes
/// down the compiler driver's own children (`cc1plus`, `ld`).
#[derive(Debug, Clone, Default)]
pub struct SystemToolchain {
    timeout: Option<Duration>,
}

impl SystemToolchain {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).map_err(std::io::Error::other)?;
    // SAFETY: `kill` has no memory effects; `pgid` is the group `isolate` created.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// Kill the compiler with everything it started and reap it.
fn abort(child: &mut Child, program: &str) {
    if let Err(e) = kill_tree(child) {
        tracing::warn!(toolchain.program = %program, error = %e, "failed to kill compiler");
    }
    let _ = child.wait();
}

impl Toolchain for SystemToolchain {
    fn compile(&self, invocation: &Invocation) -> Result<()> {
        let program = &invocation.program;
        let mut command = Command::new(program);
        command.args(invocation.args()).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        isolate(&mut command);
        let mut child = command.spawn().context(ToolchainSpawnSnafu { program })?;

        // Drain stderr concurrently so a chatty compiler cannot block on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    abort(&mut child, program);
                    return Err(source).context(ToolchainSpawnSnafu { program });
                }
            }
            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout)
                && Instant::now() >= deadline
            {
                abort(&mut child, program);
                // The reader is left detached: a process that escaped the group may still hold the pipe.
                drop(stderr);
                tracing::warn!(toolchain.program = %program, ?timeout, "compiler timed out");
                return ToolchainTimeoutSnafu { program, timeout }.fail();
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr.and_then(|handle| handle.join().ok()).unwrap_or_default();
        snafu::ensure!(status.success(), ToolchainFailedSnafu { program, status: status.to_string(), stderr });
        Ok(())
    }
}

/// Turns signatures into loaded operators, populating the artifact cache on the way.
pub struct NativeOpBuilder {
    toolchain: Arc<dyn Toolchain>,
    compiler: Arc<dyn KernelCompiler>,
    runtime: Arc<dyn ExecutionRuntime>,
    program: String,
    cflags: Vec<String>,
}

impl NativeOpBuilder {
    pub fn new(
        config: &JitConfig,
        toolchain: Arc<dyn Toolchain>,
        compiler: Arc<dyn KernelCompiler>,
        runtime: Arc<dyn ExecutionRuntime>,
    ) -> Self {
        Self { toolchain, compiler, runtime, program: config.compiler.clone(), cflags: config.extra_cflags.clone() }
    }

    /// Build (or finish waiting for) the artifact for `signature` and load its operator.
    pub fn build(&self, cache: &ArtifactCache, signature: &Signature) -> Result<Arc<dyn Operator>> {
        let key = signature.key();
        let glue = self.compiler.generate_glue(&key, signature)?;
        let entry = cache.build(&key, &glue, self)?;
        cache.load(&entry)
    }

    /// The compiler run that turns `entry`'s glue source into `output`.
    pub fn invocation(&self, entry: &CacheEntry, output: PathBuf) -> Invocation {
        let library = self.runtime.library();
        let mut cflags = self.cflags.clone();
        if host_needs_legacy_std() {
            cflags.push(LEGACY_STD_FLAG.to_string());
        }

        Invocation {
            program: self.program.clone(),
            source: entry.source.clone(),
            output,
            cflags,
            include_dirs: vec![library.include_dir()],
            link_dirs: vec![library.dir().to_path_buf()],
            link_libs: vec![library.link_name().to_string()],
        }
    }

    /// Compile `entry`'s glue source and move the result into place as its artifact.
    ///
    /// Expects the caller to hold the entry's build lock.
    pub fn compile(&self, entry: &CacheEntry) -> Result<()> {
        let output = tempfile::Builder::new()
            .prefix(".build-")
            .suffix(".so")
            .tempfile_in(&entry.dir)
            .context(BuildOutputSnafu { dir: &entry.dir })?
            .into_temp_path();
        let invocation = self.invocation(entry, output.to_path_buf());

        tracing::info!(
            cache.key = %entry.key,
            toolchain.program = %invocation.program,
            "compiling operator"
        );
        let started = Instant::now();
        // A failed run drops `output`, which removes whatever the compiler left behind.
        self.toolchain.compile(&invocation)?;
        output.persist(&entry.artifact).map_err(|e| e.error).context(PersistArtifactSnafu { path: &entry.artifact })?;

        tracing::debug!(cache.key = %entry.key, elapsed = ?started.elapsed(), "operator compiled");
        Ok(())
    }
}

impl std::fmt::Debug for NativeOpBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeOpBuilder").field("program", &self.program).field("cflags", &self.cflags).finish()
    }
}
