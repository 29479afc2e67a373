//! Execution runtime backed by a native shared library.
//!
//! The runtime library exports a small C ABI (see [`DylibRuntime`]); compiled
//! operators are loaded next to it through [`NativeNamespace`]. All entry points
//! are resolved once with `libloading` and kept as plain function pointers.

use std::collections::HashMap;
use std::ffi::{CString, c_char};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use parking_lot::RwLock;
use smallvec::SmallVec;
use snafu::{ResultExt, ensure};
use tessera_dtype::Signature;

use crate::error::{
    InteriorNulSnafu, LoadSnafu, OperatorNotFoundSnafu, OperatorStatusSnafu, OutOfRangeSnafu, Result, SignatureSnafu,
    StatusSnafu, SymbolSnafu, Utf8Snafu,
};
use crate::grid::GridTable;
use crate::launch::{BenchId, Constant, DeviceIndex, LaunchArg, OpId, RawArg};
use crate::options::CompileOptions;
use crate::runtime::{ExecutionRuntime, KernelCompiler, OpCall, Operator, RuntimeLibrary};

// ---------------------------------------------------------------------------
// C ABI
// ---------------------------------------------------------------------------

type FnSignature = unsafe extern "C" fn(*const c_char, *const c_char, *mut u8, usize, *mut usize) -> i32;
type FnMakeGlue = unsafe extern "C" fn(*const c_char, *const u8, usize, *mut c_char, usize, *mut usize) -> i32;
type FnRegisterFn = unsafe extern "C" fn(u64, i32, *const c_char, *const c_char, *const c_char) -> i32;
type FnRegisterGrid = unsafe extern "C" fn(u64, i32, *const u64, usize, usize) -> i32;
type FnRegisterCst = unsafe extern "C" fn(u64, *const c_char, *const u8, usize) -> i32;
type FnMakeScalarId = unsafe extern "C" fn() -> i64;
type FnRetrieveScalar = unsafe extern "C" fn(i64, *mut f64) -> i32;

/// Signature every glue operator exports under its key.
type FnOperator = unsafe extern "C" fn(u64, i32, i32, i64, *const RawArg, usize) -> i32;

struct RuntimeApi {
    _lib: Library,
    fn_signature: FnSignature,
    make_glue: FnMakeGlue,
    register_fn: FnRegisterFn,
    register_grid: FnRegisterGrid,
    register_cst: FnRegisterCst,
    make_scalar_id: FnMakeScalarId,
    retrieve_scalar: FnRetrieveScalar,
}

// Safety: the runtime library is required to be internally synchronized; the
// function pointers themselves are immutable after loading.
unsafe impl Send for RuntimeApi {}
unsafe impl Sync for RuntimeApi {}

fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T> {
    // SAFETY: the caller picks `T` to match the documented C ABI of `name`.
    unsafe {
        let sym: libloading::Symbol<T> = lib.get(name.as_bytes()).context(SymbolSnafu { name })?;
        Ok(*sym)
    }
}

impl RuntimeApi {
    fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; the runtime library is trusted.
        let lib = unsafe { Library::new(path) }.context(LoadSnafu { path })?;

        Ok(Self {
            fn_signature: symbol(&lib, "tessera_fn_signature")?,
            make_glue: symbol(&lib, "tessera_make_glue")?,
            register_fn: symbol(&lib, "tessera_register_fn")?,
            register_grid: symbol(&lib, "tessera_register_grid")?,
            register_cst: symbol(&lib, "tessera_register_cst")?,
            make_scalar_id: symbol(&lib, "tessera_make_scalar_id")?,
            retrieve_scalar: symbol(&lib, "tessera_retrieve_scalar")?,
            _lib: lib,
        })
    }
}

fn check(call: &'static str, code: i32) -> Result<()> {
    ensure!(code == 0, StatusSnafu { call, code });
    Ok(())
}

fn c_string(what: &'static str, text: &str) -> Result<CString> {
    CString::new(text).context(InteriorNulSnafu { what })
}

fn c_int(what: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).context(OutOfRangeSnafu { what })
}

// ---------------------------------------------------------------------------
// Operator namespace
// ---------------------------------------------------------------------------

/// A glue operator resolved from a loaded artifact.
pub struct NativeOperator {
    name: String,
    func: FnOperator,
    /// Keep the artifact mapped while the operator is reachable.
    _lib: Arc<Library>,
}

// SAFETY: `func` points to read-only code in `_lib`, which outlives it.
unsafe impl Send for NativeOperator {}
unsafe impl Sync for NativeOperator {}

impl Operator for NativeOperator {
    fn launch(&self, call: &OpCall<'_>) -> Result<()> {
        let args = call.args.iter().map(LaunchArg::to_raw).collect::<Result<SmallVec<[RawArg; 8]>>>()?;
        let device = c_int("device index", call.device)?;
        let bench = c_int("benchmark repetitions", call.bench)?;
        tracing::debug!(
            operator.name = %self.name,
            op.id = call.op_id.get(),
            device = call.device,
            bench = call.bench,
            num_args = args.len(),
            "Launching native operator"
        );

        // SAFETY: `args` outlives the call and matches the `tessera_arg` layout.
        let code =
            unsafe { (self.func)(call.op_id.get(), device, bench, call.bench_id.get(), args.as_ptr(), args.len()) };
        ensure!(code == 0, OperatorStatusSnafu { name: &self.name, code });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Dynamic operator namespace backed by `dlopen`.
///
/// Lookups search the most recently loaded library first.
#[derive(Default)]
pub struct NativeNamespace {
    libraries: RwLock<Vec<Arc<Library>>>,
    operators: RwLock<HashMap<String, Arc<NativeOperator>>>,
}

impl NativeNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        // SAFETY: artifacts are produced by our own toolchain invocation from glue source.
        let lib = unsafe { Library::new(path) }.context(LoadSnafu { path })?;
        self.libraries.write().push(Arc::new(lib));
        // A newer library may shadow names resolved earlier.
        self.operators.write().clear();

        tracing::debug!(path = %path.display(), "Loaded operator library");
        Ok(())
    }

    pub fn operator(&self, name: &str) -> Result<Arc<NativeOperator>> {
        if let Some(op) = self.operators.read().get(name) {
            return Ok(Arc::clone(op));
        }

        let libraries = self.libraries.read();
        for lib in libraries.iter().rev() {
            let Ok(func) = symbol::<FnOperator>(lib, name) else { continue };
            let op = Arc::new(NativeOperator { name: name.to_string(), func, _lib: Arc::clone(lib) });
            self.operators.write().insert(name.to_string(), Arc::clone(&op));
            return Ok(op);
        }

        OperatorNotFoundSnafu { name }.fail()
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// [`ExecutionRuntime`] and [`KernelCompiler`] implemented by a native library
/// exporting:
///
/// ```c
/// int32_t tessera_fn_signature(const char *src, const char *options, uint8_t *out, size_t cap, size_t *len);
/// int32_t tessera_make_glue(const char *name, const uint8_t *sig, size_t len, char *out, size_t cap, size_t *needed);
/// int32_t tessera_register_fn(uint64_t op, int32_t device, const char *src, const char *options,
///                             const char *runtime_path);
/// int32_t tessera_register_grid(uint64_t op, int32_t device, const uint64_t *dims, size_t ndims, size_t nvariants);
/// int32_t tessera_register_cst(uint64_t op, const char *name, const uint8_t *data, size_t len);
/// int64_t tessera_make_scalar_id(void);
/// int32_t tessera_retrieve_scalar(int64_t id, double *out);
/// ```
///
/// Buffer-returning calls report the required size through their last argument
/// and are retried once with a large enough buffer. Options cross the ABI in the
/// form produced by [`CompileOptions::encode`].
///
/// Grids arrive as `nvariants` rows of `ndims` dimensions each, one row per
/// [`CompileOptions::variants`] entry; a single row applies to every variant.
pub struct DylibRuntime {
    api: RuntimeApi,
    library: RuntimeLibrary,
    namespace: NativeNamespace,
}

impl DylibRuntime {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let library = RuntimeLibrary::new(path)?;
        let api = RuntimeApi::load(library.path())?;
        tracing::debug!(path = %library.path().display(), "Opened execution runtime");

        Ok(Self { api, library, namespace: NativeNamespace::new() })
    }

    pub fn namespace(&self) -> &NativeNamespace {
        &self.namespace
    }
}

impl KernelCompiler for DylibRuntime {
    fn signature_of(&self, source: &str, options: &CompileOptions) -> Result<Signature> {
        let src = c_string("kernel source", source)?;
        let opts = c_string("compile options", &options.encode())?;

        let mut raw = vec![0u8; 16];
        let mut len = 0usize;
        loop {
            // SAFETY: `raw` has `raw.len()` writable bytes; strings are NUL-terminated.
            let code =
                unsafe { (self.api.fn_signature)(src.as_ptr(), opts.as_ptr(), raw.as_mut_ptr(), raw.len(), &mut len) };
            check("tessera_fn_signature", code)?;
            if len <= raw.len() {
                break;
            }
            raw.resize(len, 0);
        }
        raw.truncate(len);

        Signature::from_raw(&raw).context(SignatureSnafu)
    }

    fn generate_glue(&self, name: &str, signature: &Signature) -> Result<String> {
        let c_name = c_string("operator name", name)?;
        let tags = signature.to_raw();

        let mut out = vec![0u8; 4096];
        let mut needed = 0usize;
        loop {
            // SAFETY: `out` has `out.len()` writable bytes; `tags` is readable for its length.
            let code = unsafe {
                (self.api.make_glue)(
                    c_name.as_ptr(),
                    tags.as_ptr(),
                    tags.len(),
                    out.as_mut_ptr().cast(),
                    out.len(),
                    &mut needed,
                )
            };
            check("tessera_make_glue", code)?;
            if needed <= out.len() {
                break;
            }
            out.resize(needed, 0);
        }
        out.truncate(needed);
        if out.last() == Some(&0) {
            out.pop();
        }

        String::from_utf8(out).context(Utf8Snafu { what: "glue source" })
    }
}

impl ExecutionRuntime for DylibRuntime {
    fn library(&self) -> &RuntimeLibrary {
        &self.library
    }

    fn load_library(&self, path: &Path) -> Result<()> {
        self.namespace.load(path)
    }

    fn operator(&self, name: &str) -> Result<Arc<dyn Operator>> {
        let op: Arc<dyn Operator> = self.namespace.operator(name)?;
        Ok(op)
    }

    fn register_kernel(
        &self,
        op_id: OpId,
        device: DeviceIndex,
        source: &str,
        options: &CompileOptions,
        runtime_path: &Path,
    ) -> Result<()> {
        let device = c_int("device index", device)?;
        let src = c_string("kernel source", source)?;
        let opts = c_string("compile options", &options.encode())?;
        let path = c_string("runtime path", &runtime_path.to_string_lossy())?;
        // SAFETY: all pointers are NUL-terminated strings alive for the call.
        let code = unsafe { (self.api.register_fn)(op_id.get(), device, src.as_ptr(), opts.as_ptr(), path.as_ptr()) };
        check("tessera_register_fn", code)
    }

    fn register_grid(&self, op_id: OpId, device: DeviceIndex, grid: &GridTable) -> Result<()> {
        let device = c_int("device index", device)?;
        let dims: SmallVec<[u64; 6]> = grid.as_flat().iter().map(|&d| d as u64).collect();
        // SAFETY: `dims` holds `grid.len() * grid.rank()` readable elements.
        let code = unsafe { (self.api.register_grid)(op_id.get(), device, dims.as_ptr(), grid.rank(), grid.len()) };
        check("tessera_register_grid", code)
    }

    fn register_constant(&self, op_id: OpId, name: &str, value: &Constant) -> Result<()> {
        let c_name = c_string("constant name", name)?;
        let bytes = value.as_bytes();
        // SAFETY: `bytes` is readable for its length; the name is NUL-terminated.
        let code = unsafe { (self.api.register_cst)(op_id.get(), c_name.as_ptr(), bytes.as_ptr(), bytes.len()) };
        check("tessera_register_cst", code)
    }

    fn alloc_bench_id(&self) -> BenchId {
        // SAFETY: no arguments.
        BenchId::new(unsafe { (self.api.make_scalar_id)() })
    }

    fn retrieve_scalar(&self, id: BenchId) -> Result<f64> {
        let mut out = 0.0f64;
        // SAFETY: `out` is a valid, writable f64.
        let code = unsafe { (self.api.retrieve_scalar)(id.get(), &mut out) };
        check("tessera_retrieve_scalar", code)?;
        Ok(out)
    }
}
