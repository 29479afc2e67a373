//! End-to-end build and launch through a native runtime library and the system toolchain.
//!
//! Needs `cc` and `c++` on the host; skips otherwise.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{BufferRef, Defines, Jit, JitConfig, Kernel, LaunchArg, LaunchOptions, LaunchOutcome};

const FAKE_RUNTIME: &str = r##"
#include <stddef.h>
#include <stdint.h>
#include <stdio.h>
#include <string.h>

static double scalars[64];
static int64_t next_scalar = 0;

int32_t tessera_fn_signature(const char *src, const char *options, uint8_t *out, size_t cap, size_t *len) {
    static const uint8_t sig[] = {7, 2};
    *len = sizeof(sig);
    if (cap >= sizeof(sig)) memcpy(out, sig, sizeof(sig));
    return 0;
}

static const char GLUE[] =
    "#include <stddef.h>\n"
    "#include <stdint.h>\n"
    "struct tessera_arg { uint32_t tag; int32_t device; uint64_t value; };\n"
    "extern \"C\" void tessera_record_scalar(int64_t id, double value);\n"
    "extern \"C\" int32_t %s(uint64_t op, int32_t device, int32_t bench, int64_t bench_id,\n"
    "                        const tessera_arg *args, size_t nargs) {\n"
    "    if (nargs != %zu) return 3;\n"
    "    int32_t *out = reinterpret_cast<int32_t *>(static_cast<uintptr_t>(args[0].value));\n"
    "    out[0] = static_cast<int32_t>(args[1].value) * 2 + device;\n"
    "    if (bench > 0) tessera_record_scalar(bench_id, bench * 1.5);\n"
    "    return 0;\n"
    "}\n";

int32_t tessera_make_glue(const char *name, const uint8_t *sig, size_t len, char *out, size_t cap, size_t *needed) {
    int n = snprintf(NULL, 0, GLUE, name, len);
    *needed = (size_t)n + 1;
    if (cap >= *needed) snprintf(out, cap, GLUE, name, len);
    return 0;
}

int32_t tessera_register_fn(uint64_t op, int32_t device, const char *src, const char *options, const char *path) {
    return 0;
}

int32_t tessera_register_grid(uint64_t op, int32_t device, const uint64_t *dims, size_t ndims, size_t nvariants) {
    return ndims == 0 || nvariants == 0 ? 1 : 0;
}

int32_t tessera_register_cst(uint64_t op, const char *name, const uint8_t *data, size_t len) {
    return 0;
}

int64_t tessera_make_scalar_id(void) { return next_scalar++; }

void tessera_record_scalar(int64_t id, double value) { scalars[id % 64] = value; }

int32_t tessera_retrieve_scalar(int64_t id, double *out) {
    *out = scalars[id % 64];
    return 0;
}
"##;

fn available(program: &str) -> bool {
    Command::new(program).arg("--version").output().is_ok_and(|out| out.status.success())
}

fn build_runtime(dir: &Path) -> Option<PathBuf> {
    if !available("cc") || !available("c++") {
        eprintln!("C/C++ compiler not available, skipping test.");
        return None;
    }

    let src = dir.join("fakert.c");
    let lib = dir.join("libfakert.so");
    std::fs::write(&src, FAKE_RUNTIME).unwrap();
    let status = Command::new("cc")
        .args(["-shared", "-fPIC", "-Wl,-soname,libfakert.so", "-o"])
        .arg(&lib)
        .arg(&src)
        .status()
        .unwrap();
    assert!(status.success(), "failed to compile fake runtime");
    Some(lib)
}

fn config(root: &Path, runtime_dir: &Path) -> JitConfig {
    JitConfig::builder()
        .cache_root(root.join("ops"))
        .extra_cflags(vec![format!("-Wl,-rpath,{}", runtime_dir.display())])
        .build()
}

#[test]
fn test_native_build_and_launch() {
    let dir = tempfile::tempdir().unwrap();
    let Some(lib) = build_runtime(dir.path()) else { return };

    let jit = Jit::from_dylib(config(dir.path(), dir.path()), &lib).unwrap();
    let kernel = Kernel::builder(&jit, "double(out, x)").defines(Defines::new().with("BLOCK", 64)).build().unwrap();
    assert_eq!(kernel.key(), "buf_i32");

    let entry = jit.cache().locate("buf_i32").unwrap().expect("artifact built");
    let glue = std::fs::read_to_string(&entry.source).unwrap();
    assert!(glue.contains("extern \"C\" int32_t buf_i32("));

    let mut out = [0i32; 1];
    let args = [LaunchArg::from(BufferRef::host(&mut out, 1)), LaunchArg::from(20i32)];
    let outcome = kernel.launch(&args, &LaunchOptions::with_grid([1])).unwrap();
    assert_eq!(outcome, LaunchOutcome::Enqueued);
    assert_eq!(out[0], 41);
    assert_eq!(kernel.registered_devices(), vec![1]);

    let bench = LaunchOptions::builder().grid([1]).bench(3).build();
    assert_eq!(kernel.launch(&args, &bench).unwrap(), LaunchOutcome::Benchmark(4.5));

    // A second context over the same root reuses the artifact untouched.
    let again = Jit::from_dylib(config(dir.path(), dir.path()), &lib).unwrap();
    Kernel::builder(&again, "double(out, x)").build().unwrap();
    let reused = again.cache().locate("buf_i32").unwrap().unwrap();
    assert_eq!(reused.modified, entry.modified);
}

#[test]
fn test_native_toolchain_failure() {
    let dir = tempfile::tempdir().unwrap();
    let Some(lib) = build_runtime(dir.path()) else { return };

    let config = JitConfig::builder()
        .cache_root(dir.path().join("ops"))
        .extra_cflags(vec!["-DTESSERA_BROKEN".into(), "-include".into(), "/nonexistent/header.h".into()])
        .build();
    let jit = Jit::from_dylib(config, &lib).unwrap();

    let err = Kernel::builder(&jit, "double(out, x)").build().unwrap_err();
    assert!(matches!(err, crate::Error::ToolchainFailed { .. }), "unexpected error: {err}");
    assert!(jit.cache().locate("buf_i32").unwrap().is_none());
}
