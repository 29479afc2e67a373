//! Artifact cache behaviour: reuse, staleness, build locking and maintenance.

use std::sync::Arc;
use std::time::Duration;

use tessera_device::ExecutionRuntime;
use tessera_dtype::ArgType;

use crate::test::fakes::{Call, Fixture};
use crate::{BuildLock, ErrorKind, Kernel, NativeOpBuilder, Signature};

const ADD_KERNEL: &str = "buf_buf_buf_i32\nadd(x, y, out, n)";

#[test]
fn test_entry_layout() {
    let fx = Fixture::new();
    let jit = fx.jit();
    let entry = jit.cache().entry("buf_i32");

    assert_eq!(entry.dir, fx.cache_root().join("buf_i32"));
    assert_eq!(entry.source, entry.dir.join("op.cpp"));
    assert_eq!(entry.artifact, entry.dir.join("buf_i32.so"));
    assert_eq!(entry.lock, entry.dir.join("lock"));
    assert!(!entry.dir.exists(), "entry() must not touch the disk");
}

#[test]
fn test_locate_requires_non_empty_artifact() {
    let fx = Fixture::new();
    let jit = fx.jit();
    let cache = jit.cache();

    assert!(cache.locate("buf_i32").unwrap().is_none());

    let entry = cache.ensure_directory("buf_i32").unwrap();
    assert!(entry.dir.is_dir());
    cache.ensure_directory("buf_i32").unwrap();

    std::fs::write(&entry.artifact, b"").unwrap();
    assert!(cache.locate("buf_i32").unwrap().is_none());

    std::fs::write(&entry.artifact, b"\x7fELF").unwrap();
    let found = cache.locate("buf_i32").unwrap().unwrap();
    assert!(found.modified.is_some());
    assert!(!cache.is_stale(&found).unwrap());
    assert!(cache.is_stale(&entry).unwrap(), "an entry without an artifact is stale");
}

#[test]
fn test_warm_cache_skips_toolchain() {
    let fx = Fixture::new();

    let first = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 1);

    let entry = fx.jit().cache().locate(first.key()).unwrap().unwrap();
    let glue = std::fs::read_to_string(&entry.source).unwrap();
    assert_eq!(glue, "// operator buf_buf_buf_i32 taking 4 arguments\n");

    // A new context over the same root is what a second process sees.
    let second = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 1);
    assert_eq!(first.key(), second.key());
    assert_ne!(first.op_id(), second.op_id());
}

#[test]
fn test_invocation_links_against_runtime() {
    let fx = Fixture::new();
    Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();

    let invocation = fx.toolchain.last().unwrap();
    let library = fx.runtime.library();
    assert_eq!(invocation.program, "c++");
    assert_eq!(invocation.source, fx.cache_root().join("buf_buf_buf_i32").join("op.cpp"));
    assert_eq!(invocation.output.parent(), Some(fx.cache_root().join("buf_buf_buf_i32").as_path()));
    assert_eq!(invocation.include_dirs, vec![library.include_dir()]);
    assert_eq!(invocation.link_dirs, vec![library.dir().to_path_buf()]);
    assert_eq!(invocation.link_libs, vec!["fakert".to_string()]);
}

#[test]
fn test_newer_runtime_rebuilds_once() {
    let fx = Fixture::new();
    Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 1);

    let jit = fx.jit();
    fx.runtime.outdate(&jit.cache().entry("buf_buf_buf_i32").artifact);
    let entry = jit.cache().locate("buf_buf_buf_i32").unwrap().unwrap();
    assert!(jit.cache().is_stale(&entry).unwrap());

    Kernel::builder(&jit, ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 2);

    Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 2);
}

#[test]
fn test_concurrent_builds_compile_once() {
    let fx = Arc::new(Fixture::new());
    fx.toolchain.set_delay(Duration::from_millis(50));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            std::thread::spawn(move || Kernel::builder(&fx.jit(), ADD_KERNEL).build().map(|k| k.key().to_string()))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), "buf_buf_buf_i32");
    }
    assert_eq!(fx.toolchain.invocations(), 1);
}

#[test]
fn test_distinct_keys_build_independently() {
    let fx = Fixture::new();
    let jit = fx.jit();

    let a = Kernel::builder(&jit, "buf_i32").build().unwrap();
    let b = Kernel::builder(&jit, "buf_f32").build().unwrap();
    assert_ne!(a.key(), b.key());
    assert_eq!(fx.toolchain.invocations(), 2);
}

#[test]
fn test_failed_build_leaves_no_artifact() {
    let fx = Fixture::new();
    fx.toolchain.set_fail(true);

    let err = Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap_err();
    assert!(matches!(err, crate::Error::ToolchainFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Build);

    let jit = fx.jit();
    let entry = jit.cache().entry("buf_buf_buf_i32");
    assert!(!entry.artifact.exists());
    let leftovers: Vec<_> = std::fs::read_dir(&entry.dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name != "op.cpp" && name != "lock")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");

    // The lock was released on the error path.
    BuildLock::acquire(&entry.lock).unwrap().release().unwrap();

    fx.toolchain.set_fail(false);
    Kernel::builder(&jit, ADD_KERNEL).build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 2);
    assert!(entry.artifact.exists());
}

#[test]
fn test_loaded_operator_is_shared() {
    let fx = Fixture::new();
    let jit = fx.jit();

    Kernel::builder(&jit, ADD_KERNEL).build().unwrap();
    Kernel::builder(&jit, ADD_KERNEL).build().unwrap();
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::LoadLibrary(_))), 1);

    // Another context loads its own copy.
    Kernel::builder(&fx.jit(), ADD_KERNEL).build().unwrap();
    assert_eq!(fx.runtime.count(|c| matches!(c, Call::LoadLibrary(_))), 2);
}

#[test]
fn test_entries_and_evict() {
    let fx = Fixture::new();
    let jit = fx.jit();
    let cache = jit.cache();
    assert!(cache.entries().unwrap().is_empty());

    Kernel::builder(&jit, "buf_i32").build().unwrap();
    Kernel::builder(&jit, "buf_buf_f16").build().unwrap();
    std::fs::create_dir_all(fx.cache_root().join("scratch")).unwrap();
    cache.ensure_directory("buf_i64").unwrap();

    let keys: Vec<_> = cache.entries().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["buf_buf_f16", "buf_i32"]);

    assert!(cache.evict("buf_i32").unwrap());
    assert!(!cache.evict("buf_i32").unwrap());
    let keys: Vec<_> = cache.entries().unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["buf_buf_f16"]);

    // Evicted keys are rebuilt on demand.
    Kernel::builder(&jit, "buf_i32").build().unwrap();
    assert_eq!(fx.toolchain.invocations(), 3);
}

#[test]
fn test_resolve_uses_signature_key() {
    let fx = Fixture::new();
    let jit = fx.jit();
    let signature = Signature::new([ArgType::Buffer, ArgType::Double]);

    let operator = jit.operator(&signature).unwrap();
    assert_eq!(operator.name(), "buf_f64");
    assert!(jit.cache().fresh("buf_f64").unwrap().is_some());
}

#[test]
fn test_compile_reports_missing_entry_directory() {
    let fx = Fixture::new();
    let jit = fx.jit();
    let builder = NativeOpBuilder::new(jit.config(), fx.toolchain.clone(), fx.compiler.clone(), fx.runtime.clone());
    let entry = jit.cache().entry("buf_i32");

    let err = builder.compile(&entry).unwrap_err();
    assert!(matches!(err, crate::Error::BuildOutput { ref dir, .. } if *dir == entry.dir), "unexpected error: {err}");
    assert_eq!(err.kind(), ErrorKind::Build);
    assert_eq!(fx.toolchain.invocations(), 0);
}
