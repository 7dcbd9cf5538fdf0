// Build scripts signal errors by panicking; there is no caller to
// return Result to. Cargo treats a non-zero exit as a build failure.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Build script for the flatscan web front end.
//!
//! Compiles `crates/flatscan-worker/` with `wasm-pack` and exposes the
//! JS glue and WASM binary to `main.rs` as `WORKER_JS_PATH` and
//! `WORKER_WASM_PATH`, for `include_str!` and `include_bytes!`.
//!
//! Only a `wasm32` build of this crate can start a worker. Host builds
//! (tests, clippy, docs) get empty placeholders instead, so they do not
//! need `wasm-pack`; an app built that way never sees the worker become
//! ready and hands images back unchanged.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use std::{env, fs};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());

    // Workspace root is two levels up from crates/flatscan-web/.
    let workspace_root = manifest_dir
        .parent()
        .and_then(Path::parent)
        .expect("could not find workspace root");

    println!(
        "cargo:rerun-if-changed={}",
        manifest_dir.join("assets/app.css").display()
    );

    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch == "wasm32" {
        build_worker_wasm(workspace_root, &out_dir);
    } else {
        write_worker_placeholders(&out_dir);
    }
}

/// Build the scan worker via `wasm-pack` into `$OUT_DIR/worker-pkg`.
///
/// The build is skipped while the output is newer than every source
/// file of the worker and of `flatscan-core`.
fn build_worker_wasm(workspace_root: &Path, out_dir: &Path) {
    let worker_crate = workspace_root.join("crates/flatscan-worker");
    let core_crate = workspace_root.join("crates/flatscan-core");
    let worker_pkg_dir = out_dir.join("worker-pkg");

    for krate in [&worker_crate, &core_crate] {
        register_rs_sources(&krate.join("src"));
        println!("cargo:rerun-if-changed={}", krate.join("Cargo.toml").display());
    }

    let js_path = worker_pkg_dir.join("flatscan_worker.js");
    let wasm_path = worker_pkg_dir.join("flatscan_worker_bg.wasm");

    let up_to_date = js_path.exists()
        && fs::metadata(&wasm_path)
            .and_then(|m| m.modified())
            .is_ok_and(|built| {
                ![&worker_crate, &core_crate].iter().any(|krate| {
                    is_any_newer_than(&krate.join("src"), built)
                        || is_newer_than(&krate.join("Cargo.toml"), built)
                })
            });

    if !up_to_date {
        // Host flags and wrappers (coverage instrumentation, sccache and
        // the like) do not apply to the wasm32 sub-build.
        let status = Command::new("wasm-pack")
            .args([
                "build",
                &worker_crate.to_string_lossy(),
                "--target",
                "no-modules",
                "--no-typescript",
                "--out-dir",
                &worker_pkg_dir.to_string_lossy(),
            ])
            .env_remove("RUSTFLAGS")
            .env_remove("CARGO_ENCODED_RUSTFLAGS")
            .env_remove("RUSTC_WRAPPER")
            .env_remove("RUSTC_WORKSPACE_WRAPPER")
            .status()
            .unwrap_or_else(|e| {
                panic!(
                    "failed to run `wasm-pack build`: {e}\n\
                     \n\
                     The scan worker requires wasm-pack to compile.\n\
                     Install: cargo install wasm-pack"
                )
            });
        assert!(
            status.success(),
            "`wasm-pack build` for flatscan-worker exited with {status}"
        );
        assert!(js_path.exists(), "expected worker JS at {}", js_path.display());
        assert!(
            wasm_path.exists(),
            "expected worker WASM at {}",
            wasm_path.display()
        );
    }

    println!("cargo:rustc-env=WORKER_JS_PATH={}", js_path.display());
    println!("cargo:rustc-env=WORKER_WASM_PATH={}", wasm_path.display());
}

/// Empty worker blobs for host builds.
fn write_worker_placeholders(out_dir: &Path) {
    let js_path = out_dir.join("worker-placeholder.js");
    let wasm_path = out_dir.join("worker-placeholder.wasm");
    fs::write(&js_path, "").unwrap_or_else(|e| panic!("failed to write {}: {e}", js_path.display()));
    fs::write(&wasm_path, b"").unwrap_or_else(|e| panic!("failed to write {}: {e}", wasm_path.display()));
    println!("cargo:rustc-env=WORKER_JS_PATH={}", js_path.display());
    println!("cargo:rustc-env=WORKER_WASM_PATH={}", wasm_path.display());
}

/// Emit `cargo:rerun-if-changed` for every `.rs` file under `dir`.
fn register_rs_sources(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            register_rs_sources(&path);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            println!("cargo:rerun-if-changed={}", path.display());
        }
    }
}

fn is_newer_than(path: &Path, reference: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .is_ok_and(|t| t > reference)
}

/// Whether any `.rs` or `.toml` file under `dir` changed after
/// `reference`.
fn is_any_newer_than(dir: &Path, reference: SystemTime) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        if path.is_dir() {
            is_any_newer_than(&path, reference)
        } else {
            path.extension().is_some_and(|ext| ext == "rs" || ext == "toml")
                && is_newer_than(&path, reference)
        }
    })
}
