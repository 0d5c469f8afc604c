//! Blocking I/O Prohibition
//!
//! **Policy**: async code in the core crate must not block a runtime worker.
//! **Required**: `tokio::fs`, `tokio::task::spawn_blocking`, async HTTP.
//!
//! Synchronous functions such as configuration loading may read files
//! directly; they run before requests are served.

use architectural_enforcement::{core_src_dir, find_blocking_io_violations, scan_dir};

#[test]
fn test_no_blocking_io_in_async_code() {
    let dir = core_src_dir();
    assert!(dir.exists(), "core sources not found at {}", dir.display());

    let violations = scan_dir(&dir, find_blocking_io_violations);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nRequired: tokio::fs, spawn_blocking for sysinfo-style probes,");
        eprintln!("reqwest's async client.");

        panic!("\nFound {} blocking I/O violation(s).", violations.len());
    }
}
