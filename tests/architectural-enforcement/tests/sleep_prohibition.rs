//! Sleep Prohibition
//!
//! **Policy**: production code in the core crate must not sleep to wait for
//! something. Blocking sleeps are never allowed; `tokio::time::sleep` is
//! allowed only as the delay between retry attempts.
//!
//! Waiting on a load, a lease or a result goes through channels and
//! `watch` signals instead.

use architectural_enforcement::{core_src_dir, find_sleep_violations, scan_dir};

#[test]
fn test_no_sleep_in_production_code() {
    let dir = core_src_dir();
    assert!(dir.exists(), "core sources not found at {}", dir.display());

    let violations = scan_dir(&dir, find_sleep_violations);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAllowed: tokio::time::sleep computing a retry backoff for an attempt.");
        eprintln!("Use watch/mpsc/Notify to wait for events instead of polling.");

        panic!("\nFound {} sleep violation(s).", violations.len());
    }
}
