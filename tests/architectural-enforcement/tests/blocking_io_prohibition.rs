//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the dispatch crates MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::process`, async `reqwest`.
//! Synchronous functions (config loading before the runtime is busy) may use
//! `std::fs`.

use architectural_enforcement::{blocking_io_violations, scan};

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(blocking_io_violations);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nForbidden in async code:");
        eprintln!("  - std::fs::*, std::net::*, std::process::Command");
        eprintln!("  - reqwest::blocking::* (anywhere)");
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - reqwest::Client::post(..).send().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}
