//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the dispatch crates MUST NOT sleep to wait
//! for something to happen.
//! **Exceptions**: retry backoff (delay from `delay_for_attempt`), one-shot
//! deadline timers that expire a task, test code.

use architectural_enforcement::{scan, sleep_violations};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(sleep_violations);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAcceptable sleep uses:");
        eprintln!("  - Retry backoff computed by RetryPolicy::delay_for_attempt");
        eprintln!("  - Deadline timers that call expire() when they fire");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("\nForbidden:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as synchronization (use channels, Notify, watch)");
        eprintln!("  - std::thread::sleep anywhere");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
