//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the integration tests in `tests/`:
//! - No sleep() calls in production code outside retry backoff and deadline timers
//! - No blocking I/O inside async functions
//!
//! Scanning is line based. Everything from the first `#[cfg(test)]` onward is
//! treated as test code, matching how the dispatch crates lay out their
//! unit-test modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["dispatch/core/src", "dispatch/cli/src"];

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation was found in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// Offending source line, trimmed
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// Workspace root, derived from this package's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under the production directories
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files
}

/// Lines of `content` that belong to production code
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .collect()
}

/// Strip a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether `line` opens a function definition
fn is_fn_header(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("fn ")
        || line.starts_with("async fn ")
        || line.starts_with("pub fn ")
        || line.starts_with("pub async fn ")
        || line.starts_with("pub(crate) fn ")
        || line.starts_with("pub(crate) async fn ")
}

/// Whether the code at `current_idx` runs in an async context
///
/// True when the nearest enclosing function header is `async fn`, or when an
/// `async move {` / `async {` block opens between that header and the line.
pub fn is_in_async_context(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = code_part(lines[i]);

        if line.contains("async move {") || line.contains("async {") {
            return true;
        }
        if is_fn_header(line) {
            return line.contains("async fn");
        }
    }
    false
}

/// Whether a sleep at `current_idx` is a retry backoff wait
///
/// The delay must come from the policy's backoff computation nearby.
pub fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let range = current_idx.saturating_sub(20)..current_idx;
    lines[range]
        .iter()
        .any(|line| line.contains("delay_for_attempt"))
}

/// Whether a sleep at `current_idx` is a one-shot deadline timer
///
/// The sleep must be followed closely by an expiry call.
pub fn is_deadline_timer(lines: &[&str], current_idx: usize) -> bool {
    let end = std::cmp::min(current_idx + 5, lines.len());
    lines[current_idx..end]
        .iter()
        .any(|line| line.contains("expire("))
}

/// Find sleep calls that are neither backoff nor deadline timers
pub fn sleep_violations(path: &Path, content: &str) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }
        if code.contains("std::thread::sleep") || code.contains("thread::sleep(") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: "Thread sleep",
                source: line.trim().to_string(),
            });
            continue;
        }
        if is_backoff_context(&lines, idx) || is_deadline_timer(&lines, idx) {
            continue;
        }
        violations.push(Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            rule: "Sleep outside backoff or deadline timer",
            source: line.trim().to_string(),
        });
    }

    violations
}

/// Find blocking I/O used from async code
pub fn blocking_io_violations(path: &Path, content: &str) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        // always wrong, async or not
        if code.contains("reqwest::blocking") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: "Blocking HTTP client",
                source: line.trim().to_string(),
            });
            continue;
        }

        if !is_in_async_context(&lines, idx) {
            continue;
        }

        let rule = if code.contains("std::fs::") {
            Some("Blocking file I/O")
        } else if code.contains("std::net::") {
            Some("Blocking network I/O")
        } else if code.contains("std::process::Command") {
            Some("Blocking process I/O")
        } else if code.contains("std::io::stdin()") {
            Some("Blocking stdin in async")
        } else {
            None
        };

        if let Some(rule) = rule {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule,
                source: line.trim().to_string(),
            });
        }
    }

    violations
}

/// Run `check` over every production file
pub fn scan(check: fn(&Path, &str) -> Vec<Violation>) -> Vec<Violation> {
    production_files()
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|c| (path, c)))
        .flat_map(|(path, content)| check(path, &content))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> &'static Path {
        Path::new("sample.rs")
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}"]);
    }

    #[test]
    fn test_polling_sleep_detected() {
        let content = "async fn poll() {\n    loop {\n        tokio::time::sleep(Duration::from_millis(10)).await;\n    }\n}\n";
        let violations = sleep_violations(p(), content);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 3);
    }

    #[test]
    fn test_backoff_sleep_allowed() {
        let content = "async fn run() {\n    let delay = self.policy.delay_for_attempt(attempt);\n    attempt += 1;\n    tokio::time::sleep(delay).await;\n}\n";
        assert!(sleep_violations(p(), content).is_empty());
    }

    #[test]
    fn test_deadline_timer_allowed() {
        let content = "let timer = tokio::spawn(async move {\n    tokio::time::sleep(timeout).await;\n    if let Some(shared) = weak.upgrade() {\n        QueueShared::expire(&shared, id, timeout);\n    }\n});\n";
        assert!(sleep_violations(p(), content).is_empty());
    }

    #[test]
    fn test_thread_sleep_never_allowed() {
        let content = "fn wait() {\n    let delay = policy.delay_for_attempt(1);\n    std::thread::sleep(delay);\n}\n";
        assert_eq!(sleep_violations(p(), content).len(), 1);
    }

    #[test]
    fn test_sleep_in_test_module_ignored() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    async fn t() { tokio::time::sleep(d).await; }\n}\n";
        assert!(sleep_violations(p(), content).is_empty());
    }

    #[test]
    fn test_blocking_fs_in_sync_fn_allowed() {
        let content = "pub fn load() -> String {\n    std::fs::read_to_string(path).unwrap_or_default()\n}\n";
        assert!(blocking_io_violations(p(), content).is_empty());
    }

    #[test]
    fn test_blocking_fs_in_async_fn_detected() {
        let content = "pub async fn load() -> String {\n    std::fs::read_to_string(path).unwrap_or_default()\n}\n";
        let violations = blocking_io_violations(p(), content);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "Blocking file I/O");
    }

    #[test]
    fn test_blocking_fs_in_async_block_detected() {
        let content = "fn spawn_load() {\n    tokio::spawn(async move {\n        let _ = std::fs::read(path);\n    });\n}\n";
        assert_eq!(blocking_io_violations(p(), content).len(), 1);
    }

    #[test]
    fn test_blocking_http_always_detected() {
        let content = "fn fetch() {\n    let _ = reqwest::blocking::get(url);\n}\n";
        assert_eq!(blocking_io_violations(p(), content).len(), 1);
    }

    #[test]
    fn test_comment_mentions_ignored() {
        let content = "async fn f() {\n    // never call std::fs::read here\n    tokio::fs::read(path).await;\n}\n";
        assert!(blocking_io_violations(p(), content).is_empty());
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|f| f.ends_with("dispatch/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.ends_with("dispatch/cli/src/main.rs")));
    }
}
