//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests:
//! - No blocking sleeps in production code; async sleeps only for retry backoff
//! - No blocking I/O inside async functions
//!
//! The scanners are line-based. Everything after the first `#[cfg(test)]`
//! in a file is test code and is skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production sources of the core crate
#[must_use]
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conductor/core/src")
}

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub kind: &'static str,
    /// Offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

/// All `.rs` files below `dir`
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of a file: everything before `#[cfg(test)]`
fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .collect()
}

/// Code part of a line, without a trailing `//` comment
fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

fn is_fn_signature(line: &str) -> bool {
    let code = code_part(line).trim_start();
    code.starts_with("fn ")
        || code.contains(" fn ")
        || code.starts_with("async fn ")
        || code.contains("async fn ")
}

/// Whether the function enclosing `idx` is async
///
/// Scans backwards to the nearest `fn` signature. An `async {` block opened
/// between that signature and `idx` also counts as async context.
#[must_use]
pub fn in_async_context(lines: &[&str], idx: usize) -> bool {
    for i in (0..=idx).rev() {
        let code = code_part(lines[i]);
        if i < idx && (code.contains("async {") || code.contains("async move {")) {
            return true;
        }
        if is_fn_signature(lines[i]) {
            return code.contains("async fn");
        }
    }
    false
}

/// Whether the lines around `idx` compute a retry backoff
///
/// An async sleep is a legitimate retry delay when the surrounding code
/// names both the backoff and the attempt it belongs to.
#[must_use]
pub fn in_backoff_context(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(12);
    let window: String = lines[start..=idx]
        .iter()
        .map(|l| l.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    window.contains("backoff") && window.contains("attempt")
}

/// Sleep rule violations in one file
#[must_use]
pub fn find_sleep_violations(path: &Path, content: &str) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        if code.contains("thread::sleep") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                kind: "Blocking sleep",
                text: line.trim().to_string(),
            });
        } else if (code.contains("time::sleep(") || code.contains("sleep_until("))
            && !in_backoff_context(&lines, idx)
        {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                kind: "Sleep outside retry backoff",
                text: line.trim().to_string(),
            });
        }
    }

    violations
}

const BLOCKING_IO: [(&str, &str); 5] = [
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
];

/// Blocking I/O inside async code in one file
///
/// Non-async functions (configuration loading before the runtime does real
/// work) may use blocking I/O.
#[must_use]
pub fn find_blocking_io_violations(path: &Path, content: &str) -> Vec<Violation> {
    let lines = production_lines(content);
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if code.contains("reqwest::blocking") {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                kind: "Blocking HTTP client",
                text: line.trim().to_string(),
            });
            continue;
        }
        if !in_async_context(&lines, idx) {
            continue;
        }
        if let Some((_, kind)) = BLOCKING_IO.iter().find(|(needle, _)| code.contains(needle)) {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                kind,
                text: line.trim().to_string(),
            });
        }
    }

    violations
}

/// Run `scan` over every production file under `dir`
#[must_use]
pub fn scan_dir(dir: &Path, scan: fn(&Path, &str) -> Vec<Violation>) -> Vec<Violation> {
    rust_files(dir)
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|c| scan(path, &c)))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeps(src: &str) -> Vec<Violation> {
        find_sleep_violations(Path::new("x.rs"), src)
    }

    fn blocking(src: &str) -> Vec<Violation> {
        find_blocking_io_violations(Path::new("x.rs"), src)
    }

    #[test]
    fn test_thread_sleep_is_flagged() {
        let src = "fn wait() {\n    std::thread::sleep(d);\n}\n";
        assert_eq!(sleeps(src).len(), 1);
    }

    #[test]
    fn test_backoff_sleep_is_allowed() {
        let src = "async fn retry() {\n    let backoff = cfg.backoff_for_attempt(attempt);\n    tokio::time::sleep(backoff).await;\n}\n";
        assert!(sleeps(src).is_empty());
    }

    #[test]
    fn test_bare_async_sleep_is_flagged() {
        let src = "async fn poll() {\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n";
        assert_eq!(sleeps(src)[0].kind, "Sleep outside retry backoff");
    }

    #[test]
    fn test_test_code_is_skipped() {
        let src = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn t() { std::thread::sleep(d); }\n}\n";
        assert!(sleeps(src).is_empty());
    }

    #[test]
    fn test_comments_are_ignored() {
        let src = "async fn a() {\n    run(); // never std::thread::sleep here\n}\n";
        assert!(sleeps(src).is_empty());
    }

    #[test]
    fn test_fs_in_sync_fn_is_allowed() {
        let src = "pub fn load() {\n    let s = std::fs::read_to_string(p);\n}\n";
        assert!(blocking(src).is_empty());
    }

    #[test]
    fn test_fs_in_async_fn_is_flagged() {
        let src = "pub async fn load() {\n    let s = std::fs::read_to_string(p);\n}\n";
        let found = blocking(src);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
    }

    #[test]
    fn test_async_block_counts_as_async() {
        let src = "fn spawn() {\n    tokio::spawn(async move {\n        std::fs::write(p, b);\n    });\n}\n";
        assert_eq!(blocking(src).len(), 1);
    }

    #[test]
    fn test_blocking_http_is_always_flagged() {
        let src = "fn get() {\n    reqwest::blocking::get(url);\n}\n";
        assert_eq!(blocking(src)[0].kind, "Blocking HTTP client");
    }
}
