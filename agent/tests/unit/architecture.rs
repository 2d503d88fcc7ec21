//! Structural tests for layer boundary enforcement.
//!
//! These tests scan source files to verify that the domain stays pure, the
//! application layer never reaches into infrastructure, and infrastructure
//! never writes to the terminal.

use std::path::{Path, PathBuf};

/// Collect all `.rs` files under a directory recursively.
fn collect_rs_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(collect_rs_files(&path));
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files
}

/// Track brace depth and return whether a line is inside a `#[cfg(test)]` block.
struct CfgTestTracker {
    in_test_block: bool,
    brace_depth: i32,
    test_block_start_depth: i32,
}

impl CfgTestTracker {
    fn new() -> Self {
        Self {
            in_test_block: false,
            brace_depth: 0,
            test_block_start_depth: 0,
        }
    }

    fn process_line(&mut self, line: &str) -> bool {
        if line.trim().contains("#[cfg(test)]") {
            self.in_test_block = true;
            self.test_block_start_depth = self.brace_depth;
        }
        for ch in line.chars() {
            match ch {
                '{' => self.brace_depth += 1,
                '}' => {
                    self.brace_depth -= 1;
                    if self.in_test_block && self.brace_depth <= self.test_block_start_depth {
                        self.in_test_block = false;
                    }
                }
                _ => {}
            }
        }
        self.in_test_block
    }
}

/// Non-comment production lines of every file under `src/<layer>`, as
/// `(relative path, line number, line)`.
fn production_lines(layer: &str) -> Vec<(String, usize, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut lines = Vec::new();
    for file in collect_rs_files(&root.join("src").join(layer)) {
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        let rel = file.strip_prefix(root).unwrap_or(&file).display().to_string();
        let mut tracker = CfgTestTracker::new();
        for (i, line) in content.lines().enumerate() {
            if tracker.process_line(line) {
                continue;
            }
            let trimmed = line.trim();
            if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
                continue;
            }
            lines.push((rel.clone(), i + 1, line.to_string()));
        }
    }
    lines
}

fn violations(layer: &str, forbidden: &[&str]) -> Vec<String> {
    production_lines(layer)
        .into_iter()
        .filter(|(_, _, line)| forbidden.iter().any(|pattern| line.contains(pattern)))
        .map(|(rel, lineno, line)| format!("{rel}:{lineno}: {}", line.trim()))
        .collect()
}

#[test]
fn domain_has_no_io_or_outer_layer_imports() {
    let found = violations(
        "domain",
        &[
            "crate::infra",
            "crate::application",
            "tokio::",
            "std::fs",
            "std::net",
            "std::process",
            "reqwest",
        ],
    );
    assert!(
        found.is_empty(),
        "Domain layer must stay free of I/O and outer layers:\n{}",
        found.join("\n")
    );
}

#[test]
fn application_never_imports_infra() {
    let found = violations("application", &["crate::infra", "reqwest", "UnixStream", "rustls"]);
    assert!(
        found.is_empty(),
        "Application layer must depend on ports, not infrastructure:\n{}",
        found.join("\n")
    );
}

#[test]
fn infra_has_no_print_macros_outside_tests() {
    let found = violations("infra", &["println!", "eprintln!", "print!(", "eprint!("]);
    assert!(
        found.is_empty(),
        "Infrastructure must log through tracing, not print:\n{}",
        found.join("\n")
    );
}

#[test]
fn command_runner_is_only_built_in_infra_and_cli() {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let found: Vec<String> = ["domain", "application"]
        .iter()
        .flat_map(|layer| violations(layer, &["TokioCommandRunner"]))
        .collect();
    assert!(
        found.is_empty(),
        "TokioCommandRunner must only be constructed in infra/ or {}:\n{}",
        src.join("cli.rs").display(),
        found.join("\n")
    );
}
