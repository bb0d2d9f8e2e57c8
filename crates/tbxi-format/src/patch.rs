//! The patch hook: before a `build()` call returns its bytes, any
//! sibling `NAME.patch`/`NAME.patch.sh` script matching the built
//! file's basename gets a chance to rewrite the output.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tbxi_common::DispatchError;

/// Resolves the spec's open question on the interactive y/N prompt: a
/// batch-friendly caller picks `AlwaysApply`/`AlwaysSkip` explicitly
/// instead of the dispatcher guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchPolicy {
    #[default]
    Prompt,
    AlwaysApply,
    AlwaysSkip,
}

/// Case-sensitive shell glob: `*` matches any run of characters, `?`
/// matches exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (m, n) = (p.len(), t.len());
    let mut dp = vec![vec![false; n + 1]; m + 1];
    dp[0][0] = true;
    for i in 1..=m {
        if p[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = match p[i - 1] {
                '*' => dp[i - 1][j] || dp[i][j - 1],
                '?' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == t[j - 1],
            };
        }
    }
    dp[m][n]
}

/// Find every sibling of `path` whose name, with a trailing `.patch` or
/// `.patch.sh` stripped, shell-globs `path`'s basename.
pub fn candidate_patches(path: &Path) -> Vec<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(basename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return matches;
    };
    for entry in entries.flatten() {
        let fname = entry.file_name();
        let fname = fname.to_string_lossy();
        let stem = fname
            .strip_suffix(".patch.sh")
            .or_else(|| fname.strip_suffix(".patch"));
        if let Some(stem) = stem {
            if glob_match(stem, &basename) {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();
    matches
}

fn confirm(message: &str, policy: PatchPolicy) -> bool {
    match policy {
        PatchPolicy::AlwaysApply => true,
        PatchPolicy::AlwaysSkip => false,
        PatchPolicy::Prompt => {
            print!("{message} [y/N] ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_ok() {
                matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
            } else {
                false
            }
        }
    }
}

/// Run one patch script, piping `bytes` to its stdin. `Ok(None)` means
/// the patch exited 1 (skip); a non-{0,1} exit code is fatal.
fn run_patch(patch_path: &Path, bytes: &[u8]) -> Result<Option<Vec<u8>>, DispatchError> {
    let dir = patch_path.parent().unwrap_or_else(|| Path::new("."));
    let mut child = Command::new(patch_path)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    stdin.write_all(bytes)?;
    drop(stdin);

    let output = child.wait_with_output()?;
    match output.status.code() {
        Some(0) => Ok(Some(output.stdout)),
        Some(1) => Ok(None),
        Some(code) => Err(DispatchError::PatchRejected(code)),
        None => Err(DispatchError::PatchRejected(-1)),
    }
}

/// Apply every matching patch to `bytes` in turn, honoring `policy`.
pub fn apply(path: &Path, mut bytes: Vec<u8>, policy: PatchPolicy) -> Result<Vec<u8>, DispatchError> {
    for patch_path in candidate_patches(path) {
        if policy == PatchPolicy::AlwaysSkip {
            continue;
        }
        if !confirm(&format!("apply {}?", patch_path.display()), policy) {
            continue;
        }
        if let Some(patched) = run_patch(&patch_path, &bytes)? {
            bytes = patched;
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_wildcards() {
        assert!(glob_match("Mac*ROM", "MacOS.elfROM"));
        assert!(glob_match("MacOS.el?", "MacOS.elf"));
        assert!(!glob_match("MacOS.elf", "Other"));
    }

    #[test]
    fn candidate_patches_strips_known_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MacOS.elf"), b"elf").unwrap();
        std::fs::write(dir.path().join("MacOS.elf.patch"), b"#!/bin/sh\ncat").unwrap();
        std::fs::write(dir.path().join("MacOS.elf.patch.sh"), b"#!/bin/sh\ncat").unwrap();
        std::fs::write(dir.path().join("unrelated.patch"), b"#!/bin/sh\ncat").unwrap();

        let hits = candidate_patches(&dir.path().join("MacOS.elf"));
        assert_eq!(hits.len(), 2);
    }
}
