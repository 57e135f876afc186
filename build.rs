//! Build script for tasksync
//!
//! Stamps the binary with the git revision, build time and toolchain so
//! `tasksync version` can report exactly what is running in each terminal.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => (!output.stdout.is_empty()).to_string(),
        _ => "unknown".to_string(),
    };
    let rustc_version = command_output("rustc", &["--version"]);

    let stamps = [
        ("TASKSYNC_GIT_HASH", git_hash),
        ("TASKSYNC_GIT_BRANCH", git_branch),
        ("TASKSYNC_GIT_DIRTY", git_dirty),
        (
            "TASKSYNC_BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("TASKSYNC_TARGET", cargo_var("TARGET")),
        ("TASKSYNC_PROFILE", cargo_var("PROFILE")),
        ("TASKSYNC_HOST", cargo_var("HOST")),
        ("TASKSYNC_RUSTC_VERSION", rustc_version),
    ];

    for (key, value) in &stamps {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

/// Value of a cargo-provided build variable, or "unknown"
fn cargo_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| "unknown".to_string())
}

/// Trimmed stdout of a successful command, or "unknown"
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
