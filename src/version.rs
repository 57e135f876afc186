//! Build information stamped in by build.rs

use std::fmt;

/// What this binary was built from
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, or "unknown" outside a git checkout
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    git_dirty: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("TASKSYNC_GIT_HASH"),
            git_branch: env!("TASKSYNC_GIT_BRANCH"),
            git_dirty: env!("TASKSYNC_GIT_DIRTY"),
            build_timestamp: env!("TASKSYNC_BUILD_TIMESTAMP"),
            target: env!("TASKSYNC_TARGET"),
            host: env!("TASKSYNC_HOST"),
            profile: env!("TASKSYNC_PROFILE"),
            rustc_version: env!("TASKSYNC_RUSTC_VERSION"),
        }
    }

    pub fn git_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// Version plus commit, e.g. "0.3.0-1a2b3c4d" or "0.3.0-1a2b3c4d-dirty"
    pub fn full_version(&self) -> String {
        let mut full = format!("{}-{}", self.version, self.git_hash);
        if self.git_dirty() {
            full.push_str("-dirty");
        }
        full
    }

    pub fn is_release(&self) -> bool {
        self.profile == "release"
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "  Branch:   {}", self.git_branch)?;
        writeln!(f, "  Built:    {} ({})", self.build_timestamp, self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Host:     {}", self.host)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}
