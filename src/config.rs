use std::path::PathBuf;

pub const DEFAULT_BOOTSTRAP_ADMIN_PASSWORD: &str = "admin123";

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened at startup. Env var: `SIAPD_WORKSPACE`.
    pub workspace: Option<PathBuf>,
    /// `tracing` filter directive (default "info"). Env var: `SIAPD_LOG`.
    pub log_filter: String,
    /// Password for the `admin` account seeded into an empty workspace.
    /// Env var: `SIAPD_BOOTSTRAP_ADMIN_PASSWORD`.
    pub bootstrap_admin_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "info".to_string(),
            bootstrap_admin_password: DEFAULT_BOOTSTRAP_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace: non_empty_var("SIAPD_WORKSPACE").map(PathBuf::from),
            log_filter: non_empty_var("SIAPD_LOG").unwrap_or(defaults.log_filter),
            bootstrap_admin_password: non_empty_var("SIAPD_BOOTSTRAP_ADMIN_PASSWORD")
                .unwrap_or(defaults.bootstrap_admin_password),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
