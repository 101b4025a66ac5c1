use clap::Parser;
use senw_core::config::{EngineConfig, DEFAULT_SERVER};
use senw_core::EngineResult;
use std::time::Duration;
use url::Url;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_NUMBER"));

#[derive(Parser, Debug)]
#[command(name = "senw", version = VERSION, about = "Seneferu CI Watcher TUI")]
pub struct Cli {
    /// Base URL of the CI server
    #[arg(short, long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Live log websocket URL (defaults to ws://<server host>/ws)
    #[arg(long)]
    pub ws_url: Option<Url>,

    /// Poll interval in seconds for builds that are still running
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Seconds to wait for the live log connection to open
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_timeout: u64,

    /// Repository to open on startup (org/name)
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Enable verbose logging to $XDG_STATE_HOME/senw/debug.log
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn engine_config(&self) -> EngineResult<EngineConfig> {
        let mut config = EngineConfig::from_server(&self.server)?
            .with_poll_interval(Duration::from_secs(self.interval))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout));
        if let Some(ws_url) = &self.ws_url {
            config = config.with_ws_url(ws_url.clone());
        }
        Ok(config)
    }
}

/// Validates that `repo` is exactly `org/name`.
pub fn validate_repo_format(repo: &str) -> Result<(), String> {
    let parts: Vec<&str> = repo.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) || repo.contains(char::is_whitespace)
    {
        return Err(format!(
            "Invalid repository '{repo}'. Expected 'org/name' (e.g. 'seneferu/core')."
        ));
    }
    Ok(())
}
