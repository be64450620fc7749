use clap::Parser;

use taskgate_common::GlobalConfigPatch;

#[derive(Parser)]
#[command(name = "taskgate")]
pub(crate) struct Cli {
    /// Database DSN (sqlite, mysql or postgres). Defaults to a local
    /// sqlite file when omitted.
    #[arg(long)]
    pub(crate) dsn: Option<String>,
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Outbound proxy for upstream calls.
    #[arg(long)]
    pub(crate) proxy: Option<String>,
    #[arg(long)]
    pub(crate) upstream_timeout_secs: Option<u64>,
    /// Background poll interval for unfinished tasks; 0 disables the sweep.
    #[arg(long)]
    pub(crate) sweep_interval_secs: Option<u64>,
    /// Access key seeded for the initial user.
    #[arg(long, default_value = "sk-taskgate")]
    pub(crate) access_key: String,
    /// Quota points granted to the initial user on first boot.
    #[arg(long, default_value_t = 10_000_000)]
    pub(crate) initial_quota: i64,
}

impl Cli {
    pub(crate) fn to_patch(&self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            dsn: self.dsn.clone(),
            proxy: self.proxy.clone(),
            upstream_timeout_secs: self.upstream_timeout_secs,
            sweep_interval_secs: self.sweep_interval_secs,
        }
    }
}

/// Environment layer; lower precedence than CLI flags.
pub(crate) fn env_patch() -> GlobalConfigPatch {
    GlobalConfigPatch {
        host: env_string("TASKGATE_HOST"),
        port: env_string("TASKGATE_PORT").and_then(|v| v.parse().ok()),
        dsn: env_string("TASKGATE_DSN"),
        proxy: env_string("TASKGATE_PROXY"),
        upstream_timeout_secs: env_string("TASKGATE_UPSTREAM_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok()),
        sweep_interval_secs: env_string("TASKGATE_SWEEP_INTERVAL_SECS")
            .and_then(|v| v.parse().ok()),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
