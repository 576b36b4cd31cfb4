use std::path::PathBuf;

use clap::Parser;

use hercules_base::config::{CacheBackend, LogFormat, ServerConfig};

/// Flags and environment variables override the config file
#[derive(Parser)]
#[command(name = "hercules-base")]
#[command(version, about = "Patch distribution lookup service")]
struct Cli {
    /// JSON config file
    #[arg(long, env = "HERCULES_BASE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on [default: 0.0.0.0]
    #[arg(long, env = "HERCULES_BASE_HOST")]
    host: Option<String>,

    /// [default: 3000]
    #[arg(long, env = "HERCULES_BASE_PORT")]
    port: Option<u16>,

    /// Shared secret publishers must send as `authToken`
    #[arg(long, env = "HERCULES_BASE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Patch database file
    #[arg(long = "db", env = "HERCULES_BASE_DB")]
    db_path: Option<PathBuf>,

    /// [default: memory]
    #[arg(long, env = "HERCULES_BASE_CACHE", value_enum)]
    cache: Option<CacheBackend>,

    /// Default log level when RUST_LOG is unset [default: info]
    #[arg(long, env = "HERCULES_BASE_LOG_LEVEL")]
    log_level: Option<String>,

    /// [default: pretty]
    #[arg(long, env = "HERCULES_BASE_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Write rolling log files here instead of stdout
    #[arg(long, env = "HERCULES_BASE_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secret) = self.secret {
            config.secret = Some(secret);
        }
        if let Some(db_path) = self.db_path {
            config.db_path = db_path;
        }
        if let Some(cache) = self.cache {
            config.cache_backend = cache;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(dir) = self.log_dir {
            config.log.dir = Some(dir);
        }

        // An empty secret disables publishing, same as none
        config.secret = config.secret.filter(|s| !s.is_empty());
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    let _guard = hercules_base::logging::init_logging(&config.log)?;

    tracing::info!("Starting hercules-base {}", env!("CARGO_PKG_VERSION"));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(hercules_base::http::server::run_server(config))
}
