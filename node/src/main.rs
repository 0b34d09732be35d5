use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testament_registry::{Ledger, Registry, WillLedger};
use testament_rpc::{start_server, AppState};
use testament_storage::{KeyValueStore, MemoryStore, SledStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

use version::{git_commit_hash, TESTAMENT_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    Sled,
}

impl StoreBackend {
    fn from_env(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sled" => Ok(StoreBackend::Sled),
            other => anyhow::bail!("Unknown store backend '{other}' (expected memory or sled)"),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Sled => "sled",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,
    node_id: String,

    // Network
    rpc_host: String,
    rpc_port: u16,

    // Storage
    store_backend: StoreBackend,
    db_path: String,

    // Ledger
    wait_secs: Option<u64>,
    require_approved_testator: bool,

    // Observability
    prometheus_enabled: bool,

    // Logging
    log_level: String,
    log_format: String,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let config_path = match config_path_override {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path)
            }
            None => None,
        };

        let mut builder = Config::builder();
        if let Some(path) = &config_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("TESTAMENT"));
        let config = builder.build()?;

        let rpc_port = match get_string_value(&config, &["rpc_port", "rpc.port"]) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("rpc.port must be a port number, got '{value}'"))?,
            None => 8888,
        };

        let store_backend = get_string_value(&config, &["store_backend", "store.backend"])
            .map(|value| StoreBackend::from_env(&value))
            .transpose()?
            .unwrap_or(StoreBackend::Sled);

        let wait_secs = get_string_value(&config, &["wait_secs", "ledger.wait_secs"])
            .map(|value| {
                value.parse::<u64>().with_context(|| {
                    format!("ledger.wait_secs must be a whole number of seconds, got '{value}'")
                })
            })
            .transpose()?;

        Ok(Self {
            config_path,
            node_id: get_string_value(&config, &["node_id", "node.id"])
                .unwrap_or_else(|| "testament-node".to_string()),
            rpc_host: get_string_value(&config, &["rpc_host", "rpc.host"])
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            rpc_port,
            store_backend,
            db_path: get_string_value(&config, &["db_path", "store.db_path"])
                .unwrap_or_else(|| "./data/testament".to_string()),
            wait_secs,
            require_approved_testator: get_bool_value(
                &config,
                &["require_approved_testator", "ledger.require_approved_testator"],
                false,
            ),
            prometheus_enabled: get_bool_value(
                &config,
                &["prometheus_enabled", "metrics.prometheus_enabled"],
                true,
            ),
            log_level: get_string_value(&config, &["log_level", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("node.id must not be empty");
        }
        if self.rpc_port == 0 {
            anyhow::bail!("rpc.port must be greater than zero");
        }
        if self.store_backend == StoreBackend::Sled && self.db_path.trim().is_empty() {
            anyhow::bail!("store.db_path must not be empty for the sled backend");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("log.format must be pretty or json, got '{}'", self.log_format);
        }
        Ok(())
    }

    fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }

    fn wait(&self) -> Option<Duration> {
        self.wait_secs.map(Duration::from_secs)
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) -> Result<()> {
    if let Some(rpc_host) = matches.get_one::<String>("rpc-host") {
        config.rpc_host = rpc_host.clone();
    }

    if let Some(rpc_port) = matches.get_one::<u16>("rpc-port") {
        config.rpc_port = *rpc_port;
    }

    if let Some(store) = matches.get_one::<String>("store") {
        config.store_backend = StoreBackend::from_env(store)?;
    }

    if let Some(db_path) = matches.get_one::<String>("db-path") {
        config.db_path = db_path.clone();
    }

    if let Some(wait) = matches.get_one::<u64>("wait") {
        config.wait_secs = Some(*wait);
    }

    if matches.get_flag("require-approved-testator") {
        config.require_approved_testator = true;
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }

    Ok(())
}

async fn check_status(config: &AppConfig, health_path: &str) -> Result<()> {
    let mut path = health_path.to_string();
    if !path.starts_with('/') {
        path = format!("/{path}");
    }
    let host = if config.rpc_host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        config.rpc_host.as_str()
    };
    let url = format!("http://{}:{}{}", host, config.rpc_port, path);
    let response = reqwest::Client::new().get(&url).send().await?;
    let status = response.status();
    let body = response.text().await?;
    println!("GET {url} -> {status}");
    println!("{body}");
    if status.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Health check failed with status {status}")
    }
}

fn cli() -> Command {
    Command::new("testament-node")
        .version(TESTAMENT_VERSION)
        .about("Public key registry and will ledger node")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print version information and exit")
                .global(true),
        )
        .arg(
            Arg::new("rpc-host")
                .long("rpc-host")
                .value_name("HOST")
                .help("Override RPC bind host")
                .global(true),
        )
        .arg(
            Arg::new("rpc-port")
                .long("rpc-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override RPC port")
                .global(true),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("BACKEND")
                .value_parser(["memory", "sled"])
                .help("Select the ledger store backend")
                .global(true),
        )
        .arg(
            Arg::new("db-path")
                .long("db-path")
                .value_name("DIR")
                .help("Database directory for the sled backend")
                .global(true),
        )
        .arg(
            Arg::new("wait")
                .long("wait")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Seconds each ledger write waits for commit confirmation")
                .global(true),
        )
        .arg(
            Arg::new("require-approved-testator")
                .long("require-approved-testator")
                .action(ArgAction::SetTrue)
                .help("Only accept wills from approved public keys")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics exporter")
                .global(true),
        )
        .subcommand(Command::new("start").about("Start the node using the provided configuration"))
        .subcommand(
            Command::new("status")
                .about("Check the /health endpoint for a running node")
                .arg(
                    Arg::new("health-path")
                        .long("health-path")
                        .value_name("PATH")
                        .default_value("/health")
                        .help("Health endpoint path to query"),
                ),
        )
}

/// Version banner, when `--version` was passed. Needs no configuration.
fn version_requested(matches: &clap::ArgMatches) -> Option<String> {
    matches
        .get_flag("version_flag")
        .then(|| format!("testament {} (commit {})", TESTAMENT_VERSION, git_commit_hash()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if let Some(status_matches) = matches.subcommand_matches("status") {
        let config = load_config_with_overrides(status_matches)?;
        let health_path = status_matches
            .get_one::<String>("health-path")
            .map(|value| value.as_str())
            .unwrap_or("/health");
        check_status(&config, health_path).await?;
        return Ok(());
    }

    let start_matches = matches.subcommand_matches("start").unwrap_or(&matches);
    if let Some(version) = version_requested(start_matches) {
        println!("{version}");
        return Ok(());
    }

    let config = load_config_with_overrides(start_matches)?;

    init_logging(&config)?;
    let prometheus_handle = init_metrics(&config);

    info!("Starting testament node: {}", config.node_id);
    if let Some(path) = &config.config_path {
        info!("Config file: {}", path.display());
    } else {
        info!("Config file: (built-in defaults)");
    }

    let store = build_store(&config)?;
    let ledger = Ledger::new(store).with_wait(config.wait());
    match config.wait() {
        Some(wait) => info!("Ledger writes wait up to {:?} for commit", wait),
        None => info!("Ledger writes return once submitted"),
    }

    let registry =
        Registry::new(ledger.clone()).require_review(config.require_approved_testator);
    let wills =
        WillLedger::new(ledger).require_approved_testator(config.require_approved_testator);
    if config.require_approved_testator {
        info!("Wills are only accepted from approved testators; registrations need review");
    }

    let mut state = AppState::new(registry, wills);
    state.node_id = config.node_id.clone();
    state.store_backend = config.store_backend.to_string();
    state.metrics = prometheus_handle;

    start_server(state, &config.rpc_addr()).await
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; records are lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sled => {
            fs::create_dir_all(&config.db_path)
                .with_context(|| format!("failed to create {}", config.db_path))?;
            let store = SledStore::new(&config.db_path)
                .with_context(|| format!("failed to open sled store at {}", config.db_path))?;
            info!("Storage initialized at {}", config.db_path);
            Ok(Arc::new(store))
        }
    }
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(
                "testament_keys_registered_total",
                "Public keys registered for review"
            );
            describe_counter!("testament_keys_approved_total", "Public keys approved");
            describe_counter!("testament_wills_created_total", "Wills created or replaced");
            describe_counter!("testament_signatures_total", "Witness signatures recorded");
            describe_counter!(
                "testament_unresolved_entries_total",
                "List entries skipped because they could not be resolved"
            );
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}
