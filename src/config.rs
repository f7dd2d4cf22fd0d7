use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dirs::config_dir;
use log::LevelFilter;
use serde::Deserialize;

const DEFAULT_ADDRESS: &str = "127.0.0.1:1488";
const DEFAULT_PATH: &str = "/ecksdee/api";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub poll_interval: Duration,
    pub log_level: LevelFilter,
    pub silent_remove: bool,
    pub delete_files: bool,
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub scheme: String,
    pub address: String,
    pub path: String,
    pub swarm: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub url: Option<String>,
}

impl RpcConfig {
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let mut path = self.path.clone();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        format!("{}://{}{}", self.scheme, self.address, path)
    }
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "XD BitTorrent daemon dashboard", long_about = None)]
pub struct Cli {
    /// Full RPC endpoint URL; overrides address and path
    #[arg(long)]
    pub url: Option<String>,
    /// Daemon RPC address as host:port
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub path: Option<String>,
    #[arg(long)]
    pub swarm: Option<String>,
    #[arg(long)]
    pub timeout: Option<f64>,
    /// Seconds between refreshes
    #[arg(long)]
    pub poll_interval: Option<f64>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub tls: bool,
    /// Remove torrents without asking for confirmation
    #[arg(long, action = ArgAction::SetTrue)]
    pub silent_remove: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    rpc: Option<FileRpcConfig>,
    poll_interval: Option<f64>,
    log_level: Option<String>,
    silent_remove: Option<bool>,
    delete_files: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRpcConfig {
    url: Option<String>,
    scheme: Option<String>,
    address: Option<String>,
    path: Option<String>,
    swarm: Option<String>,
    timeout: Option<f64>,
    tls: Option<bool>,
    user_agent: Option<String>,
}

pub fn build_config(cli: &Cli) -> Result<AppConfig> {
    let file_config = load_file_config(cli.config.as_deref())?;
    resolve(cli, file_config.as_ref())
}

fn resolve(cli: &Cli, file_config: Option<&FileConfig>) -> Result<AppConfig> {
    let rpc_file = file_config.and_then(|cfg| cfg.rpc.as_ref());

    let url = cli
        .url
        .clone()
        .or_else(|| env::var("XD_URL").ok())
        .or_else(|| rpc_file.and_then(|cfg| cfg.url.clone()));

    let address = cli
        .address
        .clone()
        .or_else(|| env::var("XD_RPC_ADDRESS").ok())
        .or_else(|| rpc_file.and_then(|cfg| cfg.address.clone()))
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

    let path = cli
        .path
        .clone()
        .or_else(|| env::var("XD_RPC_PATH").ok())
        .or_else(|| rpc_file.and_then(|cfg| cfg.path.clone()))
        .unwrap_or_else(|| DEFAULT_PATH.to_string());

    let swarm = cli
        .swarm
        .clone()
        .or_else(|| env::var("XD_SWARM").ok())
        .or_else(|| rpc_file.and_then(|cfg| cfg.swarm.clone()))
        .unwrap_or_else(|| "0".to_string());

    let timeout_secs = cli
        .timeout
        .or_else(|| env_float("XD_TIMEOUT"))
        .or_else(|| rpc_file.and_then(|cfg| cfg.timeout))
        .unwrap_or(10.0);

    if timeout_secs <= 0.0 {
        anyhow::bail!("timeout must be positive");
    }

    let poll_secs = cli
        .poll_interval
        .or_else(|| env_float("XD_POLL_INTERVAL"))
        .or_else(|| file_config.and_then(|cfg| cfg.poll_interval))
        .unwrap_or(1.0);

    if poll_secs <= 0.0 {
        anyhow::bail!("poll interval must be positive");
    }

    let tls_flag = if cli.tls { Some(true) } else { None };
    let use_tls = tls_flag
        .or_else(|| env_bool("XD_TLS"))
        .or_else(|| rpc_file.and_then(|cfg| cfg.tls))
        .unwrap_or(false);

    let scheme = rpc_file
        .and_then(|cfg| cfg.scheme.clone())
        .unwrap_or_else(|| if use_tls { "https" } else { "http" }.to_string());

    let user_agent = env::var("XD_USER_AGENT")
        .ok()
        .or_else(|| rpc_file.and_then(|cfg| cfg.user_agent.clone()))
        .unwrap_or_else(|| "xd-dashboard".to_string());

    let silent_flag = if cli.silent_remove { Some(true) } else { None };
    let silent_remove = silent_flag
        .or_else(|| env_bool("XD_SILENT_REMOVE"))
        .or_else(|| file_config.and_then(|cfg| cfg.silent_remove))
        .unwrap_or(false);

    let delete_files = file_config
        .and_then(|cfg| cfg.delete_files)
        .unwrap_or(false);

    let log_level_str = cli
        .log_level
        .clone()
        .or_else(|| env::var("XD_LOG_LEVEL").ok())
        .or_else(|| file_config.and_then(|cfg| cfg.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let log_level = LevelFilter::from_str(&log_level_str).unwrap_or(LevelFilter::Info);

    Ok(AppConfig {
        rpc: RpcConfig {
            scheme,
            address,
            path,
            swarm,
            timeout: Duration::from_secs_f64(timeout_secs),
            user_agent,
            url,
        },
        poll_interval: Duration::from_secs_f64(poll_secs),
        log_level,
        silent_remove,
        delete_files,
    })
}

fn load_file_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = path {
        return read_file_config(path);
    }

    if let Ok(env_path) = env::var("XD_DASHBOARD_CONFIG") {
        return read_file_config(Path::new(&env_path));
    }

    if let Some(dir) = config_dir() {
        return read_file_config(&dir.join("xd-dashboard").join("config.toml"));
    }

    Ok(None)
}

fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(parsed))
}

fn env_var_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_float(name: &str) -> Option<f64> {
    env_var_parse(name)
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
