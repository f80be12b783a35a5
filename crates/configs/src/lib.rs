use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

/// Limits applied by the job orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound for a single long-poll status wait.
    #[serde(default = "default_max_status_wait")]
    pub max_status_wait_secs: f64,
    /// Iterations used when a train request omits `solver.iterations`.
    #[serde(default = "default_iterations")]
    pub default_iterations: u64,
    /// Relative service repositories are resolved against this directory.
    #[serde(default = "default_repository_root")]
    pub repository_root: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_status_wait_secs: default_max_status_wait(),
            default_iterations: default_iterations(),
            repository_root: default_repository_root(),
        }
    }
}

/// Settings of the built-in simulated solver backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    #[serde(default = "default_display")]
    pub display: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { step_ms: default_step_ms(), display: default_display() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub addr: String,
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { addr: default_admin_addr(), enabled: default_admin_enabled() }
    }
}

fn default_max_status_wait() -> f64 { 300.0 }
fn default_iterations() -> u64 { 10_000 }
fn default_repository_root() -> String { "models".into() }
fn default_step_ms() -> u64 { 1 }
fn default_display() -> u64 { 10 }
fn default_admin_addr() -> String { "127.0.0.1:9188".into() }
fn default_admin_enabled() -> bool { true }

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

pub fn load_from_str(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load and validate `CONFIG_PATH`. A missing config file yields validated
    /// defaults with `SERVER_HOST` / `SERVER_PORT` applied.
    pub fn load_or_default() -> Result<Self> {
        let mut cfg = match load_default() {
            Ok(cfg) => cfg,
            Err(e) if is_not_found(&e) => {
                let mut cfg = AppConfig::default();
                cfg.server.apply_env();
                cfg
            }
            Err(e) => return Err(e),
        };
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.orchestrator.validate()?;
        self.simulator.normalize();
        if self.admin.enabled && self.admin.addr.trim().is_empty() {
            return Err(anyhow!("admin.addr must be set when admin.enabled = true"));
        }
        Ok(())
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map(|io| io.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be in 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            self.port = port;
        }
        if let Some(w) = std::env::var("TOKIO_WORKER_THREADS").ok().and_then(|v| v.parse::<usize>().ok()) {
            self.worker_threads = Some(w);
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_status_wait_secs.is_finite() || self.max_status_wait_secs < 0.0 {
            return Err(anyhow!("orchestrator.max_status_wait_secs must be a non-negative number"));
        }
        if self.default_iterations == 0 {
            return Err(anyhow!("orchestrator.default_iterations must be >= 1"));
        }
        if self.repository_root.trim().is_empty() {
            return Err(anyhow!("orchestrator.repository_root must not be empty"));
        }
        Ok(())
    }

    pub fn max_status_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_status_wait_secs).unwrap_or(Duration::MAX)
    }
}

impl SimulatorConfig {
    fn normalize(&mut self) {
        if self.display == 0 {
            self.display = 1;
        }
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}
