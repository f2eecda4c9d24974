//! Engine configuration
//!
//! Defines all configurable parameters for the sandbox engine: which runner
//! is bound, where scratch space lives, default deadlines, the artifact store
//! and the cluster connection.

use sandrun_core::domain::resources::TierPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Which sandbox implementation the engine binds at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxMode {
    /// Subprocesses on this host
    #[default]
    Local,
    /// One pod per job on the cluster
    Cluster,
}

impl std::str::FromStr for SandboxMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "" => Ok(SandboxMode::Local),
            "cluster" | "kubernetes" | "k8s" => Ok(SandboxMode::Cluster),
            other => anyhow::bail!("unknown sandbox mode: {}", other),
        }
    }
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxMode::Local => f.write_str("local"),
            SandboxMode::Cluster => f.write_str("cluster"),
        }
    }
}

/// Artifact store connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// HTTP blob store
    Http {
        url: String,
        bucket: String,
        token: Option<String>,
    },
    /// Directory tree on this host (`file://` URLs)
    Filesystem { root: PathBuf, bucket: String },
}

impl StorageConfig {
    /// Parses `ARTIFACT_STORE_URL`-style values
    pub fn from_url(url: &str, bucket: String, token: Option<String>) -> Self {
        match url.strip_prefix("file://") {
            Some(root) => StorageConfig::Filesystem {
                root: PathBuf::from(root),
                bucket,
            },
            None => StorageConfig::Http {
                url: url.to_string(),
                bucket,
                token,
            },
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            StorageConfig::Http { bucket, .. } | StorageConfig::Filesystem { bucket, .. } => bucket,
        }
    }
}

/// Cluster connection and pod template settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Control plane API base URL
    pub api_url: String,
    /// Bearer token for the control plane
    pub token: Option<String>,
    /// Namespace sandbox pods are created in
    pub namespace: String,
    /// Image running the test step
    pub runner_image: String,
    /// Image fetching and unpacking the bundle
    pub init_image: String,
    /// Secret holding the artifact store `endpoint` and `token` for pods
    pub artifact_secret: String,
    /// Taint key of dedicated sandbox nodes
    pub node_taint: String,
    /// Node selector for dedicated sandbox nodes; empty schedules anywhere
    pub node_selector: Option<(String, String)>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token: None,
            namespace: "sandrun-sandboxes".to_string(),
            runner_image: "mcr.microsoft.com/playwright:v1.40.0-jammy".to_string(),
            init_image: "busybox:1.36".to_string(),
            artifact_secret: "sandrun-artifact-store".to_string(),
            node_taint: "sandrun.io/sandbox".to_string(),
            node_selector: None,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: SandboxMode,

    /// Parent of the per-run scratch directories (local mode)
    pub work_dir: PathBuf,

    /// Deadline for requests that do not carry one
    pub default_timeout: Duration,

    /// How often an in-flight job emits a heartbeat
    pub heartbeat_interval: Duration,

    /// Package manager binaries (local mode)
    pub npm_bin: String,
    pub npx_bin: String,

    /// Artifact store; `None` disables uploads
    pub storage: Option<StorageConfig>,

    pub cluster: ClusterConfig,

    /// Resources per tier (cluster mode)
    pub tiers: TierPolicy,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(mode: SandboxMode) -> Self {
        Self {
            mode,
            work_dir: std::env::temp_dir().join("sandrun-sandboxes"),
            default_timeout: Duration::from_secs(900), // 15 minutes
            heartbeat_interval: Duration::from_secs(10),
            npm_bin: "npm".to_string(),
            npx_bin: "npx".to_string(),
            storage: None,
            cluster: ClusterConfig::default(),
            tiers: TierPolicy::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - SANDBOX_MODE (optional, `local` or `cluster`, default: local)
    /// - SANDBOX_WORK_DIR (optional, default: <tmp>/sandrun-sandboxes)
    /// - SANDBOX_DEFAULT_TIMEOUT (optional, seconds, default: 900)
    /// - SANDBOX_HEARTBEAT_INTERVAL (optional, seconds, default: 10)
    /// - SANDBOX_NPM_BIN / SANDBOX_NPX_BIN (optional, default: npm / npx)
    /// - ARTIFACT_STORE_URL (optional, `http(s)://` or `file://`; unset disables uploads)
    /// - ARTIFACT_STORE_BUCKET (optional, default: sandrun)
    /// - ARTIFACT_STORE_TOKEN (optional)
    /// - CLUSTER_API_URL, CLUSTER_TOKEN, CLUSTER_NAMESPACE, CLUSTER_RUNNER_IMAGE,
    ///   CLUSTER_INIT_IMAGE, CLUSTER_ARTIFACT_SECRET (optional)
    /// - CLUSTER_NODE_SELECTOR (optional, `key=value`)
    pub fn from_env() -> anyhow::Result<Self> {
        let mode = match std::env::var("SANDBOX_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => SandboxMode::Local,
        };

        let mut config = Self::new(mode);

        if let Ok(dir) = std::env::var("SANDBOX_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        config.default_timeout = std::env::var("SANDBOX_DEFAULT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.default_timeout);

        config.heartbeat_interval = std::env::var("SANDBOX_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.heartbeat_interval);

        if let Ok(bin) = std::env::var("SANDBOX_NPM_BIN") {
            config.npm_bin = bin;
        }
        if let Ok(bin) = std::env::var("SANDBOX_NPX_BIN") {
            config.npx_bin = bin;
        }

        if let Ok(url) = std::env::var("ARTIFACT_STORE_URL") {
            let bucket =
                std::env::var("ARTIFACT_STORE_BUCKET").unwrap_or_else(|_| "sandrun".to_string());
            let token = std::env::var("ARTIFACT_STORE_TOKEN").ok();
            config.storage = Some(StorageConfig::from_url(&url, bucket, token));
        }

        let cluster = &mut config.cluster;
        if let Ok(url) = std::env::var("CLUSTER_API_URL") {
            cluster.api_url = url;
        }
        cluster.token = std::env::var("CLUSTER_TOKEN").ok();
        if let Ok(ns) = std::env::var("CLUSTER_NAMESPACE") {
            cluster.namespace = ns;
        }
        if let Ok(image) = std::env::var("CLUSTER_RUNNER_IMAGE") {
            cluster.runner_image = image;
        }
        if let Ok(image) = std::env::var("CLUSTER_INIT_IMAGE") {
            cluster.init_image = image;
        }
        if let Ok(secret) = std::env::var("CLUSTER_ARTIFACT_SECRET") {
            cluster.artifact_secret = secret;
        }
        if let Ok(selector) = std::env::var("CLUSTER_NODE_SELECTOR") {
            let (key, value) = selector
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("CLUSTER_NODE_SELECTOR must be key=value"))?;
            cluster.node_selector = Some((key.to_string(), value.to_string()));
        }

        Ok(config)
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout.as_secs() == 0 {
            anyhow::bail!("default_timeout must be greater than 0");
        }

        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        self.tiers.validate()?;

        if let Some(StorageConfig::Http { url, bucket, .. }) = &self.storage {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("artifact store url must start with http://, https:// or file://");
            }
            if bucket.is_empty() {
                anyhow::bail!("artifact store bucket cannot be empty");
            }
        }

        match self.mode {
            SandboxMode::Local => {
                if self.npm_bin.is_empty() || self.npx_bin.is_empty() {
                    anyhow::bail!("npm and npx binaries cannot be empty");
                }
            }
            SandboxMode::Cluster => {
                if !self.cluster.api_url.starts_with("http://")
                    && !self.cluster.api_url.starts_with("https://")
                {
                    anyhow::bail!("cluster api url must start with http:// or https://");
                }
                if self.cluster.namespace.is_empty() {
                    anyhow::bail!("cluster namespace cannot be empty");
                }
                // Pods fetch bundles and push results over HTTP themselves
                if !matches!(self.storage, Some(StorageConfig::Http { .. })) {
                    anyhow::bail!("cluster mode requires an http artifact store");
                }
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(SandboxMode::Local)
    }
}
