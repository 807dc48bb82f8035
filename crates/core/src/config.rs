use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::messages::{INGESTION_QUEUE, NOTIFICATION_QUEUE};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build config for a named profile (empty string = default). With a
    /// profile such as `PROD`, every key is first looked up as
    /// `{PROFILE}_{KEY}`, falling back to `{KEY}`. Call `load_dotenv()` first.
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{} upload_dir={}", self.server.host, self.server.port, self.server.upload_dir.display());
        tracing::info!(
            "  queue:    backend={} ingestion={} notification={} reconnect={}s max_deliveries={}",
            self.queue.backend,
            self.queue.ingestion_queue,
            self.queue.notification_queue,
            self.queue.reconnect_interval_secs,
            self.queue.max_deliveries
        );
        tracing::info!("  aws:      region={} endpoint={}", self.aws.region, self.aws.endpoint_url.as_deref().unwrap_or("(default)"));
        tracing::info!("  postgres: backend={} host={} db={}", self.postgres.backend, self.postgres.host, self.postgres.database);
        tracing::info!("  worker:   max_in_flight_rows={}", self.worker.max_in_flight_rows);
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Staging directory for uploaded payloads.
    pub upload_dir: PathBuf,
    /// Capacity of the push channel before slow subscribers start lagging.
    pub push_buffer: usize,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            upload_dir: PathBuf::from(profiled_env_or(p, "UPLOAD_DIR", "/tmp/intake")),
            push_buffer: profiled_env_u32(p, "PUSH_BUFFER", 256) as usize,
        }
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// "sqs" or "memory".
    pub backend: String,
    pub ingestion_queue: String,
    pub notification_queue: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval_secs: u64,
    /// Deliveries after which a still-failing message is dead-lettered.
    pub max_deliveries: u32,
    /// Long-poll wait per receive call (SQS caps at 20).
    pub wait_time_secs: u32,
    pub visibility_timeout_secs: u32,
    /// Messages taken per poll; 1 keeps a single unit of work in flight.
    pub prefetch: u32,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "QUEUE_BACKEND", "sqs"),
            ingestion_queue: profiled_env_or(p, "INGESTION_QUEUE", INGESTION_QUEUE),
            notification_queue: profiled_env_or(p, "NOTIFICATION_QUEUE", NOTIFICATION_QUEUE),
            reconnect_interval_secs: profiled_env_u64(p, "QUEUE_RECONNECT_SECS", 5),
            max_deliveries: profiled_env_u32(p, "QUEUE_MAX_DELIVERIES", 5),
            wait_time_secs: profiled_env_u32(p, "QUEUE_WAIT_TIME_SECS", 20).min(20),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 300),
            prefetch: profiled_env_u32(p, "QUEUE_PREFETCH", 1).max(1),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

// ── AWS / SQS ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// "postgres" or "memory".
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub url: Option<String>,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "STORE_BACKEND", "postgres"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "intake"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
            url: profiled_env_opt(p, "DATABASE_URL"),
        }
    }

    /// `DATABASE_URL` wins over the individual fields when set.
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Upper bound on row writes issued but not yet completed for one job.
    pub max_in_flight_rows: usize,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_in_flight_rows: profiled_env_u32(p, "WORKER_MAX_IN_FLIGHT_ROWS", 32).max(1) as usize,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_in_flight_rows: 32 }
    }
}
