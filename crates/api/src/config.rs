use std::path::PathBuf;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// InferenceService port (default: `50051`).
    pub inference_port: u16,
    /// TrainingService port (default: `50052`).
    pub training_port: u16,
    /// MSAService port (default: `50053`).
    pub msa_port: u16,
    /// Root under which per-job work directories are created.
    pub cache_dir: PathBuf,
    /// Executor permit count: jobs beyond this stay `pending`.
    pub max_concurrent_jobs: usize,
    /// Validation cap on query sequence length.
    pub max_sequence_length: usize,
    /// Graceful shutdown drain window in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Structure prediction command line (program + base args).
    pub predict_command: Vec<String>,
    /// Alignment search command line.
    pub msa_command: Vec<String>,
    /// Training launcher command line.
    pub train_command: Vec<String>,
    /// Sequence database for alignment search; checked at execution time,
    /// not at startup.
    pub sequence_db_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                |
    /// |----------------------------------|------------------------|
    /// | `FOLDSERVE_HOST`                 | `0.0.0.0`              |
    /// | `FOLDSERVE_INFERENCE_PORT`       | `50051`                |
    /// | `FOLDSERVE_TRAINING_PORT`        | `50052`                |
    /// | `FOLDSERVE_MSA_PORT`             | `50053`                |
    /// | `FOLDSERVE_CACHE_DIR`            | `$HOME/.foldserve/cache` |
    /// | `FOLDSERVE_MAX_CONCURRENT_JOBS`  | `4`                    |
    /// | `FOLDSERVE_MAX_SEQUENCE_LENGTH`  | `2000`                 |
    /// | `FOLDSERVE_SHUTDOWN_TIMEOUT_SECS`| `30`                   |
    /// | `FOLDSERVE_PREDICT_CMD`          | `boltz predict`        |
    /// | `FOLDSERVE_MSA_CMD`              | `hhblits`              |
    /// | `FOLDSERVE_TRAIN_CMD`            | `boltz train`          |
    /// | `FOLDSERVE_SEQUENCE_DB_PATH`     | unset                  |
    pub fn from_env() -> Self {
        let host = std::env::var("FOLDSERVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let inference_port = port_from_env("FOLDSERVE_INFERENCE_PORT", 50051);
        let training_port = port_from_env("FOLDSERVE_TRAINING_PORT", 50052);
        let msa_port = port_from_env("FOLDSERVE_MSA_PORT", 50053);

        let cache_dir = std::env::var("FOLDSERVE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_dir());

        let max_concurrent_jobs: usize = std::env::var("FOLDSERVE_MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("FOLDSERVE_MAX_CONCURRENT_JOBS must be a valid usize");

        let max_sequence_length: usize = std::env::var("FOLDSERVE_MAX_SEQUENCE_LENGTH")
            .unwrap_or_else(|_| {
                foldserve_core::sequence::DEFAULT_MAX_SEQUENCE_LENGTH.to_string()
            })
            .parse()
            .expect("FOLDSERVE_MAX_SEQUENCE_LENGTH must be a valid usize");

        let shutdown_timeout_secs: u64 = std::env::var("FOLDSERVE_SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("FOLDSERVE_SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let predict_command = command_from_env("FOLDSERVE_PREDICT_CMD", "boltz predict");
        let msa_command = command_from_env("FOLDSERVE_MSA_CMD", "hhblits");
        let train_command = command_from_env("FOLDSERVE_TRAIN_CMD", "boltz train");

        let sequence_db_path = std::env::var("FOLDSERVE_SEQUENCE_DB_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Self {
            host,
            inference_port,
            training_port,
            msa_port,
            cache_dir,
            max_concurrent_jobs,
            max_sequence_length,
            shutdown_timeout_secs,
            predict_command,
            msa_command,
            train_command,
            sequence_db_path,
        }
    }
}

fn port_from_env(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|_| panic!("{var} must be a valid port number"))
}

/// Split a command line on whitespace into program + base arguments.
fn command_from_env(var: &str, default: &str) -> Vec<String> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        panic!("{var} must not be empty");
    }
    parts
}

fn default_cache_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".foldserve").join("cache"),
        Err(_) => PathBuf::from(".foldserve/cache"),
    }
}
