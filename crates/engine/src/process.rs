//! Subprocess execution backend.
//!
//! Runs the configured external command line per job kind (structure
//! prediction CLI, `hhblits` for alignment search, the training launcher)
//! as a supervised child process. Progress flows back over a line protocol
//! on the child's stdout:
//!
//! ```text
//! PROGRESS 0.42
//! EPOCH 3 train_loss=0.41 val_loss=0.57 checkpoint=/runs/e3.ckpt
//! ```
//!
//! Any other output line is ignored. A non-zero exit status fails the job
//! with the tail of the captured stderr as the error message. When the
//! job's cancellation token trips, the child is killed and the execution
//! reports [`BackendError::Cancelled`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use foldserve_core::job::TrainingMetrics;
use foldserve_core::params::{JobParams, MsaParams, PredictionParams, TrainingParams};

use crate::backend::{
    BackendError, ExecutionBackend, ExecutionContext, ExecutionOutcome, ProgressReporter,
};

/// How much of the child's stderr is kept for the error message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Stdout line prefix for fractional progress reports.
const PROGRESS_PREFIX: &str = "PROGRESS ";

/// Stdout line prefix for per-epoch training reports.
const EPOCH_PREFIX: &str = "EPOCH ";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// External command lines and paths the backend is wired to.
///
/// Each command is a program plus base arguments; the backend appends the
/// per-job arguments. The commands themselves are opaque collaborator
/// configuration.
#[derive(Debug, Clone)]
pub struct ProcessBackendConfig {
    /// Root under which per-job work directories are created.
    pub cache_dir: PathBuf,
    pub predict_command: Vec<String>,
    pub msa_command: Vec<String>,
    pub train_command: Vec<String>,
    /// Sequence database for alignment search; required by MSA jobs at
    /// execution time.
    pub sequence_db_path: Option<PathBuf>,
}

/// Production [`ExecutionBackend`] driving external command lines.
pub struct ProcessBackend {
    config: ProcessBackendConfig,
}

impl ProcessBackend {
    pub fn new(config: ProcessBackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, BackendError> {
        let params = ctx.params.clone();
        match &params {
            JobParams::Prediction(p) => self.run_prediction(&ctx, p).await,
            JobParams::Msa(p) => self.run_msa(&ctx, p).await,
            JobParams::Training(p) => self.run_training(&ctx, p).await,
        }
    }
}

impl ProcessBackend {
    async fn run_prediction(
        &self,
        ctx: &ExecutionContext,
        params: &PredictionParams,
    ) -> Result<ExecutionOutcome, BackendError> {
        let workdir = self.config.cache_dir.join("predictions").join(&ctx.job_id);
        tokio::fs::create_dir_all(&workdir).await?;

        let fasta_path = workdir.join("query.fasta");
        tokio::fs::write(&fasta_path, format!(">query\n{}\n", params.sequence)).await?;

        let mut cmd = build_command(&self.config.predict_command, "prediction")?;
        cmd.arg(&fasta_path)
            .arg("--out_dir")
            .arg(&workdir)
            .arg("--recycling_steps")
            .arg(params.recycling_steps.to_string())
            .arg("--sampling_steps")
            .arg(params.sampling_steps.to_string())
            .arg("--diffusion_samples")
            .arg(params.diffusion_samples.to_string())
            .arg("--output_format")
            .arg(&params.output_format)
            .arg("--model_version")
            .arg(&params.model_version);

        run_supervised(cmd, "prediction", &ctx.progress, &ctx.cancel).await?;

        let result = workdir.join(format!("prediction.{}", params.output_format));
        Ok(ExecutionOutcome {
            result_path: result.to_string_lossy().into_owned(),
        })
    }

    async fn run_msa(
        &self,
        ctx: &ExecutionContext,
        params: &MsaParams,
    ) -> Result<ExecutionOutcome, BackendError> {
        let db_path = self
            .config
            .sequence_db_path
            .as_deref()
            .ok_or_else(|| {
                BackendError::Unavailable("sequence database path is not configured".to_string())
            })?;
        if !db_path.exists() {
            return Err(BackendError::Unavailable(format!(
                "sequence database not found at {}",
                db_path.display()
            )));
        }

        let workdir = self.config.cache_dir.join("msa").join(&ctx.job_id);
        tokio::fs::create_dir_all(&workdir).await?;

        let fasta_path = workdir.join("query.fasta");
        tokio::fs::write(&fasta_path, format!(">query\n{}\n", params.sequence)).await?;

        let output_path = workdir.join("msa.a3m");

        let mut cmd = build_command(&self.config.msa_command, "alignment")?;
        cmd.arg("-i")
            .arg(&fasta_path)
            .arg("-d")
            .arg(db_path)
            .arg("-oa3m")
            .arg(&output_path)
            .arg("-n")
            .arg(params.num_iterations.to_string())
            .arg("-maxseq")
            .arg(params.max_seqs.to_string());

        // The identity filter is off at 0.
        if params.min_identity > 0.0 {
            cmd.arg("-id")
                .arg(((params.min_identity * 100.0) as i32).to_string());
        }

        run_supervised(cmd, "alignment", &ctx.progress, &ctx.cancel).await?;

        Ok(ExecutionOutcome {
            result_path: output_path.to_string_lossy().into_owned(),
        })
    }

    async fn run_training(
        &self,
        ctx: &ExecutionContext,
        params: &TrainingParams,
    ) -> Result<ExecutionOutcome, BackendError> {
        tokio::fs::create_dir_all(&params.output_dir).await?;

        let mut cmd = build_command(&self.config.train_command, "training")?;
        cmd.arg(&params.config_path)
            .arg("--devices")
            .arg(params.num_gpus.to_string())
            .arg("--output_dir")
            .arg(&params.output_dir)
            .arg("--experiment")
            .arg(&params.experiment_name);

        if params.resume {
            if let Some(checkpoint) = &params.checkpoint {
                cmd.arg("--resume").arg(checkpoint);
            }
        }

        cmd.args(&params.args);

        // Deterministic ordering for the override flags.
        let mut overrides: Vec<_> = params.hyperparameters.iter().collect();
        overrides.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in overrides {
            cmd.arg("--set").arg(format!("{key}={value}"));
        }

        run_supervised(cmd, "training", &ctx.progress, &ctx.cancel).await?;

        Ok(ExecutionOutcome {
            result_path: params.output_dir.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Child process supervision
// ---------------------------------------------------------------------------

fn build_command(command_line: &[String], tool: &str) -> Result<Command, BackendError> {
    let (program, base_args) = command_line
        .split_first()
        .ok_or_else(|| BackendError::Unavailable(format!("{tool} command is not configured")))?;

    let mut cmd = Command::new(program);
    cmd.args(base_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(cmd)
}

/// Run the child to completion: forward progress lines, collect stderr,
/// kill on cancellation.
async fn run_supervised(
    mut cmd: Command,
    tool: &str,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<(), BackendError> {
    let mut child = cmd.spawn().map_err(|e| {
        BackendError::Unavailable(format!("failed to launch {tool} command: {e}"))
    })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    // Drain stderr concurrently so a chatty child cannot fill the pipe and
    // stall itself.
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(BackendError::Cancelled);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_output_line(&line, progress),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(tool, error = %e, "Failed reading child stdout");
                    break;
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stderr_task.abort();
            return Err(BackendError::Cancelled);
        }
        status = child.wait() => status?,
    };

    let stderr_text = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(BackendError::Failed(format!(
            "{tool} command exited with {status}: {}",
            stderr_tail(&stderr_text)
        )));
    }

    Ok(())
}

fn handle_output_line(line: &str, progress: &ProgressReporter) {
    match parse_output_line(line) {
        Some(OutputLine::Progress(fraction)) => progress.report(fraction),
        Some(OutputLine::Epoch(metrics)) => progress.report_training(metrics),
        None => {}
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    match trimmed.char_indices().nth_back(STDERR_TAIL_BYTES) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

// ---------------------------------------------------------------------------
// Output line protocol
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(f32),
    Epoch(TrainingMetrics),
}

fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        return rest.trim().parse::<f32>().ok().map(OutputLine::Progress);
    }

    if let Some(rest) = line.strip_prefix(EPOCH_PREFIX) {
        let mut tokens = rest.split_whitespace();
        let current_epoch = tokens.next()?.parse::<f32>().ok()?;

        let mut metrics = TrainingMetrics {
            current_epoch,
            ..TrainingMetrics::default()
        };

        for token in tokens {
            match token.split_once('=') {
                Some(("train_loss", v)) => metrics.train_loss = v.parse().ok()?,
                Some(("val_loss", v)) => metrics.val_loss = v.parse().ok()?,
                Some(("checkpoint", v)) => metrics.checkpoint_path = Some(v.to_string()),
                _ => {}
            }
        }

        return Some(OutputLine::Epoch(metrics));
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use foldserve_core::params::JobParams;
    use foldserve_events::EventBus;
    use foldserve_registry::JobRegistry;

    fn msa_params() -> JobParams {
        JobParams::Msa(MsaParams {
            sequence: "MVKVGVNG".to_string(),
            ..MsaParams::default()
        })
    }

    /// Write an executable shell script into `dir` and return its path.
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Set up a registry with one running MSA job and a context for it.
    fn running_context(registry: &Arc<JobRegistry>, bus: &Arc<EventBus>) -> ExecutionContext {
        let job_id = registry.create(msa_params(), None).unwrap();
        registry.mark_running(&job_id).unwrap();
        let cancel = registry.cancellation_token(&job_id).unwrap();
        let progress = ProgressReporter::new(
            Arc::clone(registry),
            Arc::clone(bus),
            job_id.clone(),
            foldserve_core::job::JobKind::Msa,
        );
        ExecutionContext {
            job_id,
            params: msa_params(),
            progress,
            cancel,
        }
    }

    fn backend_with(script: PathBuf, tmp: &Path) -> ProcessBackend {
        // Any existing file works as the "database".
        let db = tmp.join("seqdb");
        std::fs::write(&db, "").unwrap();

        ProcessBackend::new(ProcessBackendConfig {
            cache_dir: tmp.join("cache"),
            predict_command: vec![script.to_string_lossy().into_owned()],
            msa_command: vec![script.to_string_lossy().into_owned()],
            train_command: vec![script.to_string_lossy().into_owned()],
            sequence_db_path: Some(db),
        })
    }

    // -----------------------------------------------------------------------
    // Line protocol
    // -----------------------------------------------------------------------

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_output_line("PROGRESS 0.42"),
            Some(OutputLine::Progress(0.42))
        );
        assert_eq!(
            parse_output_line("  PROGRESS 1.0  "),
            Some(OutputLine::Progress(1.0))
        );
    }

    #[test]
    fn parses_epoch_lines() {
        let parsed = parse_output_line("EPOCH 3 train_loss=0.41 val_loss=0.57 checkpoint=/runs/e3.ckpt");
        let metrics = match parsed {
            Some(OutputLine::Epoch(m)) => m,
            other => panic!("expected epoch line, got {other:?}"),
        };
        assert_eq!(metrics.current_epoch, 3.0);
        assert_eq!(metrics.train_loss, 0.41);
        assert_eq!(metrics.val_loss, 0.57);
        assert_eq!(metrics.checkpoint_path.as_deref(), Some("/runs/e3.ckpt"));
    }

    #[test]
    fn epoch_losses_are_optional() {
        let parsed = parse_output_line("EPOCH 1");
        assert_matches!(parsed, Some(OutputLine::Epoch(_)));
    }

    #[test]
    fn other_lines_are_ignored() {
        assert_eq!(parse_output_line("loading model weights"), None);
        assert_eq!(parse_output_line("PROGRESS banana"), None);
        assert_eq!(parse_output_line(""), None);
    }

    // -----------------------------------------------------------------------
    // Child supervision
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn successful_run_reports_progress_and_result_path() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "fake-hhblits",
            "echo 'PROGRESS 0.5'\necho 'PROGRESS 1.0'\nexit 0",
        );
        let backend = backend_with(script, tmp.path());

        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let ctx = running_context(&registry, &bus);
        let job_id = ctx.job_id.clone();

        let outcome = backend.execute(ctx).await.unwrap();
        assert!(outcome.result_path.ends_with("msa.a3m"));
        assert_eq!(registry.get(&job_id).unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn failing_command_surfaces_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "fake-hhblits",
            "echo 'database is corrupt' >&2\nexit 3",
        );
        let backend = backend_with(script, tmp.path());

        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let ctx = running_context(&registry, &bus);

        let err = backend.execute(ctx).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("database is corrupt"), "got: {message}");
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "fake-hhblits", "sleep 30");
        let backend = backend_with(script, tmp.path());

        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let ctx = running_context(&registry, &bus);
        let cancel = ctx.cancel.clone();

        let handle = tokio::spawn(async move { backend.execute(ctx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancellation should not hang")
            .unwrap();
        assert_matches!(result, Err(BackendError::Cancelled));
    }

    #[tokio::test]
    async fn msa_without_database_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "fake-hhblits", "exit 0");
        let mut backend = backend_with(script, tmp.path());
        backend.config.sequence_db_path = None;

        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let ctx = running_context(&registry, &bus);

        let err = backend.execute(ctx).await.unwrap_err();
        assert_matches!(err, BackendError::Unavailable(_));
    }
}
