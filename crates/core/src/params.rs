//! Typed request payloads for the three job kinds, with their validation
//! rules.
//!
//! Validation runs synchronously at submission time, before a job id is
//! allocated; a request that fails any rule here never reaches the
//! registry. Sequences are expected to be normalised (see
//! [`crate::sequence::normalize_sequence`]) before validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::JobKind;
use crate::sequence::validate_sequence;
use crate::CoreError;

// ---------------------------------------------------------------------------
// Defaults and bounds
// ---------------------------------------------------------------------------

pub const DEFAULT_RECYCLING_STEPS: i32 = 3;
pub const MAX_RECYCLING_STEPS: i32 = 32;

pub const DEFAULT_SAMPLING_STEPS: i32 = 200;
pub const MAX_SAMPLING_STEPS: i32 = 5000;

pub const DEFAULT_DIFFUSION_SAMPLES: i32 = 1;
pub const MAX_DIFFUSION_SAMPLES: i32 = 25;

pub const DEFAULT_OUTPUT_FORMAT: &str = "mmcif";
pub const OUTPUT_FORMATS: &[&str] = &["mmcif", "pdb"];

pub const DEFAULT_MODEL_VERSION: &str = "latest";

pub const DEFAULT_MAX_SEQS: i32 = 256;
pub const DEFAULT_NUM_ITERATIONS: i32 = 3;
pub const MAX_NUM_ITERATIONS: i32 = 8;

// ---------------------------------------------------------------------------
// PredictionParams
// ---------------------------------------------------------------------------

/// Parameters for a structure prediction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionParams {
    pub sequence: String,
    pub recycling_steps: i32,
    pub sampling_steps: i32,
    pub diffusion_samples: i32,
    /// `mmcif` or `pdb`.
    pub output_format: String,
    /// Checkpoint selector understood by the prediction backend.
    pub model_version: String,
}

impl Default for PredictionParams {
    fn default() -> Self {
        Self {
            sequence: String::new(),
            recycling_steps: DEFAULT_RECYCLING_STEPS,
            sampling_steps: DEFAULT_SAMPLING_STEPS,
            diffusion_samples: DEFAULT_DIFFUSION_SAMPLES,
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
        }
    }
}

impl PredictionParams {
    pub fn validate(&self, max_sequence_length: usize) -> Result<(), CoreError> {
        validate_sequence(&self.sequence, max_sequence_length)?;
        validate_range("recycling_steps", self.recycling_steps, MAX_RECYCLING_STEPS)?;
        validate_range("sampling_steps", self.sampling_steps, MAX_SAMPLING_STEPS)?;
        validate_range(
            "diffusion_samples",
            self.diffusion_samples,
            MAX_DIFFUSION_SAMPLES,
        )?;
        validate_output_format(&self.output_format)?;

        if self.model_version.is_empty() {
            return Err(CoreError::Validation(
                "model_version must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MsaParams
// ---------------------------------------------------------------------------

/// Parameters for a multiple-sequence-alignment search job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsaParams {
    pub sequence: String,
    /// Cap on sequences kept in the alignment.
    pub max_seqs: i32,
    /// Minimum pairwise identity filter in `[0.0, 1.0]`; 0 disables it.
    pub min_identity: f32,
    pub num_iterations: i32,
}

impl Default for MsaParams {
    fn default() -> Self {
        Self {
            sequence: String::new(),
            max_seqs: DEFAULT_MAX_SEQS,
            min_identity: 0.0,
            num_iterations: DEFAULT_NUM_ITERATIONS,
        }
    }
}

impl MsaParams {
    pub fn validate(&self, max_sequence_length: usize) -> Result<(), CoreError> {
        validate_sequence(&self.sequence, max_sequence_length)?;

        if self.max_seqs < 1 {
            return Err(CoreError::Validation(format!(
                "max_seqs must be positive, got {}",
                self.max_seqs
            )));
        }

        if !(0.0..=1.0).contains(&self.min_identity) || self.min_identity.is_nan() {
            return Err(CoreError::Validation(format!(
                "min_identity must be within [0.0, 1.0], got {}",
                self.min_identity
            )));
        }

        validate_range("num_iterations", self.num_iterations, MAX_NUM_ITERATIONS)?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TrainingParams
// ---------------------------------------------------------------------------

/// Parameters for a model training job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Training configuration file understood by the training backend.
    pub config_path: String,
    /// Extra command-line arguments passed through verbatim.
    pub args: Vec<String>,
    pub num_gpus: i32,
    pub output_dir: String,
    /// Resume from `checkpoint` instead of starting fresh.
    pub resume: bool,
    pub checkpoint: Option<String>,
    pub experiment_name: String,
    /// Free-form overrides passed through to the training backend.
    pub hyperparameters: HashMap<String, String>,
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.config_path.is_empty() {
            return Err(CoreError::Validation(
                "config_path must not be empty".to_string(),
            ));
        }

        if self.num_gpus < 1 {
            return Err(CoreError::Validation(format!(
                "num_gpus must be a positive integer, got {}",
                self.num_gpus
            )));
        }

        if self.output_dir.is_empty() {
            return Err(CoreError::Validation(
                "output_dir must not be empty".to_string(),
            ));
        }

        if self.experiment_name.is_empty() {
            return Err(CoreError::Validation(
                "experiment_name must not be empty".to_string(),
            ));
        }

        if self.resume && self.checkpoint.as_deref().unwrap_or("").is_empty() {
            return Err(CoreError::Validation(
                "checkpoint is required when resume is set".to_string(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JobParams
// ---------------------------------------------------------------------------

/// The typed request payload of a job, one variant per [`JobKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobParams {
    #[serde(rename = "inference")]
    Prediction(PredictionParams),
    Msa(MsaParams),
    Training(TrainingParams),
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Prediction(_) => JobKind::Inference,
            JobParams::Msa(_) => JobKind::Msa,
            JobParams::Training(_) => JobKind::Training,
        }
    }

    /// Run the kind-specific validation rules.
    pub fn validate(&self, max_sequence_length: usize) -> Result<(), CoreError> {
        match self {
            JobParams::Prediction(p) => p.validate(max_sequence_length),
            JobParams::Msa(p) => p.validate(max_sequence_length),
            JobParams::Training(p) => p.validate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Require `1 <= value <= max` for a named integer field.
fn validate_range(field: &str, value: i32, max: i32) -> Result<(), CoreError> {
    if value < 1 || value > max {
        return Err(CoreError::Validation(format!(
            "{field} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(())
}

fn validate_output_format(format: &str) -> Result<(), CoreError> {
    if !OUTPUT_FORMATS.contains(&format) {
        return Err(CoreError::Validation(format!(
            "Unsupported output format '{format}' (allowed: {})",
            OUTPUT_FORMATS.join(", ")
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
