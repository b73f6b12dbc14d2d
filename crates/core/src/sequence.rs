//! Protein sequence rules shared by the inference and MSA services.

use crate::CoreError;

/// The twenty standard amino-acid one-letter codes.
pub const RESIDUE_ALPHABET: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Default cap on query sequence length, overridable via configuration.
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 2000;

/// Strip whitespace and upper-case a raw sequence.
///
/// Normalisation happens before validation so that callers may paste
/// FASTA-style wrapped sequences.
pub fn normalize_sequence(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Validate a normalised sequence: non-empty, within `max_length`, and
/// restricted to [`RESIDUE_ALPHABET`].
pub fn validate_sequence(sequence: &str, max_length: usize) -> Result<(), CoreError> {
    if sequence.is_empty() {
        return Err(CoreError::Validation("sequence must not be empty".to_string()));
    }

    if sequence.len() > max_length {
        return Err(CoreError::Validation(format!(
            "sequence has {} residues, maximum is {max_length}",
            sequence.len()
        )));
    }

    if let Some(bad) = sequence.chars().find(|c| !RESIDUE_ALPHABET.contains(*c)) {
        return Err(CoreError::Validation(format!(
            "sequence contains invalid residue '{bad}' (allowed: {RESIDUE_ALPHABET})"
        )));
    }

    Ok(())
}
