//! Parsing of OpenSSH `authorized_keys` lines.
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Key algorithms accepted in key lines.
pub const ALGORITHMS: &[&str] = &[
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "ssh-ed25519",
    "ssh-dss",
    "ssh-rsa",
];

/// Why a line is not a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Blank line or comment.
    #[error("line is empty")]
    Empty,
    /// Neither the first nor the second field is a known algorithm.
    #[error("unknown key algorithm {0:?}")]
    UnknownAlgorithm(String),
    /// Nothing follows the algorithm.
    #[error("missing key payload")]
    MissingPayload,
    /// Options contain an unterminated quoted string.
    #[error("unterminated quote in key options")]
    UnterminatedQuote,
}

/// One public key with its options and comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Comma-separated options, or empty.
    pub options: String,
    /// Key algorithm, one of [`ALGORITHMS`].
    pub algorithm: String,
    /// Base64 key blob.
    pub payload: String,
    /// Free-form comment, or empty.
    pub comment: String,
}

impl Key {
    /// Parse one line.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the line is blank, a comment, or not a key.
    pub fn parse(line: &str) -> Result<Self, KeyError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Err(KeyError::Empty);
        }

        let (first, rest) = split_field(line)?;
        let (options, algorithm, rest) = if is_algorithm(first) {
            (String::new(), first, rest)
        } else {
            let (algorithm, rest) = split_field(rest)?;
            if !is_algorithm(algorithm) {
                return Err(KeyError::UnknownAlgorithm(algorithm.to_string()));
            }
            (first.to_string(), algorithm, rest)
        };

        let (payload, comment) = split_field(rest)?;
        if payload.is_empty() {
            return Err(KeyError::MissingPayload);
        }
        Ok(Self {
            options,
            algorithm: algorithm.to_string(),
            payload: payload.to_string(),
            comment: comment.trim().to_string(),
        })
    }

    /// Whether `other` is the same key with the same options, ignoring the
    /// comment.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.options == other.options
            && self.algorithm == other.algorithm
            && self.payload == other.payload
    }

    /// OpenSSH-style `SHA256:` fingerprint of the key blob, or `None` if the
    /// payload is not valid base64.
    #[must_use]
    pub fn sha256_fingerprint(&self) -> Option<String> {
        let blob = STANDARD.decode(&self.payload).ok()?;
        let digest = Sha256::digest(&blob);
        Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            self.options.as_str(),
            self.algorithm.as_str(),
            self.payload.as_str(),
            self.comment.as_str(),
        ];
        let joined: Vec<&str> = fields.into_iter().filter(|f| !f.is_empty()).collect();
        f.write_str(&joined.join(" "))
    }
}

fn is_algorithm(field: &str) -> bool {
    ALGORITHMS.contains(&field)
}

/// Split off the first whitespace-delimited field. Whitespace inside
/// double quotes does not end a field.
fn split_field(text: &str) -> Result<(&str, &str), KeyError> {
    let text = text.trim_start();
    let mut quoted = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                let (field, rest) = text.split_at(idx);
                return Ok((field, rest.trim_start()));
            }
            _ => {}
        }
    }
    if quoted {
        return Err(KeyError::UnterminatedQuote);
    }
    Ok((text, ""))
}
