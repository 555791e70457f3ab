//! Splitting and decoding of the sandbox output stream.
//!
//! The tool scripts print their own diagnostics, then a single `0xFF`, then
//! the artifact or program output. Diagnostics come from the toolchain and
//! must be valid UTF-8; whatever follows the sentinel is user controlled and
//! is decoded lossily.

use serde::Serialize;

use crate::errors::Result;
use crate::highlight::{Highlighter, Language};
use crate::params::EmitKind;
use crate::run::RawExecution;

pub const SENTINEL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments<'a> {
    pub diagnostics: &'a [u8],
    pub output: Option<&'a [u8]>,
}

/// Splits on the first sentinel only; later `0xFF` bytes belong to the output.
pub fn split(bytes: &[u8]) -> Segments<'_> {
    match bytes.iter().position(|&b| b == SENTINEL) {
        Some(index) => Segments {
            diagnostics: &bytes[..index],
            output: Some(&bytes[index + 1..]),
        },
        None => Segments {
            diagnostics: bytes,
            output: None,
        },
    }
}

/// JSON bodies returned by the three endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PlaygroundResponse {
    Result {
        result: String,
    },
    Error {
        error: String,
    },
    Separate {
        rustc: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        program: Option<String>,
    },
}

impl PlaygroundResponse {
    pub fn result(result: impl Into<String>) -> Self {
        PlaygroundResponse::Result {
            result: result.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        PlaygroundResponse::Error {
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlaygroundResponse::Error { .. })
    }
}

fn strict(bytes: &[u8]) -> Result<String> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn decode_evaluate(raw: &RawExecution, separate_output: bool) -> Result<PlaygroundResponse> {
    let segments = split(&raw.output);
    if separate_output {
        return Ok(PlaygroundResponse::Separate {
            rustc: strict(segments.diagnostics)?,
            program: segments.output.map(lossy),
        });
    }
    let mut combined = segments.diagnostics.to_vec();
    if let Some(output) = segments.output {
        combined.extend_from_slice(output);
    }
    Ok(PlaygroundResponse::result(lossy(&combined)))
}

pub fn decode_format(raw: &RawExecution) -> Result<PlaygroundResponse> {
    let text = strict(&raw.output)?;
    if raw.success() {
        Ok(PlaygroundResponse::result(text))
    } else {
        Ok(PlaygroundResponse::error(text))
    }
}

pub fn decode_compile(
    raw: &RawExecution,
    emit: EmitKind,
    highlight: bool,
    highlighter: &dyn Highlighter,
) -> Result<PlaygroundResponse> {
    let segments = split(&raw.output);
    let Some(artifact) = segments.output else {
        return Ok(PlaygroundResponse::error(strict(segments.diagnostics)?));
    };
    // Validate diagnostics even though only the artifact is returned.
    strict(segments.diagnostics)?;
    let artifact = lossy(artifact);
    if !highlight {
        return Ok(PlaygroundResponse::result(artifact));
    }
    let rendered = match emit {
        EmitKind::Asm => highlighter.highlight(&artifact, Language::Assembly),
        EmitKind::LlvmIr => highlighter.highlight(&artifact, Language::LlvmIr),
        EmitKind::Mir => artifact,
    };
    Ok(PlaygroundResponse::result(rendered))
}
