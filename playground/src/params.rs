//! Whitelisted request parameters.
//!
//! Every recognized key deserializes into a closed enum (or a JSON boolean),
//! so validation is a strict membership test: `"optimize": 2` is rejected just
//! like `"optimize": "9"`. Each endpoint lists its keys in a fixed order and
//! all failing keys are collected before the request is refused.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

/// Toolchain release channel the sandbox root is selected by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Nightly,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Nightly => "nightly",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OptLevel {
    #[serde(rename = "0")]
    O0,
    #[serde(rename = "1")]
    O1,
    #[default]
    #[serde(rename = "2")]
    O2,
    #[serde(rename = "3")]
    O3,
}

impl OptLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptLevel::O0 => "0",
            OptLevel::O1 => "1",
            OptLevel::O2 => "2",
            OptLevel::O3 => "3",
        }
    }
}

/// Raw `backtrace` selector as sent by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum BacktraceMode {
    #[default]
    #[serde(rename = "0")]
    Off,
    #[serde(rename = "1")]
    Always,
    /// Only for unoptimized builds.
    #[serde(rename = "2")]
    DebugOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsmSyntax {
    #[default]
    Att,
    Intel,
}

impl AsmSyntax {
    pub fn as_str(self) -> &'static str {
        match self {
            AsmSyntax::Att => "att",
            AsmSyntax::Intel => "intel",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum EmitKind {
    #[default]
    #[serde(rename = "asm")]
    Asm,
    #[serde(rename = "llvm-ir")]
    LlvmIr,
    #[serde(rename = "mir")]
    Mir,
}

impl EmitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmitKind::Asm => "asm",
            EmitKind::LlvmIr => "llvm-ir",
            EmitKind::Mir => "mir",
        }
    }
}

/// Collects per-key results over one request body.
struct Validator<'a> {
    body: &'a Map<String, Value>,
    invalid: Vec<&'static str>,
}

impl<'a> Validator<'a> {
    fn new(body: &'a Value) -> Result<Self, ValidationError> {
        let body = body.as_object().ok_or(ValidationError::MalformedBody)?;
        Ok(Self {
            body,
            invalid: Vec::new(),
        })
    }

    fn field<T: Deserialize<'a>>(&mut self, key: &'static str, default: T) -> T {
        let body = self.body;
        match body.get(key) {
            None => default,
            Some(value) => match T::deserialize(value) {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.invalid.push(key);
                    default
                }
            },
        }
    }

    /// Switches outside the whitelist only count when exactly `true`.
    fn flag(&self, key: &str) -> bool {
        matches!(self.body.get(key), Some(Value::Bool(true)))
    }

    fn finish(self) -> Result<String, ValidationError> {
        if !self.invalid.is_empty() {
            return Err(ValidationError::InvalidParameters(self.invalid));
        }
        self.body
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(ValidationError::MissingCode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateParams {
    pub code: String,
    pub backtrace: BacktraceMode,
    pub color: bool,
    pub test: bool,
    pub version: Channel,
    pub optimize: OptLevel,
    pub separate_output: bool,
}

impl EvaluateParams {
    pub fn from_body(body: &Value) -> Result<Self, ValidationError> {
        let mut validator = Validator::new(body)?;
        let backtrace = validator.field("backtrace", BacktraceMode::default());
        let color = validator.field("color", false);
        let test = validator.field("test", false);
        let version = validator.field("version", Channel::default());
        let optimize = validator.field("optimize", OptLevel::default());
        let separate_output = validator.flag("separate_output");
        let code = validator.finish()?;
        Ok(Self {
            code,
            backtrace,
            color,
            test,
            version,
            optimize,
            separate_output,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatParams {
    pub code: String,
    pub optimize: OptLevel,
    pub backtrace: BacktraceMode,
    pub version: Channel,
}

impl FormatParams {
    pub fn from_body(body: &Value) -> Result<Self, ValidationError> {
        let mut validator = Validator::new(body)?;
        let optimize = validator.field("optimize", OptLevel::default());
        let backtrace = validator.field("backtrace", BacktraceMode::default());
        let version = validator.field("version", Channel::default());
        let code = validator.finish()?;
        Ok(Self {
            code,
            optimize,
            backtrace,
            version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileParams {
    pub code: String,
    pub backtrace: BacktraceMode,
    pub syntax: AsmSyntax,
    pub color: bool,
    pub version: Channel,
    pub optimize: OptLevel,
    pub emit: EmitKind,
    pub highlight: bool,
}

impl CompileParams {
    pub fn from_body(body: &Value) -> Result<Self, ValidationError> {
        let mut validator = Validator::new(body)?;
        let backtrace = validator.field("backtrace", BacktraceMode::default());
        let syntax = validator.field("syntax", AsmSyntax::default());
        let color = validator.field("color", false);
        let version = validator.field("version", Channel::default());
        let optimize = validator.field("optimize", OptLevel::default());
        let emit = validator.field("emit", EmitKind::default());
        let highlight = validator.flag("highlight");
        let code = validator.finish()?;
        Ok(Self {
            code,
            backtrace,
            syntax,
            color,
            version,
            optimize,
            emit,
            highlight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_parameters_take_documented_defaults() {
        let params = CompileParams::from_body(&json!({ "code": "fn main() {}" })).unwrap();
        assert_eq!(params.backtrace, BacktraceMode::Off);
        assert_eq!(params.syntax, AsmSyntax::Att);
        assert!(!params.color);
        assert_eq!(params.version, Channel::Stable);
        assert_eq!(params.optimize, OptLevel::O2);
        assert_eq!(params.emit, EmitKind::Asm);
        assert!(!params.highlight);
    }

    #[test]
    fn out_of_domain_value_names_the_key() {
        let err = EvaluateParams::from_body(&json!({ "code": "", "optimize": "9" })).unwrap_err();
        assert_eq!(err.keys(), ["optimize"]);
        assert_eq!(err.to_string(), "invalid value for optimize");
    }

    #[test]
    fn membership_is_strict_about_json_types() {
        let err = EvaluateParams::from_body(&json!({
            "code": "",
            "optimize": 2,
            "color": "true",
            "version": "Stable",
        }))
        .unwrap_err();
        assert_eq!(err.keys(), ["color", "version", "optimize"]);
    }

    #[test]
    fn explicit_null_is_not_the_default() {
        let err = FormatParams::from_body(&json!({ "code": "", "version": null })).unwrap_err();
        assert_eq!(err.keys(), ["version"]);
    }

    #[test]
    fn missing_code_is_reported_after_parameters() {
        assert_eq!(
            FormatParams::from_body(&json!({})).unwrap_err(),
            ValidationError::MissingCode
        );
        assert_eq!(
            FormatParams::from_body(&json!({ "code": 7 })).unwrap_err(),
            ValidationError::MissingCode
        );
        assert_eq!(
            FormatParams::from_body(&json!({ "backtrace": "3" })).unwrap_err(),
            ValidationError::InvalidParameters(vec!["backtrace"])
        );
    }

    #[test]
    fn non_object_body_is_malformed() {
        assert_eq!(
            EvaluateParams::from_body(&json!(["code"])).unwrap_err(),
            ValidationError::MalformedBody
        );
    }

    #[test]
    fn switches_require_literal_true() {
        let params = EvaluateParams::from_body(&json!({ "code": "", "separate_output": 1 })).unwrap();
        assert!(!params.separate_output);
        let params =
            EvaluateParams::from_body(&json!({ "code": "", "separate_output": true })).unwrap();
        assert!(params.separate_output);
    }

    #[test]
    fn recognizes_every_domain_value() {
        let params = CompileParams::from_body(&json!({
            "code": "x",
            "backtrace": "2",
            "syntax": "intel",
            "color": true,
            "version": "nightly",
            "optimize": "0",
            "emit": "llvm-ir",
        }))
        .unwrap();
        assert_eq!(params.backtrace, BacktraceMode::DebugOnly);
        assert_eq!(params.syntax, AsmSyntax::Intel);
        assert!(params.color);
        assert_eq!(params.version, Channel::Nightly);
        assert_eq!(params.optimize, OptLevel::O0);
        assert_eq!(params.emit, EmitKind::LlvmIr);
    }
}
