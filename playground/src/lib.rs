//! Validation, command construction, memoized dispatch and output decoding
//! for the compile/run playground.
//!
//! The sandbox is reached through [`ExecutionAdapter`]; hosting lives in the
//! `web` binary.

pub mod args;
pub mod cache;
pub mod decode;
pub mod errors;
pub mod highlight;
pub mod params;
pub mod run;
pub mod service;

pub use args::{ArgumentBuilder, Invocation, ToolPaths};
pub use cache::{DispatchCache, Dispatcher, Signature, DEFAULT_CAPACITY};
pub use decode::{PlaygroundResponse, SENTINEL};
pub use errors::{PlaygroundError, Result, ValidationError};
pub use highlight::{Highlighter, HtmlHighlighter, Language};
pub use params::{AsmSyntax, BacktraceMode, Channel, EmitKind, OptLevel};
pub use run::{ExecutionAdapter, ProcessAdapter, RawExecution, RunConfig};
pub use service::{CacheStats, Playground};
