use std::num::NonZeroUsize;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::args::{ArgumentBuilder, Invocation};
use crate::cache::{Dispatcher, Signature};
use crate::decode::{decode_compile, decode_evaluate, decode_format, PlaygroundResponse};
use crate::errors::{Result, ValidationError};
use crate::highlight::{Highlighter, HtmlHighlighter};
use crate::params::{Channel, CompileParams, EvaluateParams, FormatParams};
use crate::run::{ExecutionAdapter, RawExecution};

/// Snapshot of the dispatch cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// The three request pipelines: validate, build the command line, dispatch
/// through the cache, decode.
///
/// `Err` is only returned when the sandbox could not run; rejected requests
/// and failing tools produce an `Ok` response carrying an `error` field.
pub struct Playground {
    builder: ArgumentBuilder,
    dispatcher: Dispatcher,
    highlighter: Arc<dyn Highlighter>,
}

impl Playground {
    pub fn new(
        builder: ArgumentBuilder,
        adapter: Arc<dyn ExecutionAdapter>,
        cache_capacity: NonZeroUsize,
    ) -> Result<Self> {
        Ok(Self {
            builder,
            dispatcher: Dispatcher::new(adapter, cache_capacity),
            highlighter: Arc::new(HtmlHighlighter::new()?),
        })
    }

    pub fn with_highlighter(mut self, highlighter: Arc<dyn Highlighter>) -> Self {
        self.highlighter = highlighter;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.dispatcher.cache();
        CacheStats {
            hits: cache.hits(),
            misses: cache.misses(),
            entries: cache.len(),
            capacity: cache.capacity(),
        }
    }

    #[instrument(skip_all)]
    pub async fn evaluate(&self, body: &Value) -> Result<PlaygroundResponse> {
        let params = match EvaluateParams::from_body(body) {
            Ok(params) => params,
            Err(err) => return Ok(rejected(err)),
        };
        let invocation = self.builder.evaluate(&params);
        let raw = self.dispatch(params.version, invocation, params.code).await?;
        decode_evaluate(&raw, params.separate_output)
    }

    #[instrument(skip_all)]
    pub async fn format(&self, body: &Value) -> Result<PlaygroundResponse> {
        let params = match FormatParams::from_body(body) {
            Ok(params) => params,
            Err(err) => return Ok(rejected(err)),
        };
        let invocation = self.builder.format(&params);
        let raw = self.dispatch(params.version, invocation, params.code).await?;
        decode_format(&raw)
    }

    #[instrument(skip_all)]
    pub async fn compile(&self, body: &Value) -> Result<PlaygroundResponse> {
        let params = match CompileParams::from_body(body) {
            Ok(params) => params,
            Err(err) => return Ok(rejected(err)),
        };
        let invocation = self.builder.compile(&params);
        let raw = self.dispatch(params.version, invocation, params.code).await?;
        decode_compile(&raw, params.emit, params.highlight, self.highlighter.as_ref())
    }

    async fn dispatch(
        &self,
        version: Channel,
        invocation: Invocation,
        code: String,
    ) -> Result<RawExecution> {
        debug!(
            %version,
            command = %invocation.command,
            args = ?invocation.args,
            backtrace = invocation.backtrace,
            "dispatching"
        );
        let signature = Signature::new(version, invocation, code);
        self.dispatcher.get_or_execute(&signature).await
    }
}

fn rejected(err: ValidationError) -> PlaygroundResponse {
    debug!(%err, "request rejected");
    PlaygroundResponse::error(err.to_string())
}
