use std::io::{self, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::errors::{PlaygroundError, Result};
use crate::params::Channel;

/// Placeholder in launcher arguments replaced by the channel name.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// How long output is still collected after the tool has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Bytes the sandbox printed and the status it exited with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawExecution {
    pub output: Bytes,
    pub status: i32,
}

impl RawExecution {
    pub fn new(output: impl Into<Bytes>, status: i32) -> Self {
        Self {
            output: output.into(),
            status,
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Boundary to the sandbox. A tool exiting non-zero is an `Ok` result; `Err`
/// means the sandbox itself could not run.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(
        &self,
        version: Channel,
        command: &str,
        args: &[String],
        code: &str,
    ) -> Result<RawExecution>;
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    launcher: Option<String>,
    launcher_args: Vec<String>,
    fixed_env: Vec<(String, String)>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl RunConfig {
    pub fn new(
        launcher: Option<String>,
        launcher_args: impl IntoIterator<Item = String>,
        fixed_env: impl IntoIterator<Item = (String, String)>,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<Self> {
        if max_output_bytes == 0 {
            return Err(PlaygroundError::InvalidConfig(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(PlaygroundError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let launcher = launcher
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let launcher_args: Vec<String> = launcher_args.into_iter().collect();
        if launcher.is_none() && !launcher_args.is_empty() {
            return Err(PlaygroundError::InvalidConfig(
                "launcher arguments configured without a launcher".to_string(),
            ));
        }
        let fixed_env = fixed_env
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        Ok(Self {
            launcher,
            launcher_args,
            fixed_env,
            timeout,
            max_output_bytes,
        })
    }

    /// The `playpen` launcher with the usual resource limits.
    pub fn playpen(
        fixed_env: impl IntoIterator<Item = (String, String)>,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<Self> {
        Self::new(
            Some("playpen".to_string()),
            default_playpen_args(),
            fixed_env,
            timeout,
            max_output_bytes,
        )
    }

    pub fn launcher(&self) -> Option<&str> {
        self.launcher.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Program and argv actually spawned for one tool invocation.
    pub fn command_line(
        &self,
        version: Channel,
        command: &str,
        args: &[String],
    ) -> (String, Vec<String>) {
        match &self.launcher {
            Some(launcher) => {
                let mut argv: Vec<String> = self
                    .launcher_args
                    .iter()
                    .map(|arg| arg.replace(VERSION_PLACEHOLDER, version.as_str()))
                    .collect();
                argv.push(command.to_string());
                argv.extend(args.iter().cloned());
                (launcher.clone(), argv)
            }
            None => (command.to_string(), args.to_vec()),
        }
    }
}

pub fn default_playpen_args() -> Vec<String> {
    [
        "root-{version}",
        "--mount-proc",
        "--user=rust",
        "--timeout=5",
        "--syscalls-file=whitelist",
        "--devices=/dev/urandom:r,/dev/null:rw",
        "--memory-limit=128",
        "--",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Runs tools as child processes with stdout and stderr sharing one pipe, so
/// diagnostics and the artifact arrive in the order the tool wrote them.
#[derive(Clone, Debug)]
pub struct ProcessAdapter {
    config: RunConfig,
}

impl ProcessAdapter {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[instrument(skip(self, args, code))]
    pub async fn run(
        &self,
        version: Channel,
        command: &str,
        args: &[String],
        code: &str,
    ) -> Result<RawExecution> {
        let (program, argv) = self.config.command_line(version, command, args);
        let limit = self.config.max_output_bytes();
        let (reader, writer) = io::pipe()?;

        let mut child = {
            let mut process = Command::new(&program);
            process.args(&argv);
            process.kill_on_drop(true);
            #[cfg(unix)]
            process.process_group(0);
            process.env_clear();
            for (key, value) in &self.config.fixed_env {
                process.env(key, value);
            }
            process.stdin(Stdio::piped());
            process.stdout(writer.try_clone()?);
            process.stderr(writer);
            process.spawn()?
        };
        let mut group = ProcessGroup(child.id());
        let captured = Arc::new(CapturedOutput::default());
        let mut pump_task = {
            let captured = Arc::clone(&captured);
            tokio::task::spawn_blocking(move || pump(reader, &captured, limit))
        };

        let start = Instant::now();
        let finished = async {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(err) = stdin.write_all(code.as_bytes()).await {
                    if err.kind() != io::ErrorKind::BrokenPipe {
                        return Err(PlaygroundError::Io(err));
                    }
                }
            }
            Ok::<_, PlaygroundError>(child.wait().await?)
        };
        let status = match timeout(self.config.timeout(), finished).await {
            Ok(status) => status?,
            Err(_) => return Err(PlaygroundError::Timeout(self.config.timeout())),
        };

        // Leftover background processes would otherwise hold the pipe open.
        group.kill();
        match timeout(DRAIN_GRACE, &mut pump_task).await {
            Ok(joined) => joined.map_err(|err| PlaygroundError::Join(err.to_string()))??,
            Err(_) => warn!("output pipe still open after the tool exited"),
        }
        let (output, truncated) = captured.take();

        if truncated {
            warn!(limit, "tool output truncated");
        }
        let status = exit_status_code(status);
        info!(
            status,
            bytes = output.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sandbox execution finished"
        );
        Ok(RawExecution::new(output, status))
    }
}

#[async_trait]
impl ExecutionAdapter for ProcessAdapter {
    async fn execute(
        &self,
        version: Channel,
        command: &str,
        args: &[String],
        code: &str,
    ) -> Result<RawExecution> {
        self.run(version, command, args, code).await
    }
}

/// SIGKILLs whatever is left in the tool's process group, at the latest
/// when dropped.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: killpg only sends a signal. ESRCH for an empty group is fine.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Output collected so far from the merged pipe.
#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Mutex<Vec<u8>>,
    truncated: AtomicBool,
}

impl CapturedOutput {
    fn append(&self, chunk: &[u8], limit: usize) {
        let mut bytes = self.bytes.lock();
        let room = limit.saturating_sub(bytes.len());
        if chunk.len() > room {
            self.truncated.store(true, Ordering::Relaxed);
        }
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn take(&self) -> (Vec<u8>, bool) {
        let bytes = std::mem::take(&mut *self.bytes.lock());
        (bytes, self.truncated.load(Ordering::Relaxed))
    }
}

/// Reads until end of file, keeping the first `limit` bytes and discarding
/// the rest so the writer never blocks on a full pipe.
fn pump(mut reader: impl Read, captured: &CapturedOutput, limit: usize) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => captured.append(&chunk[..n], limit),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
