use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use playground::{ArgumentBuilder, Playground, ProcessAdapter, RunConfig, ToolPaths};
use tempfile::{tempdir, TempDir};

/// Stand-in for the sandboxed `evaluate.sh`: compiler chatter on stderr, then
/// the sentinel, then what the "program" prints.
pub const EVALUATE_SCRIPT: &str = r#"#!/bin/sh
code=$(cat)
case "$code" in
  *compile_error*) printf 'error: aborting due to previous error\n' >&2; exit 101 ;;
esac
printf 'rustc %s\n' "$*" >&2
printf '\377'
printf 'backtrace=%s\n' "${RUST_BACKTRACE:-unset}"
printf 'bytes:\376\n'
"#;

pub const COMPILE_SCRIPT: &str = r#"#!/bin/sh
code=$(cat)
case "$code" in
  *compile_error*) printf 'error: expected item\n' >&2; exit 1 ;;
esac
printf 'warning: unused\n' >&2
printf '\377'
case "$*" in
  *--emit=llvm-ir*) printf 'define i32 @main() {\n  ret i32 0\n}\n' ;;
  *--unpretty=mir*) printf 'fn main() -> () {\n}\n' ;;
  *) printf 'main:\n\tretq\n' ;;
esac
"#;

pub const FORMAT_SCRIPT: &str = r#"#!/bin/sh
code=$(cat)
case "$code" in
  *'{{'*) printf 'error: unclosed delimiter\n'; exit 1 ;;
esac
printf '%s\n' "$code" | sed 's/  */ /g'
"#;

pub fn temp_workspace() -> Result<TempDir> {
    Ok(tempdir()?)
}

pub fn system_path() -> String {
    env::var("PATH").unwrap_or_else(|_| {
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()
    })
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<String> {
    let path = dir.join(name);
    fs::write(&path, body)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_string_lossy().into_owned())
}

/// A playground whose tools are the shell scripts above, run without a
/// launcher.
pub fn scripted_playground(dir: &Path) -> Result<Playground> {
    let paths = ToolPaths {
        evaluate: write_script(dir, "evaluate.sh", EVALUATE_SCRIPT)?,
        format: write_script(dir, "rustfmt", FORMAT_SCRIPT)?,
        compile: write_script(dir, "compile.sh", COMPILE_SCRIPT)?,
        shell: "/bin/sh".to_string(),
    };
    let config = RunConfig::new(
        None,
        Vec::new(),
        vec![("PATH".to_string(), system_path())],
        Duration::from_secs(10),
        64 * 1024,
    )?;
    Ok(Playground::new(
        ArgumentBuilder::new(paths),
        Arc::new(ProcessAdapter::new(config)),
        NonZeroUsize::new(32).expect("non-zero capacity"),
    )?)
}
