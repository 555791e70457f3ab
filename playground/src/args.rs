//! Command lines for the three sandboxed tools.

use crate::params::{BacktraceMode, CompileParams, EmitKind, EvaluateParams, FormatParams, OptLevel};

/// Prepended to the rewritten command line when backtraces are requested.
pub const BACKTRACE_PRELUDE: &str = "export RUST_BACKTRACE=1;";

/// Executable locations inside the sandbox root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    pub evaluate: String,
    pub format: String,
    pub compile: String,
    /// POSIX shell used for the backtrace rewrite.
    pub shell: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            evaluate: "/usr/local/bin/evaluate.sh".to_string(),
            format: "/usr/bin/rustfmt".to_string(),
            compile: "/usr/local/bin/compile.sh".to_string(),
            shell: "/usr/bin/dash".to_string(),
        }
    }
}

/// What actually gets handed to the sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub backtrace: bool,
}

pub fn resolve_backtrace(mode: BacktraceMode, optimize: OptLevel) -> bool {
    match mode {
        BacktraceMode::Off => false,
        BacktraceMode::Always => true,
        BacktraceMode::DebugOnly => optimize == OptLevel::O0,
    }
}

/// Builds the `-c` script for the backtrace rewrite. Every argument is quoted
/// on its own so the shell splits the line back into exactly `args`.
pub fn backtrace_script(command: &str, args: &[String]) -> String {
    let mut script = format!("{BACKTRACE_PRELUDE} {command}");
    for arg in args {
        script.push(' ');
        script.push_str(&shell_words::quote(arg));
    }
    script
}

fn codegen_args(optimize: OptLevel, color: bool) -> Vec<String> {
    let mut args = vec!["-C".to_string(), format!("opt-level={}", optimize.as_str())];
    if optimize == OptLevel::O0 {
        args.push("-g".to_string());
    }
    if color {
        args.push("--color=always".to_string());
    }
    args
}

#[derive(Clone, Debug, Default)]
pub struct ArgumentBuilder {
    paths: ToolPaths,
}

impl ArgumentBuilder {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    pub fn evaluate(&self, params: &EvaluateParams) -> Invocation {
        let mut args = codegen_args(params.optimize, params.color);
        if params.test {
            args.push("--test".to_string());
        }
        let backtrace = resolve_backtrace(params.backtrace, params.optimize);
        self.invocation(&self.paths.evaluate, args, backtrace)
    }

    pub fn format(&self, params: &FormatParams) -> Invocation {
        let backtrace = resolve_backtrace(params.backtrace, params.optimize);
        self.invocation(&self.paths.format, Vec::new(), backtrace)
    }

    pub fn compile(&self, params: &CompileParams) -> Invocation {
        let mut args = codegen_args(params.optimize, params.color);
        args.push("-C".to_string());
        args.push(format!("llvm-args=-x86-asm-syntax={}", params.syntax.as_str()));
        match params.emit {
            EmitKind::Mir => {
                args.push("-Zunstable-options".to_string());
                args.push("--unpretty=mir".to_string());
            }
            emit => args.push(format!("--emit={}", emit.as_str())),
        }
        let backtrace = resolve_backtrace(params.backtrace, params.optimize);
        self.invocation(&self.paths.compile, args, backtrace)
    }

    fn invocation(&self, command: &str, args: Vec<String>, backtrace: bool) -> Invocation {
        if !backtrace {
            return Invocation {
                command: command.to_string(),
                args,
                backtrace,
            };
        }
        Invocation {
            command: self.paths.shell.clone(),
            args: vec!["-c".to_string(), backtrace_script(command, &args)],
            backtrace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{AsmSyntax, Channel};

    fn evaluate_params(optimize: OptLevel, backtrace: BacktraceMode) -> EvaluateParams {
        EvaluateParams {
            code: "fn main() {}".to_string(),
            backtrace,
            color: false,
            test: false,
            version: Channel::Stable,
            optimize,
            separate_output: false,
        }
    }

    fn compile_params(emit: EmitKind) -> CompileParams {
        CompileParams {
            code: String::new(),
            backtrace: BacktraceMode::Off,
            syntax: AsmSyntax::Intel,
            color: true,
            version: Channel::Nightly,
            optimize: OptLevel::O3,
            emit,
            highlight: false,
        }
    }

    #[test]
    fn backtrace_resolution_table() {
        assert!(resolve_backtrace(BacktraceMode::DebugOnly, OptLevel::O0));
        assert!(!resolve_backtrace(BacktraceMode::DebugOnly, OptLevel::O2));
        assert!(resolve_backtrace(BacktraceMode::Always, OptLevel::O3));
        assert!(!resolve_backtrace(BacktraceMode::Off, OptLevel::O0));
    }

    #[test]
    fn debug_builds_get_debug_info() {
        let builder = ArgumentBuilder::default();
        let invocation = builder.evaluate(&evaluate_params(OptLevel::O0, BacktraceMode::Off));
        assert_eq!(invocation.command, "/usr/local/bin/evaluate.sh");
        assert_eq!(invocation.args, ["-C", "opt-level=0", "-g"]);
        assert!(!invocation.backtrace);
    }

    #[test]
    fn test_runs_append_test_flag_after_color() {
        let builder = ArgumentBuilder::default();
        let mut params = evaluate_params(OptLevel::O1, BacktraceMode::Off);
        params.color = true;
        params.test = true;
        assert_eq!(
            builder.evaluate(&params).args,
            ["-C", "opt-level=1", "--color=always", "--test"]
        );
    }

    #[test]
    fn compile_selects_emit_flag() {
        let builder = ArgumentBuilder::default();
        assert_eq!(
            builder.compile(&compile_params(EmitKind::LlvmIr)).args,
            [
                "-C",
                "opt-level=3",
                "--color=always",
                "-C",
                "llvm-args=-x86-asm-syntax=intel",
                "--emit=llvm-ir"
            ]
        );
        let mir = builder.compile(&compile_params(EmitKind::Mir));
        assert_eq!(mir.command, "/usr/local/bin/compile.sh");
        assert_eq!(&mir.args[5..], ["-Zunstable-options", "--unpretty=mir"]);
    }

    #[test]
    fn format_passes_no_tool_arguments() {
        let builder = ArgumentBuilder::default();
        let params = FormatParams {
            code: String::new(),
            optimize: OptLevel::O0,
            backtrace: BacktraceMode::Off,
            version: Channel::Beta,
        };
        let invocation = builder.format(&params);
        assert_eq!(invocation.command, "/usr/bin/rustfmt");
        assert!(invocation.args.is_empty());
    }

    #[test]
    fn backtrace_rewrites_into_shell_script() {
        let builder = ArgumentBuilder::default();
        let invocation = builder.evaluate(&evaluate_params(OptLevel::O0, BacktraceMode::DebugOnly));
        assert!(invocation.backtrace);
        assert_eq!(invocation.command, "/usr/bin/dash");
        assert_eq!(
            invocation.args,
            [
                "-c",
                "export RUST_BACKTRACE=1; /usr/local/bin/evaluate.sh -C opt-level=0 -g"
            ]
        );
    }

    #[test]
    fn backtrace_format_has_bare_command() {
        let params = FormatParams {
            code: String::new(),
            optimize: OptLevel::O2,
            backtrace: BacktraceMode::Always,
            version: Channel::Stable,
        };
        let invocation = ArgumentBuilder::default().format(&params);
        assert_eq!(
            invocation.args,
            ["-c", "export RUST_BACKTRACE=1; /usr/bin/rustfmt"]
        );
    }

    #[test]
    fn quoted_arguments_split_back_unchanged() {
        let args = vec![
            "say \"hi\"; rm -rf /".to_string(),
            String::new(),
            "it's".to_string(),
            "$(id) `id` | && > *".to_string(),
            "--emit=asm".to_string(),
        ];
        let script = backtrace_script("/bin/tool", &args);
        let tokens = shell_words::split(&script).unwrap();
        assert_eq!(tokens[..3], ["export", "RUST_BACKTRACE=1;", "/bin/tool"]);
        assert_eq!(tokens[3..], args[..]);
    }

    #[test]
    fn builder_is_deterministic() {
        let builder = ArgumentBuilder::default();
        let params = compile_params(EmitKind::Asm);
        assert_eq!(builder.compile(&params), builder.compile(&params));
    }
}
