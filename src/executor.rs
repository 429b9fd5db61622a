/*!
Command executor

Runs OS configuration commands one at a time, including:
- capturing combined stdout+stderr
- logging the command line and, on failure, the full output
- adding every exit code to the session status
- a silent variant for cosmetic setup calls
*/

use std::fmt;
use std::io;
use std::process::{Command, Stdio};

use crate::action::ConfigurationAction;
use crate::params::Reason;
use crate::session::{OutcomeKind, SessionResult};

/// Program plus arguments, rendered from a typed action or query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl OsCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }
}

impl fmt::Display for OsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a finished command left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }
}

/// Seam between the engine and the operating system
pub trait CommandRunner {
    fn run(&mut self, command: &OsCommand) -> io::Result<CommandOutput>;

    /// Fire and forget; the outcome is never inspected
    fn run_silent(&mut self, command: &OsCommand) {
        let _ = self.run(command);
    }
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &OsCommand) -> io::Result<CommandOutput> {
        let out = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            // Killed by a signal: no code, still a failure
            exit_code: out.status.code().unwrap_or(1),
            output,
        })
    }

    fn run_silent(&mut self, command: &OsCommand) {
        let _ = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Logs commands instead of running them; every command succeeds with no output
#[derive(Debug, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&mut self, command: &OsCommand) -> io::Result<CommandOutput> {
        log::info!("[dry-run] {}", command);
        Ok(CommandOutput::success(""))
    }

    fn run_silent(&mut self, _command: &OsCommand) {}
}

/// Executes commands for one lifecycle event and owns its status accumulator
pub struct Executor<'r> {
    runner: &'r mut dyn CommandRunner,
    session: SessionResult,
}

impl<'r> Executor<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, reason: Reason) -> Self {
        Self {
            runner,
            session: SessionResult::new(reason),
        }
    }

    /// Run one command, log it, and add its exit code to the session total
    pub fn run(&mut self, kind: OutcomeKind, command: &OsCommand) -> String {
        log::debug!("-> {}", command);

        let result = match self.runner.run(command) {
            Ok(result) => result,
            Err(e) => CommandOutput {
                exit_code: 1,
                output: format!("failed to execute {}: {}", command.program, e),
            },
        };

        if result.exit_code != 0 {
            log::error!(
                "\"{}\" returned non-zero exit status: {}",
                command,
                result.exit_code
            );
            log::error!("   stdout+stderr dump: {}", result.output);
        } else {
            log::trace!("   stdout+stderr dump: {}", result.output);
        }

        self.session
            .record(kind, command.to_string(), result.exit_code, result.output.clone());
        result.output
    }

    /// Execute a configuration action
    pub fn apply(&mut self, action: &ConfigurationAction) -> String {
        self.run(OutcomeKind::Apply(action.kind()), &action.to_command())
    }

    /// Run a command whose result does not matter and is not recorded
    pub fn run_silent(&mut self, command: &OsCommand) {
        self.runner.run_silent(command);
    }

    /// Record a precondition violation as a failed step
    pub fn violation(&mut self, message: &str) {
        log::error!("{}", message);
        self.session.record_violation(message);
    }

    pub fn status(&self) -> u64 {
        self.session.status
    }

    pub fn finish(self) -> SessionResult {
        self.session
    }
}
