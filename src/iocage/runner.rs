//! Invocation of the iocage utility
//!
//! Everything the engine knows about iocage goes through [`Runner`], so the
//! planner and executor can be driven by a scripted utility in tests.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Default install location of the iocage port
pub const DEFAULT_IOCAGE_PATH: &str = "/usr/local/bin/iocage";

/// Captured result of one utility invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Something that can run iocage subcommands
pub trait Runner {
    /// Run `iocage <args>` and capture its output
    fn run(&self, args: &[String]) -> Result<CommandOutput>;

    /// Program name used when rendering command lines
    fn program(&self) -> String;

    /// Render a command line for messages and errors
    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.program();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run and turn a non-zero exit into [`Error::Command`]
    fn run_checked(&self, label: &str, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::Command {
                label: label.to_string(),
                command: self.command_line(args),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// Build an owned argument vector
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Runs the real iocage binary
pub struct SystemRunner {
    path: PathBuf,
}

impl SystemRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Runner for SystemRunner {
    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        debug!(command = %self.command_line(args), "running iocage");

        let output = Command::new(&self.path)
            .args(args)
            .output()
            .map_err(|e| Error::Spawn {
                command: self.command_line(args),
                source: e,
            })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(code = result.code, "iocage finished");
        Ok(result)
    }

    fn program(&self) -> String {
        self.path.display().to_string()
    }
}

/// Scripted iocage stand-in for tests
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct Script {
        queued: VecDeque<CommandOutput>,
        last: Option<CommandOutput>,
    }

    /// Replies to exact command lines
    ///
    /// Queued replies are served in order; once the queue is drained the last
    /// served reply repeats.
    #[derive(Default)]
    pub struct FakeIocage {
        replies: RefCell<HashMap<String, Script>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeIocage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful reply for `args`
        pub fn reply(&self, args: &str, stdout: &str) -> &Self {
            self.reply_with(args, 0, stdout, "")
        }

        /// Queue a reply with an explicit exit code
        pub fn reply_with(&self, args: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
            self.replies
                .borrow_mut()
                .entry(args.to_string())
                .or_default()
                .queued
                .push_back(CommandOutput {
                    code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                });
            self
        }

        /// Every command line run so far, without the program name
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        /// Calls whose subcommand mutates iocage state
        pub fn mutating_calls(&self) -> Vec<String> {
            const READ_ONLY: &[&str] = &["list", "get"];
            self.calls()
                .into_iter()
                .filter(|c| {
                    let verb = c.split_whitespace().next().unwrap_or_default();
                    !READ_ONLY.contains(&verb)
                })
                .collect()
        }
    }

    impl Runner for FakeIocage {
        fn run(&self, args: &[String]) -> Result<CommandOutput> {
            let key = args.join(" ");
            self.calls.borrow_mut().push(key.clone());

            let mut replies = self.replies.borrow_mut();
            let script = replies
                .get_mut(&key)
                .unwrap_or_else(|| panic!("unexpected iocage call: {}", key));
            if let Some(reply) = script.queued.pop_front() {
                script.last = Some(reply);
            }
            let reply = script
                .last
                .clone()
                .unwrap_or_else(|| panic!("no reply scripted for: {}", key));
            Ok(reply)
        }

        fn program(&self) -> String {
            "iocage".to_string()
        }
    }
}
