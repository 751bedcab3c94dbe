//! Deterministic command-runner double for tests.
//!
//! [`MockRunner`] replays canned [`CommandResult`]s instead of spawning
//! processes. Results are keyed by the space-joined command line; lookup tries
//! an exact match first, then the first registered key contained in the
//! command line, then the configured default. A command with no match at all
//! panics, so a test immediately surfaces the invocation it forgot to stub.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{finish, CommandResult, CommandRunner, RunOptions};
use crate::Result;

/// A single recorded invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// The argv that was executed
    pub argv: Vec<String>,
    /// Environment overrides passed with the call
    pub env: Vec<(String, String)>,
    /// Working directory passed with the call
    pub cwd: Option<PathBuf>,
}

#[derive(Default)]
struct MockState {
    // Insertion order matters for substring matching
    results: Vec<(String, VecDeque<CommandResult>)>,
    default: Option<CommandResult>,
    calls: Vec<RecordedCall>,
}

/// Replays preconfigured results and records every invocation.
#[derive(Default)]
pub struct MockRunner {
    state: Mutex<MockState>,
}

impl MockRunner {
    /// Create an empty mock with no stubbed results
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub `key` to always produce `result`
    pub fn add_result(&self, key: impl Into<String>, result: CommandResult) {
        self.add_result_sequence(key, vec![result]);
    }

    /// Stub `key` with a sequence of results; each call consumes the next
    /// entry and the final entry is sticky
    pub fn add_result_sequence(&self, key: impl Into<String>, results: Vec<CommandResult>) {
        let mut state = self.state.lock().unwrap();
        state.results.push((key.into(), results.into()));
    }

    /// Result returned when no stubbed key matches
    pub fn set_default(&self, result: CommandResult) {
        self.state.lock().unwrap().default = Some(result);
    }

    /// All invocations recorded so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded invocations as joined command lines
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|call| call.argv.join(" "))
            .collect()
    }

    /// Number of recorded command lines containing `needle`
    pub fn count_matching(&self, needle: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    fn lookup(&self, command_line: &str) -> Option<CommandResult> {
        let mut state = self.state.lock().unwrap();

        let index = state
            .results
            .iter()
            .position(|(key, _)| key == command_line)
            .or_else(|| {
                state
                    .results
                    .iter()
                    .position(|(key, _)| command_line.contains(key.as_str()))
            });

        match index {
            Some(index) => {
                let queue = &mut state.results[index].1;
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            }
            None => state.default.clone(),
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult> {
        let command_line = argv.join(" ");
        self.state.lock().unwrap().calls.push(RecordedCall {
            argv: argv.to_vec(),
            env: opts.env.clone(),
            cwd: opts.cwd.clone(),
        });

        let result = self
            .lookup(&command_line)
            .unwrap_or_else(|| panic!("no mock result registered for command: {command_line}"));

        finish(argv, result, opts.check)
    }
}
