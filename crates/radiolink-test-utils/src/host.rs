//! Fakes for the supervisor's host collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;

use radiolink_core::BoxFuture;
use radiolink_core::supervisor::process::{ProcessInfo, ProcessTable, Signaller};
use radiolink_core::supervisor::prompt::OperatorPrompt;

/// A fixed process list. `failing()` makes every scan error out.
#[derive(Default)]
pub struct FakeProcessTable {
    processes: Vec<ProcessInfo>,
    fail: bool,
}

impl FakeProcessTable {
    pub fn new(processes: &[(u32, &str)]) -> Self {
        Self {
            processes: processes
                .iter()
                .map(|(pid, command)| ProcessInfo {
                    pid: *pid,
                    command: command.to_string(),
                })
                .collect(),
            fail: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            processes: Vec::new(),
            fail: true,
        }
    }
}

impl ProcessTable for FakeProcessTable {
    fn list(&self) -> BoxFuture<'_, std::io::Result<Vec<ProcessInfo>>> {
        Box::pin(async move {
            if self.fail {
                Err(std::io::Error::other("ps unavailable"))
            } else {
                Ok(self.processes.clone())
            }
        })
    }
}

/// Records interrupted pids instead of signalling anything.
#[derive(Default)]
pub struct RecordingSignaller {
    interrupted: Mutex<Vec<u32>>,
}

impl RecordingSignaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupted(&self) -> Vec<u32> {
        self.interrupted.lock().expect("signal log poisoned").clone()
    }
}

impl Signaller for RecordingSignaller {
    fn interrupt(&self, pid: u32) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.interrupted
                .lock()
                .expect("signal log poisoned")
                .push(pid);
            Ok(())
        })
    }
}

/// Answers from a script; declines once the script runs out.
#[derive(Default)]
pub struct ScriptedPrompt {
    confirms: Mutex<VecDeque<bool>>,
    choices: Mutex<VecDeque<Option<usize>>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for successive `confirm` questions.
    pub fn confirming(self, answers: &[bool]) -> Self {
        self.confirms
            .lock()
            .expect("prompt script poisoned")
            .extend(answers);
        self
    }

    /// Queue answers for successive `choose` questions.
    pub fn choosing(self, answers: &[Option<usize>]) -> Self {
        self.choices
            .lock()
            .expect("prompt script poisoned")
            .extend(answers);
        self
    }

    /// Every question asked so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().expect("prompt log poisoned").clone()
    }

    fn log(&self, question: String) {
        self.asked.lock().expect("prompt log poisoned").push(question);
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn confirm(&self, question: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.log(question);
            self.confirms
                .lock()
                .expect("prompt script poisoned")
                .pop_front()
                .unwrap_or(false)
        })
    }

    fn choose(&self, question: String, _options: Vec<String>) -> BoxFuture<'_, Option<usize>> {
        Box::pin(async move {
            self.log(question);
            self.choices
                .lock()
                .expect("prompt script poisoned")
                .pop_front()
                .flatten()
        })
    }
}
