//! Scripted stand-ins for `ssh`, the operator, and the PTY transport.

use std::cell::RefCell;
use std::rc::Rc;

use hopper_expect::{Conversation, Expectation, Interrupt, Matcher, Outcome, ScriptedSource};
use hopper_pty::{PassthroughEnd, PtyDimensions, PtyError};

use crate::operator::Operator;
use crate::orchestrator::Transport;

pub type SentLog = Rc<RefCell<Vec<String>>>;

/// A fake remote end: fixed initial output, then canned replies to
/// specific lines. Matching runs through the real [`Matcher`].
pub struct ScriptedPeer {
    matcher: Matcher<ScriptedSource>,
    replies: Vec<(String, String)>,
    sent: SentLog,
}

impl ScriptedPeer {
    pub fn new(initial: &str) -> Self {
        let chunks: Vec<&str> = if initial.is_empty() { vec![] } else { vec![initial] };
        Self {
            matcher: Matcher::new(ScriptedSource::new(chunks)),
            replies: Vec::new(),
            sent: SentLog::default(),
        }
    }

    /// When `line` is sent, answer with `output`.
    pub fn on(mut self, line: &str, output: &str) -> Self {
        self.replies.push((line.to_string(), output.to_string()));
        self
    }

    /// End the stream once all queued output has been read.
    pub fn closing(mut self) -> Self {
        self.matcher.source_mut().set_close_when_drained(true);
        self
    }

    /// Every wait reports an operator interrupt.
    pub fn interrupted(mut self) -> Self {
        let interrupt = Interrupt::new();
        interrupt.raise();
        self.matcher = self.matcher.with_interrupt(interrupt);
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn sent_log(&self) -> SentLog {
        Rc::clone(&self.sent)
    }
}

impl Conversation for ScriptedPeer {
    fn send_line(&mut self, text: &str) {
        self.sent.borrow_mut().push(text.to_string());
        if let Some(pos) = self.replies.iter().position(|(line, _)| line == text) {
            let (_, output) = self.replies.remove(pos);
            if !output.is_empty() {
                self.matcher.source_mut().push(output);
            }
        }
    }

    fn await_pattern(&mut self, expectation: &Expectation) -> Outcome {
        self.matcher.await_pattern(expectation)
    }
}

/// Hands out a fixed code, or none.
pub struct FixedOperator {
    code: Option<String>,
    pub asked: usize,
}

impl FixedOperator {
    pub fn none() -> Self {
        Self {
            code: None,
            asked: 0,
        }
    }

    pub fn with_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            asked: 0,
        }
    }
}

impl Operator for FixedOperator {
    fn one_time_code(&mut self) -> Option<String> {
        self.asked += 1;
        self.code.clone()
    }
}

/// Spawns a prepared [`ScriptedPeer`] instead of a process.
pub struct ScriptedTransport {
    peer: Option<ScriptedPeer>,
    end: PassthroughEnd,
    pub spawned: Vec<(String, PtyDimensions)>,
    pub passthrough_entered: bool,
}

impl ScriptedTransport {
    pub fn new(peer: ScriptedPeer) -> Self {
        Self {
            peer: Some(peer),
            end: PassthroughEnd::ChildExited(0),
            spawned: Vec::new(),
            passthrough_entered: false,
        }
    }

    /// A transport whose spawn always fails.
    pub fn broken() -> Self {
        Self {
            peer: None,
            end: PassthroughEnd::ChildExited(0),
            spawned: Vec::new(),
            passthrough_entered: false,
        }
    }

    /// Passthrough ends as if the operator interrupted it.
    pub fn interrupted_in_passthrough(mut self) -> Self {
        self.end = PassthroughEnd::Interrupted;
        self
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedPeer;

    fn spawn(&mut self, command: &str, dimensions: PtyDimensions) -> Result<ScriptedPeer, PtyError> {
        self.spawned.push((command.to_string(), dimensions));
        self.peer
            .take()
            .ok_or_else(|| PtyError::SpawnFailed(format!("failed to spawn {command}")))
    }

    fn passthrough(&mut self, _session: ScriptedPeer) -> Result<PassthroughEnd, PtyError> {
        self.passthrough_entered = true;
        Ok(self.end)
    }
}
