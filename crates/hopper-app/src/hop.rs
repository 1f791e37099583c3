//! Login state machine for one hop.
//!
//! The caller has already started the connection (spawned `ssh`, or typed
//! the `ssh` command into the previous hop's shell). From there the machine
//! answers the host-key question, sends the password, handles a second
//! factor and waits for the shell to settle.

use std::io::Write;
use std::time::Duration;

use hopper_expect::{Conversation, Expectation, Outcome, Pattern, PatternError};

use crate::config::Credentials;
use crate::operator::Operator;

/// Which leg of the connection is being authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopKind {
    Jump,
    Destination,
}

impl HopKind {
    /// The setting to point the operator at when the password is refused.
    pub fn password_var(self) -> &'static str {
        match self {
            HopKind::Jump => "JUMP_PASSWORD",
            HopKind::Destination => "DEST_PASSWORD",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HopKind::Jump => "jump host",
            HopKind::Destination => "destination",
        }
    }
}

/// How long each phase waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopTimings {
    /// First response after the connection starts.
    pub connect: Duration,
    /// Password prompt after accepting a host key.
    pub trust_followup: Duration,
    /// Second-factor prompt, rejection, or shell after the password.
    pub after_password: Duration,
    /// Best-effort wait for a shell prompt before reporting success.
    pub settle: Duration,
}

impl HopTimings {
    pub fn for_hop(kind: HopKind) -> Self {
        let after_password = match kind {
            HopKind::Jump => Duration::from_secs(10),
            HopKind::Destination => Duration::from_secs(15),
        };
        Self {
            connect: Duration::from_secs(30),
            trust_followup: Duration::from_secs(60),
            after_password,
            settle: Duration::from_secs(30),
        }
    }
}

/// Why a connection attempt failed before authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    Refused,
    NoRoute,
    UnknownHost,
    HostKeyVerificationFailed,
    /// The child closed its output unexpectedly.
    Closed,
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionFailure::Refused => "Connection refused",
            ConnectionFailure::NoRoute => "No route to host",
            ConnectionFailure::UnknownHost => "Could not resolve hostname",
            ConnectionFailure::HostKeyVerificationFailed => "Host key verification failed",
            ConnectionFailure::Closed => "Connection closed unexpectedly",
        };
        f.write_str(text)
    }
}

/// Terminal result of one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    Authenticated,
    Rejected,
    Timeout,
    ConnectionError(ConnectionFailure),
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopState {
    AwaitingTrustOrPassword,
    AwaitingPassword,
    AwaitingSecondFactorOrShell,
    Settling,
    Done(HopOutcome),
}

/// Prompts and messages recognised in `ssh` output.
#[derive(Debug, Clone)]
pub struct HopPatterns {
    password: Pattern,
    trust_host: Pattern,
    permission_denied: Pattern,
    refused: Pattern,
    no_route: Pattern,
    unknown_host: Pattern,
    key_verification_failed: Pattern,
    second_factor: Pattern,
    shell: Pattern,
    settled_shell: Vec<Pattern>,
}

impl HopPatterns {
    pub fn new() -> Result<Self, PatternError> {
        Ok(Self {
            password: Pattern::regex("[Pp]assword:")?,
            trust_host: Pattern::literal("Are you sure you want to continue connecting"),
            permission_denied: Pattern::literal("Permission denied"),
            refused: Pattern::literal("Connection refused"),
            no_route: Pattern::literal("No route to host"),
            unknown_host: Pattern::literal("Could not resolve hostname"),
            key_verification_failed: Pattern::literal("Host key verification failed"),
            second_factor: Pattern::literal("2nd factor"),
            shell: Pattern::literal("$"),
            settled_shell: vec![
                Pattern::literal("$"),
                Pattern::literal("]$"),
                Pattern::literal("] $"),
            ],
        })
    }
}

/// Drives one hop's login over a [`Conversation`].
pub struct HopAuthenticator<'a, C, O, W> {
    pub kind: HopKind,
    pub credentials: &'a Credentials,
    pub patterns: &'a HopPatterns,
    pub timings: HopTimings,
    pub conversation: &'a mut C,
    pub operator: &'a mut O,
    pub out: &'a mut W,
}

impl<C: Conversation, O: Operator, W: Write> HopAuthenticator<'_, C, O, W> {
    /// Run the state machine to a terminal outcome.
    pub fn run(mut self) -> HopOutcome {
        let mut state = HopState::AwaitingTrustOrPassword;
        loop {
            log::debug!("{}: {state:?}", self.kind.label());
            state = match state {
                HopState::AwaitingTrustOrPassword => self.trust_or_password(),
                HopState::AwaitingPassword => self.password(),
                HopState::AwaitingSecondFactorOrShell => self.second_factor_or_shell(),
                HopState::Settling => self.settle(),
                HopState::Done(outcome) => {
                    log::info!("{} {}: {outcome:?}", self.kind.label(), self.credentials.host);
                    return outcome;
                }
            };
        }
    }

    fn trust_or_password(&mut self) -> HopState {
        let p = self.patterns;
        let expectation = Expectation::new(
            vec![
                p.password.clone(),
                p.trust_host.clone(),
                p.permission_denied.clone(),
                p.refused.clone(),
                p.no_route.clone(),
                p.unknown_host.clone(),
                p.key_verification_failed.clone(),
            ],
            self.timings.connect,
        );

        match self.conversation.await_pattern(&expectation) {
            Outcome::Matched { index: 0, .. } => self.send_password(),
            Outcome::Matched { index: 1, .. } => {
                let _ = writeln!(self.out, "Accepting host key...");
                self.conversation.send_line("yes");
                HopState::AwaitingPassword
            }
            Outcome::Matched { index: 2, .. } => HopState::Done(HopOutcome::Rejected),
            Outcome::Matched { index: 3, .. } => failed(ConnectionFailure::Refused),
            Outcome::Matched { index: 4, .. } => failed(ConnectionFailure::NoRoute),
            Outcome::Matched { index: 5, .. } => failed(ConnectionFailure::UnknownHost),
            Outcome::Matched { .. } => failed(ConnectionFailure::HostKeyVerificationFailed),
            other => self.unmatched(other),
        }
    }

    fn password(&mut self) -> HopState {
        let expectation =
            Expectation::new(vec![self.patterns.password.clone()], self.timings.trust_followup);
        match self.conversation.await_pattern(&expectation) {
            Outcome::Matched { .. } => self.send_password(),
            other => self.unmatched(other),
        }
    }

    fn send_password(&mut self) -> HopState {
        self.conversation.send_line(&self.credentials.password);
        HopState::AwaitingSecondFactorOrShell
    }

    fn second_factor_or_shell(&mut self) -> HopState {
        let p = self.patterns;
        let expectation = Expectation::new(
            vec![
                p.second_factor.clone(),
                p.permission_denied.clone(),
                p.password.clone(),
                p.shell.clone(),
            ],
            self.timings.after_password,
        );

        match self.conversation.await_pattern(&expectation) {
            Outcome::Matched { index: 0, .. } => {
                let _ = writeln!(self.out, "\n2FA Required!");
                let _ = self.out.flush();
                match self.operator.one_time_code() {
                    Some(code) => {
                        self.conversation.send_line(&code);
                        HopState::Settling
                    }
                    None => HopState::Done(HopOutcome::Interrupted),
                }
            }
            // A second password prompt means the first one was refused.
            Outcome::Matched { index: 1 | 2, .. } => HopState::Done(HopOutcome::Rejected),
            Outcome::Matched { .. } => HopState::Done(HopOutcome::Authenticated),
            Outcome::TimedOut => {
                log::debug!("no prompt after password, continuing");
                HopState::Settling
            }
            other => self.unmatched(other),
        }
    }

    /// Timeouts here count as success: not seeing a recognisable prompt
    /// does not mean the shell is unusable.
    fn settle(&mut self) -> HopState {
        let expectation =
            Expectation::new(self.patterns.settled_shell.clone(), self.timings.settle);
        match self.conversation.await_pattern(&expectation) {
            Outcome::Matched { .. } => HopState::Done(HopOutcome::Authenticated),
            Outcome::TimedOut => {
                log::warn!(
                    "no shell prompt from {} within {:?}, assuming connected",
                    self.credentials.host,
                    self.timings.settle
                );
                HopState::Done(HopOutcome::Authenticated)
            }
            other => self.unmatched(other),
        }
    }

    fn unmatched(&self, outcome: Outcome) -> HopState {
        HopState::Done(match outcome {
            Outcome::EndOfStream => HopOutcome::ConnectionError(ConnectionFailure::Closed),
            Outcome::Interrupted => HopOutcome::Interrupted,
            Outcome::TimedOut | Outcome::Matched { .. } => HopOutcome::Timeout,
        })
    }
}

fn failed(failure: ConnectionFailure) -> HopState {
    HopState::Done(HopOutcome::ConnectionError(failure))
}
