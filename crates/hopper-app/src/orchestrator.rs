//! The two-hop sequence: jump host, destination, then hand the terminal over.

use std::io::Write;

use hopper_expect::{Conversation, Interrupt};
use hopper_pty::{
    PassthroughEnd, PtyDimensions, PtyError, ResizePropagator, Session, SessionOptions,
};

use crate::config::{Config, ConfigError, Credentials};
use crate::hop::{HopAuthenticator, HopKind, HopOutcome, HopPatterns, HopTimings};
use crate::operator::Operator;

/// Starts the child process and, at the end, hands it to the real terminal.
pub trait Transport {
    type Session: Conversation;

    fn spawn(&mut self, command: &str, dimensions: PtyDimensions)
        -> Result<Self::Session, PtyError>;

    /// Relay the terminal to the child until it exits or the operator
    /// interrupts.
    fn passthrough(&mut self, session: Self::Session) -> Result<PassthroughEnd, PtyError>;
}

/// The real transport: a PTY session with SIGWINCH forwarding.
pub struct PtyTransport {
    interrupt: Interrupt,
    resize: Option<ResizePropagator>,
}

impl PtyTransport {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            resize: None,
        }
    }
}

impl Transport for PtyTransport {
    type Session = Session;

    fn spawn(&mut self, command: &str, dimensions: PtyDimensions) -> Result<Session, PtyError> {
        let session = Session::spawn(
            command,
            dimensions,
            SessionOptions {
                interrupt: Some(self.interrupt.clone()),
                max_buffer: None,
            },
        )?;

        match ResizePropagator::start(session.resize_handle()) {
            Ok(propagator) => self.resize = Some(propagator),
            Err(e) => log::warn!("terminal resizes will not be forwarded: {e}"),
        }
        Ok(session)
    }

    fn passthrough(&mut self, session: Session) -> Result<PassthroughEnd, PtyError> {
        let end = session.enter_passthrough();
        if let Some(propagator) = self.resize.take() {
            propagator.stop();
        }
        end
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Passthrough ran until the remote session ended.
    Completed { exit_code: u32 },
    /// The operator cancelled.
    Interrupted,
    /// Settings were missing or unusable; nothing was spawned.
    BadConfig(ConfigError),
    HopFailed { hop: HopKind, outcome: HopOutcome },
    /// Anything else (spawn or terminal failure).
    Error(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed { .. } | RunOutcome::Interrupted => 0,
            _ => 1,
        }
    }
}

/// One-line explanation of why a hop failed.
pub fn diagnostic(hop: HopKind, credentials: &Credentials, outcome: HopOutcome) -> String {
    let host = &credentials.host;
    match outcome {
        HopOutcome::Rejected => format!(
            "Error: Permission denied on {} {host}. Check your {}.",
            hop.label(),
            hop.password_var()
        ),
        HopOutcome::Timeout => format!("Error: Connection timeout ({} {host})", hop.label()),
        HopOutcome::ConnectionError(failure) => {
            format!("Error: {failure} ({} {host})", hop.label())
        }
        HopOutcome::Authenticated | HopOutcome::Interrupted => {
            format!("{} {host}: {outcome:?}", hop.label())
        }
    }
}

pub struct Orchestrator<'a, T, O, W> {
    transport: &'a mut T,
    operator: &'a mut O,
    out: &'a mut W,
    dimensions: PtyDimensions,
    jump_timings: HopTimings,
    dest_timings: HopTimings,
}

impl<'a, T: Transport, O: Operator, W: Write> Orchestrator<'a, T, O, W> {
    pub fn new(
        transport: &'a mut T,
        operator: &'a mut O,
        out: &'a mut W,
        dimensions: PtyDimensions,
    ) -> Self {
        Self {
            transport,
            operator,
            out,
            dimensions,
            jump_timings: HopTimings::for_hop(HopKind::Jump),
            dest_timings: HopTimings::for_hop(HopKind::Destination),
        }
    }

    pub fn with_timings(mut self, jump: HopTimings, dest: HopTimings) -> Self {
        self.jump_timings = jump;
        self.dest_timings = dest;
        self
    }

    /// Run the whole sequence, reporting progress and failures to `out`.
    pub fn run(mut self, config: Result<Config, ConfigError>) -> RunOutcome {
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                let _ = e.report(self.out);
                return RunOutcome::BadConfig(e);
            }
        };
        let patterns = match HopPatterns::new() {
            Ok(patterns) => patterns,
            Err(e) => return self.error(e.to_string()),
        };

        self.say(format_args!("=== Step 1: Connecting to {} ===", config.jump.target()));
        let mut session = match self
            .transport
            .spawn(&config.jump.ssh_command(), self.dimensions)
        {
            Ok(session) => session,
            Err(e) => return self.error(e.to_string()),
        };

        if let Some(end) = self.hop(HopKind::Jump, &config.jump, &patterns, &mut session) {
            return end;
        }
        self.say(format_args!("Connected to {}!\n", config.jump.host));

        self.say(format_args!("=== Step 2: Connecting to {} ===", config.dest.target()));
        session.send_line(&config.dest.ssh_command());

        if let Some(end) = self.hop(HopKind::Destination, &config.dest, &patterns, &mut session) {
            return end;
        }
        self.say(format_args!("\nConnected to {}!", config.dest.target()));
        self.say(format_args!("Type 'exit' twice to disconnect.\n"));

        match self.transport.passthrough(session) {
            Ok(PassthroughEnd::ChildExited(exit_code)) => {
                log::info!("remote session ended with status {exit_code}");
                RunOutcome::Completed { exit_code }
            }
            Ok(PassthroughEnd::Interrupted) => self.interrupted(),
            Err(e) => self.error(e.to_string()),
        }
    }

    /// Authenticate one hop; `Some` means the run is over.
    fn hop(
        &mut self,
        kind: HopKind,
        credentials: &Credentials,
        patterns: &HopPatterns,
        session: &mut T::Session,
    ) -> Option<RunOutcome> {
        let timings = match kind {
            HopKind::Jump => self.jump_timings,
            HopKind::Destination => self.dest_timings,
        };
        let outcome = HopAuthenticator {
            kind,
            credentials,
            patterns,
            timings,
            conversation: session,
            operator: &mut *self.operator,
            out: &mut *self.out,
        }
        .run();

        match outcome {
            HopOutcome::Authenticated => None,
            HopOutcome::Interrupted => Some(self.interrupted()),
            failed => {
                self.say(format_args!("{}", diagnostic(kind, credentials, failed)));
                Some(RunOutcome::HopFailed {
                    hop: kind,
                    outcome: failed,
                })
            }
        }
    }

    fn interrupted(&mut self) -> RunOutcome {
        self.say(format_args!("\n\nConnection interrupted by user"));
        RunOutcome::Interrupted
    }

    fn error(&mut self, message: String) -> RunOutcome {
        self.say(format_args!("Error: {message}"));
        RunOutcome::Error(message)
    }

    fn say(&mut self, line: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hop::ConnectionFailure;
    use crate::testing::{FixedOperator, ScriptedPeer, ScriptedTransport};
    use std::collections::HashMap;
    use std::time::Duration;

    fn config_lookup(skip: &str) -> Result<Config, ConfigError> {
        let values: HashMap<&str, &str> = [
            ("JUMP_HOST", "jump.example.org"),
            ("JUMP_USER", "alice"),
            ("JUMP_PASSWORD", "jump-pw"),
            ("DEST_HOST", "dest.example.org"),
            ("DEST_USER", "bob"),
            ("DEST_PASSWORD", "dest-pw"),
        ]
        .into_iter()
        .filter(|(k, _)| *k != skip)
        .collect();
        Config::from_lookup(|key| values.get(key).map(|v| v.to_string()))
    }

    fn quick() -> HopTimings {
        HopTimings {
            connect: Duration::from_millis(300),
            trust_followup: Duration::from_millis(300),
            after_password: Duration::from_millis(300),
            settle: Duration::from_millis(300),
        }
    }

    struct Run {
        outcome: RunOutcome,
        output: String,
        transport: ScriptedTransport,
        operator: FixedOperator,
    }

    fn run_with(peer: ScriptedPeer, operator: FixedOperator, config: Result<Config, ConfigError>) -> Run {
        let mut transport = ScriptedTransport::new(peer);
        let mut operator = operator;
        let mut out = Vec::new();
        let outcome = Orchestrator::new(
            &mut transport,
            &mut operator,
            &mut out,
            PtyDimensions::new(40, 120),
        )
        .with_timings(quick(), quick())
        .run(config);
        Run {
            outcome,
            output: String::from_utf8(out).unwrap(),
            transport,
            operator,
        }
    }

    fn happy_peer() -> ScriptedPeer {
        ScriptedPeer::new("alice@jump.example.org's password: ")
            .on("jump-pw", "\r\nLast login: Mon\r\n[alice@jump ~]$ ")
            .on("ssh -t bob@dest.example.org", "ssh -t bob@dest.example.org\r\nbob@dest.example.org's password: ")
            .on("dest-pw", "\r\n[bob@dest ~]$ ")
    }

    #[test]
    fn test_both_hops_reach_passthrough() {
        let peer = happy_peer();
        let sent = peer.sent_log();
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(run.outcome, RunOutcome::Completed { exit_code: 0 }));
        assert_eq!(run.outcome.exit_code(), 0);
        assert!(run.transport.passthrough_entered);
        assert_eq!(
            run.transport.spawned,
            vec![("ssh -t alice@jump.example.org".to_string(), PtyDimensions::new(40, 120))]
        );
        assert_eq!(
            *sent.borrow(),
            vec!["jump-pw", "ssh -t bob@dest.example.org", "dest-pw"]
        );
        assert!(!run.output.contains("Error"), "output: {}", run.output);
        assert!(run.output.contains("=== Step 1: Connecting to alice@jump.example.org ==="));
        assert!(run.output.contains("Connected to jump.example.org!"));
        assert!(run.output.contains("=== Step 2: Connecting to bob@dest.example.org ==="));
        assert!(run.output.contains("Connected to bob@dest.example.org!"));
        assert!(run.output.contains("Type 'exit' twice to disconnect."));
    }

    #[test]
    fn test_host_key_accepted_once() {
        let peer = ScriptedPeer::new(
            "The authenticity of host 'jump.example.org' can't be established.\r\n\
             Are you sure you want to continue connecting (yes/no/[fingerprint])? ",
        )
        .on("yes", "\r\nWarning: Permanently added 'jump.example.org'.\r\nPassword: ")
        .on("jump-pw", "\r\n[alice@jump ~]$ ")
        .on("ssh -t bob@dest.example.org", "Password: ")
        .on("dest-pw", "\r\n[bob@dest ~]$ ");
        let sent = peer.sent_log();
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(run.outcome, RunOutcome::Completed { .. }));
        let sent = sent.borrow();
        assert_eq!(sent.iter().filter(|l| *l == "yes").count(), 1);
        assert_eq!(sent[0], "yes");
        assert_eq!(sent[1], "jump-pw");
    }

    #[test]
    fn test_host_key_on_destination_hop() {
        let peer = ScriptedPeer::new("Password: ")
            .on("jump-pw", "\r\n[alice@jump ~]$ ")
            .on(
                "ssh -t bob@dest.example.org",
                "Are you sure you want to continue connecting (yes/no)? ",
            )
            .on("yes", "Password: ")
            .on("dest-pw", "\r\n[bob@dest ~]$ ");
        let sent = peer.sent_log();
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(run.outcome, RunOutcome::Completed { .. }));
        assert_eq!(
            *sent.borrow(),
            vec!["jump-pw", "ssh -t bob@dest.example.org", "yes", "dest-pw"]
        );
    }

    #[test]
    fn test_destination_permission_denied() {
        let peer = ScriptedPeer::new("Password: ")
            .on("jump-pw", "\r\n[alice@jump ~]$ ")
            .on("ssh -t bob@dest.example.org", "Password: ")
            .on("dest-pw", "\r\nPermission denied, please try again.\r\n");
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(
            run.outcome,
            RunOutcome::HopFailed {
                hop: HopKind::Destination,
                outcome: HopOutcome::Rejected
            }
        ));
        assert_eq!(run.outcome.exit_code(), 1);
        assert!(!run.transport.passthrough_entered);
        assert!(run.output.contains("Check your DEST_PASSWORD."), "output: {}", run.output);
        assert!(!run.output.contains("Connected to bob@dest.example.org!"));
    }

    #[test]
    fn test_missing_jump_user_spawns_nothing() {
        let run = run_with(happy_peer(), FixedOperator::none(), config_lookup("JUMP_USER"));

        assert!(matches!(run.outcome, RunOutcome::BadConfig(_)));
        assert_eq!(run.outcome.exit_code(), 1);
        assert!(run.transport.spawned.is_empty());
        assert!(run.output.contains("Error: Missing configuration:\n  - JUMP_USER\n"));
    }

    #[test]
    fn test_second_factor_on_jump_hop() {
        let peer = ScriptedPeer::new("Password: ")
            .on("jump-pw", "\r\nYour 2nd factor (lxplus): ")
            .on("654321", "\r\n")
            .on("ssh -t bob@dest.example.org", "Password: ")
            .on("dest-pw", "\r\n[bob@dest ~]$ ");
        let sent = peer.sent_log();
        let run = run_with(peer, FixedOperator::with_code("654321"), config_lookup(""));

        // No prompt followed the code; the settle wait timed out and the run carried on.
        assert!(matches!(run.outcome, RunOutcome::Completed { .. }));
        assert_eq!(run.operator.asked, 1);
        assert_eq!(
            *sent.borrow(),
            vec!["jump-pw", "654321", "ssh -t bob@dest.example.org", "dest-pw"]
        );
        assert!(run.output.contains("2FA Required!"));
    }

    #[test]
    fn test_jump_refused_aborts() {
        let peer = ScriptedPeer::new("ssh: connect to host jump.example.org port 22: Connection refused\r\n")
            .closing();
        let sent = peer.sent_log();
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(
            run.outcome,
            RunOutcome::HopFailed {
                hop: HopKind::Jump,
                outcome: HopOutcome::ConnectionError(ConnectionFailure::Refused)
            }
        ));
        assert!(sent.borrow().is_empty());
        assert!(run.output.contains("Error: Connection refused (jump host jump.example.org)"));
        assert!(!run.output.contains("Step 2"));
    }

    #[test]
    fn test_interrupt_is_graceful() {
        let peer = ScriptedPeer::new("").interrupted();
        let run = run_with(peer, FixedOperator::none(), config_lookup(""));

        assert!(matches!(run.outcome, RunOutcome::Interrupted));
        assert_eq!(run.outcome.exit_code(), 0);
        assert!(run.output.contains("Connection interrupted by user"));
        assert!(!run.output.contains("Error"));
    }

    #[test]
    fn test_interrupt_during_passthrough() {
        let mut transport = ScriptedTransport::new(happy_peer()).interrupted_in_passthrough();
        let mut operator = FixedOperator::none();
        let mut out = Vec::new();
        let outcome = Orchestrator::new(
            &mut transport,
            &mut operator,
            &mut out,
            PtyDimensions::default(),
        )
        .with_timings(quick(), quick())
        .run(config_lookup(""));

        assert!(transport.passthrough_entered);
        assert!(matches!(outcome, RunOutcome::Interrupted));
        assert_eq!(outcome.exit_code(), 0);
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Connected to bob@dest.example.org!"));
        assert!(output.ends_with("Connection interrupted by user\n"), "output: {output}");
    }

    #[test]
    fn test_spawn_failure() {
        let mut transport = ScriptedTransport::broken();
        let mut operator = FixedOperator::none();
        let mut out = Vec::new();
        let outcome = Orchestrator::new(
            &mut transport,
            &mut operator,
            &mut out,
            PtyDimensions::default(),
        )
        .run(config_lookup(""));

        assert!(matches!(outcome, RunOutcome::Error(_)));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(transport.spawned.len(), 1);
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Error: PTY spawn failed"), "output: {output}");
        assert!(!output.contains("Step 2"));
    }

    #[test]
    fn test_diagnostics() {
        let creds = Credentials {
            host: "h".to_string(),
            user: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(
            diagnostic(HopKind::Jump, &creds, HopOutcome::Rejected),
            "Error: Permission denied on jump host h. Check your JUMP_PASSWORD."
        );
        assert_eq!(
            diagnostic(HopKind::Destination, &creds, HopOutcome::Timeout),
            "Error: Connection timeout (destination h)"
        );
        assert_eq!(
            diagnostic(
                HopKind::Jump,
                &creds,
                HopOutcome::ConnectionError(ConnectionFailure::Closed)
            ),
            "Error: Connection closed unexpectedly (jump host h)"
        );
    }
}
