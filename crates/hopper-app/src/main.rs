mod config;
mod hop;
mod operator;
mod orchestrator;
mod signals;
#[cfg(test)]
mod testing;

use std::io;
use std::process::ExitCode;

use config::Config;
use hopper_expect::Interrupt;
use operator::TerminalOperator;
use orchestrator::{Orchestrator, PtyTransport};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();

    // Without handlers Ctrl-C still ends the run, just not gracefully.
    let interrupt = signals::install_interrupt_handlers().unwrap_or_else(|e| {
        log::warn!("could not install signal handlers: {e}");
        Interrupt::new()
    });

    let config = Config::load();
    let dimensions = hopper_pty::terminal_dimensions();
    log::debug!("local terminal is {}x{}", dimensions.cols, dimensions.rows);

    let mut transport = PtyTransport::new(interrupt.clone());
    let mut operator = TerminalOperator::new(interrupt);
    let mut stdout = io::stdout();

    let outcome = Orchestrator::new(&mut transport, &mut operator, &mut stdout, dimensions)
        .run(config);
    log::info!("finished: {outcome:?}");
    ExitCode::from(outcome.exit_code())
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (warnings by default).
/// `log` records from the library crates are picked up through the bridge.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("logging disabled: {e}");
    }
}
