use std::io;

use hopper_expect::Interrupt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

/// Exit status when a second signal cuts the graceful shutdown short. An
/// interrupted run counts as a clean one.
const FORCED_EXIT_STATUS: i32 = 0;

/// Route SIGINT and SIGTERM into an [`Interrupt`].
///
/// The first signal only raises the flag so waits and the relay can unwind.
/// A second one terminates the process at once, still with status 0.
pub fn install_interrupt_handlers() -> io::Result<Interrupt> {
    let interrupt = Interrupt::new();
    for signal in [SIGINT, SIGTERM] {
        // Registered first, so it sees the flag as it was before this delivery.
        flag::register_conditional_shutdown(signal, FORCED_EXIT_STATUS, interrupt.flag())?;
        flag::register(signal, interrupt.flag())?;
    }
    Ok(interrupt)
}
