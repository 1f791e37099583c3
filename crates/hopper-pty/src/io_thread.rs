//! Dedicated I/O thread that reads PTY output and forwards it to the matcher.
//!
//! PTY reads are blocking, so the reader lives on its own OS thread and
//! hands chunks over a channel. The session side polls that channel with a
//! timeout; the thread dropping its sender is how end of stream is seen.

use std::io::Read;
use std::sync::mpsc::Sender;

use tokio::sync::mpsc;

/// Start the read loop on a dedicated OS thread.
///
/// The loop ends on EOF, a read error, a stop signal, or when the receiving
/// side of `output` has gone away.
pub fn start_io_thread(
    reader: Box<dyn Read + Send>,
    output: Sender<Vec<u8>>,
    stop_rx: mpsc::Receiver<()>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("pty-io".to_string())
        .spawn(move || io_loop(reader, output, stop_rx))?;
    Ok(())
}

fn io_loop(
    mut reader: Box<dyn Read + Send>,
    output: Sender<Vec<u8>>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut buf = [0u8; 65536];

    loop {
        match stop_rx.try_recv() {
            Ok(()) => return,
            Err(mpsc::error::TryRecvError::Disconnected) => return,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        // Blocks until the child writes or the PTY closes.
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                log::debug!("PTY reached EOF");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                // EIO is how Linux reports the slave side closing.
                log::debug!("PTY read ended: {e}");
                return;
            }
        };

        log::trace!("read {n} bytes from PTY");
        if output.send(buf[..n].to_vec()).is_err() {
            return;
        }
    }
}
