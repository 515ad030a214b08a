//! Forwarding of companion output to the invoking terminal.
use std::{
    io::{self, BufRead, BufReader, Read, Write},
    sync::mpsc::{SyncSender, TrySendError},
    thread::{self, JoinHandle},
};

use strum_macros::{AsRefStr, Display};
use tracing::debug;

use crate::process::OutputEvent;

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Spawns a thread that echoes every line of `reader` with a `[label]` prefix and forwards it
/// to `events`. The sender is dropped at EOF, which is how consumers observe closure.
///
/// Forwarding never blocks: lines that do not fit in the channel, or arrive after the consumer
/// went away, are only echoed.
pub fn spawn_output_pump<R>(
    label: &str,
    reader: R,
    kind: StreamKind,
    events: SyncSender<OutputEvent>,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let label = label.to_string();
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        let mut dropped = 0usize;

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    echo_line(&label, kind, &text);
                    // Keep draining either way so the child never blocks on a full pipe.
                    match events.try_send(OutputEvent::Line { stream: kind, text }) {
                        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                        Err(TrySendError::Full(_)) => dropped += 1,
                    }
                }
                Err(err) => {
                    debug!("[{label}] {kind} pump stopped: {err}");
                    break;
                }
            }
        }
        if dropped > 0 {
            debug!("[{label}] {dropped} {kind} line(s) were not buffered; backlog was full");
        }
    })
}

fn echo_line(label: &str, kind: StreamKind, text: &str) {
    let result = match kind {
        StreamKind::Stdout => writeln!(io::stdout().lock(), "[{label}] {text}"),
        StreamKind::Stderr => writeln!(io::stderr().lock(), "[{label}] {text}"),
    };
    if let Err(err) = result {
        debug!("failed to echo {kind} line for '{label}': {err}");
    }
}
