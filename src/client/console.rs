//! Shared console output
//!
//! The sender and receiver halves of a client session both write to the
//! terminal. Each logical unit of output (a prompt, a notice, an incoming
//! line followed by a fresh prompt) is written under one lock and flushed
//! before the lock is released, so the two never tear each other's lines.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Serialized output sink shared by the tasks of a client session
///
/// Writes are synchronous `std::io::Write` calls made under a
/// `parking_lot` lock on whichever async task calls them. That is fine for a
/// terminal or an in-memory buffer, which return quickly, but a sink that
/// can block for long (a pipe nobody drains, a network file) would stall a
/// runtime worker. Wrap such sinks in `tokio::task::spawn_blocking` instead.
pub struct Console<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl Console<io::Stdout> {
    /// Console backed by the process's standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    /// Wrap an output sink
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Write `line` followed by a newline
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }

    /// Write a prompt without a trailing newline
    pub fn prompt(&self, prompt: &str) -> io::Result<()> {
        let mut out = self.out.lock();
        out.write_all(prompt.as_bytes())?;
        out.flush()
    }

    /// Show an incoming message on its own line, then repeat `prompt`
    ///
    /// The user may be halfway through typing when a message arrives; the
    /// leading newline moves the message off the prompt line.
    pub fn render_incoming(&self, message: &str, prompt: &str) -> io::Result<()> {
        let mut out = self.out.lock();
        write!(out, "\n{}\n{}", message, prompt)?;
        out.flush()
    }

    /// Run `f` with exclusive access to the underlying sink
    pub fn with_output<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.out.lock())
    }
}

impl<W> std::fmt::Debug for Console<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(console: &Console<Vec<u8>>) -> String {
        console.with_output(|out| String::from_utf8(out.clone()).unwrap())
    }

    #[test]
    fn test_output_units() {
        let console = Console::new(Vec::new());

        console.prompt("Send your message: ").unwrap();
        console.render_incoming("Alice : hi", "Send your message: ").unwrap();
        console.write_line("Disconnected from server.").unwrap();

        assert_eq!(
            contents(&console),
            "Send your message: \nAlice : hi\nSend your message: Disconnected from server.\n"
        );
    }

    #[test]
    fn test_clones_share_sink() {
        let console = Console::new(Vec::new());
        let clone = console.clone();

        clone.write_line("one").unwrap();
        console.write_line("two").unwrap();

        assert_eq!(contents(&console), "one\ntwo\n");
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let console = Console::new(Vec::new());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let console = console.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        console
                            .render_incoming(&format!("writer {} line {}", t, i), "> ")
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let output = contents(&console);
        let units: Vec<&str> = output.split("> ").filter(|u| !u.is_empty()).collect();
        assert_eq!(units.len(), 400);
        for unit in units {
            assert!(unit.starts_with("\nwriter "), "torn unit: {:?}", unit);
            assert!(unit.ends_with('\n'), "torn unit: {:?}", unit);
        }
    }
}
