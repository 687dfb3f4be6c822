//! Line-oriented traffic log.
//!
//! Every relayed chunk and every lifecycle step of a session becomes exactly one
//! line, tagged with the session id. Payload lines escape `\` and newlines so a
//! chunk never spans lines.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::error::Peer;

/// One transcript line
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Payload { from: Peer, data: &'a [u8] },
    ClientGoesTls,
    ServerGoesTls,
    Eavesdropping,
    Closed,
    Terminated(&'a dyn std::error::Error),
}

struct Escaped<'a>(&'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut escaped = Vec::with_capacity(self.0.len());
        for &b in self.0 {
            match b {
                b'\\' => escaped.extend_from_slice(b"\\\\"),
                b'\n' => escaped.extend_from_slice(b"\\n"),
                _ => escaped.push(b),
            }
        }
        f.write_str(&String::from_utf8_lossy(&escaped))
    }
}

/// Escape a payload for single-line logging
pub fn escape(data: &[u8]) -> String {
    Escaped(data).to_string()
}

/// Render an event for session `id` without the trailing newline
pub fn format_event(id: u64, event: &Event<'_>) -> String {
    match event {
        Event::Payload { from: Peer::Client, data } => format!("C{id}|{}|", Escaped(data)),
        Event::Payload { from: Peer::Server, data } => format!("S{id}|{}|", Escaped(data)),
        Event::ClientGoesTls => format!("X{id}: client goes TLS"),
        Event::ServerGoesTls => format!("X{id}: server goes TLS"),
        Event::Eavesdropping => format!("X{id}: eavesdropping TLS"),
        Event::Closed => format!("X{id}: session closed"),
        Event::Terminated(err) => format!("X{id}: {err}"),
    }
}

#[derive(Clone)]
enum Sink {
    Stdout,
    Memory(Arc<Mutex<Vec<String>>>),
}

/// Cheap, cloneable handle to wherever transcript lines go
#[derive(Clone)]
pub struct Transcript {
    sink: Sink,
}

impl Transcript {
    pub fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    /// Keep lines in memory; read them back with [`Transcript::lines`]
    pub fn memory() -> Self {
        Self {
            sink: Sink::Memory(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn record(&self, id: u64, event: Event<'_>) {
        let line = format_event(id, &event);
        match &self.sink {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::debug!(session = id, error = %e, "could not write transcript line");
                }
            }
            Sink::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }

    /// Lines recorded so far; always empty for stdout
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Stdout => Vec::new(),
            Sink::Memory(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
        }
    }
}
