use std::fmt::{Debug, Write};
use std::io::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::event::Event;
use tracing::field::{Field, Visit};
use tracing::{span, Id, Level, Metadata, Subscriber};

/// Prints every enabled event as one line on stderr. Spans only get an id.
pub struct StderrSubscriber {
    ids: AtomicUsize,
    max_level: Level,
}

impl StderrSubscriber {
    pub fn new(max_level: Level) -> Self {
        StderrSubscriber {
            ids: AtomicUsize::new(1),
            max_level,
        }
    }

    /// WARN and above by default, one step more verbose per `-v`.
    pub fn with_verbosity(occurrences: u64) -> Self {
        let level = match occurrences {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        StderrSubscriber::new(level)
    }
}

// https://docs.rs/tracing/0.1.7/tracing/subscriber/trait.Subscriber.html
impl Subscriber for StderrSubscriber {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= &self.max_level
    }

    fn new_span(&self, _span: &span::Attributes) -> Id {
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        Id::from_u64(id as u64)
    }

    fn record(&self, _span: &Id, _values: &span::Record) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event) {
        let metadata = event.metadata();
        let mut line = LineVisitor::default();
        event.record(&mut line);
        // Nowhere left to report a failed write to stderr
        let _ = writeln!(
            io::stderr(),
            "{:>5} {}: {}{}",
            metadata.level(),
            metadata.target(),
            line.message,
            line.fields
        );
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(StderrSubscriber::with_verbosity(0).max_level, Level::WARN);
        assert_eq!(StderrSubscriber::with_verbosity(2).max_level, Level::DEBUG);
        assert_eq!(StderrSubscriber::with_verbosity(7).max_level, Level::TRACE);
    }
}
