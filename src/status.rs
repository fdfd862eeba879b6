//! Status events emitted by the engine.
//!
//! The engine runs on one thread and the host drains a bounded channel
//! from another; events are the only thing that crosses that boundary.
//! All events of one stage precede all events of the next, and progress
//! percentages are monotone: matching reports `0..50`, rendering
//! `50..100`.

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::grid::TileId;

/// One engine-to-host message.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Human-readable progress note.
    Status(String),
    /// Overall progress percentage, monotone nondecreasing.
    Progress(u8),
    /// The neighbor pair currently being matched.
    ProgressPair(TileId, TileId),
    /// Terminal failure; exactly one is sent, after which the engine
    /// returns.
    Error(String),
    /// Successful completion message.
    Done(String),
}

/// Sending half handed to the engine. A sink built from
/// [`StatusSink::disconnected`] swallows every event, which keeps the
/// library usable without a host.
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: Option<Sender<StatusEvent>>,
}

impl StatusSink {
    pub fn new(tx: Sender<StatusEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Deliver one event. A dropped receiver is not an error: the engine
    /// keeps running (and cleaning up) even if the host went away.
    pub fn emit(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(StatusEvent::Status(message.into()));
    }

    pub fn progress(&self, percent: u8) {
        self.emit(StatusEvent::Progress(percent.min(100)));
    }

    pub fn pair(&self, src: TileId, dst: TileId) {
        self.emit(StatusEvent::ProgressPair(src, dst));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StatusEvent::Error(message.into()));
    }

    pub fn done(&self, message: impl Into<String>) {
        self.emit(StatusEvent::Done(message.into()));
    }
}

/// Build the bounded engine→host channel.
pub fn status_channel(capacity: usize) -> (StatusSink, Receiver<StatusEvent>) {
    let (tx, rx) = bounded(capacity);
    (StatusSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, rx) = status_channel(16);
        sink.status("starting");
        sink.progress(10);
        sink.pair(TileId::new(0, 0), TileId::new(0, 1));
        sink.done("ok");
        drop(sink);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StatusEvent::Status("starting".into()));
        assert_eq!(events[3], StatusEvent::Done("ok".into()));
    }

    #[test]
    fn test_disconnected_sink_is_silent() {
        let sink = StatusSink::disconnected();
        sink.status("nobody listening");
        sink.progress(50);
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (sink, rx) = status_channel(1);
        drop(rx);
        sink.status("host went away");
        sink.error("still fine");
    }
}
