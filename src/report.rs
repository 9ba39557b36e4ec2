use std::sync::Mutex;

/// What stage produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Scan,
    Upload,
    Download,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The item was processed; the string carries a short label ("Uploaded", "Matched", ...)
    Done(String),
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One processed item. `item` is the path or record id that identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub item: String,
    pub outcome: Outcome,
}

/// Receives progress from the scanner and transfer loops.
///
/// `Sync` so the scanner can report from rayon workers.
pub trait Reporter: Sync {
    /// Called once before a batch with the number of items it will contain.
    fn start(&self, _kind: EventKind, _total: usize) {}

    fn event(&self, event: Event);

    fn finish(&self, _kind: EventKind) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn event(&self, event: Event) {
        match &event.outcome {
            Outcome::Done(label) => log::debug!("{label} -- {}", event.item),
            Outcome::Skipped(reason) => log::debug!("Skipped {} | {reason}", event.item),
            Outcome::Failed(reason) => log::warn!("Failed -- {} | {reason}", event.item),
        }
    }
}

/// Keeps every event in memory. Handy for tests and for summaries.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<Event>>,
}

impl CollectingReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Reporter for CollectingReporter {
    fn event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
