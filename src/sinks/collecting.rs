use crate::engine::events::{PipelineEvent, PipelineEventKind};
use crate::engine::sink::EventSink;

/// Keeps every event of a single pipeline run in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Vec<PipelineEvent>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    /// Just the kinds, in emission order.
    pub fn kinds(&self) -> Vec<&PipelineEventKind> {
        self.events.iter().map(|e| &e.kind).collect()
    }

    pub fn into_events(self) -> Vec<PipelineEvent> {
        self.events
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&mut self, event: PipelineEvent) {
        tracing::debug!(run_id = %event.run_id, kind = ?event.kind, "pipeline event");
        self.events.push(event);
    }
}
