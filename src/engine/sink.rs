use crate::engine::events::PipelineEvent;

pub trait EventSink: Send {
    fn emit(&mut self, event: PipelineEvent);
}
