mod base;

pub use base::{
    EventBus, EventEmitter, EventKind, EventSink, ExecutionEvent, ExecutionId, NoopSink,
};
