//! Standard node library
//!
//! Generic control-flow and utility nodes

mod control;
mod debug;
mod time;
mod variable;

pub use control::{EndNode, IfNode, LoopNode, StartNode, SwitchNode, TryCatchNode, MAX_LOOP_COUNT};
pub use debug::LogNode;
pub use time::DelayNode;
pub use variable::SetVariableNode;
use graphruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(control::StartNodeFactory));
    registry.register(Arc::new(control::EndNodeFactory));
    registry.register(Arc::new(control::IfNodeFactory));
    registry.register(Arc::new(control::SwitchNodeFactory));
    registry.register(Arc::new(control::LoopNodeFactory));
    registry.register(Arc::new(control::TryCatchNodeFactory));
    registry.register(Arc::new(variable::SetVariableNodeFactory));
    registry.register(Arc::new(debug::LogNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
