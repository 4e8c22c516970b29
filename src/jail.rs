//! Jail data model
//!
//! This module provides:
//! - Typed records for iocage listings
//! - Property values with their coercion rules
//! - State machine for replaying planned lifecycle transitions

pub mod state;
pub mod types;

// Re-exports
pub use state::{Lifecycle, LifecycleTracker};
pub use types::{
    DesiredProperties, JailRecord, PluginRecord, Properties, PropertyValue, ResourceKind,
    RunState, UNSET,
};
