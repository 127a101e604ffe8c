//! beacon-core - Core types and rule evaluation for the Beacon SDK.
//!
//! This crate provides the data model shared by the Beacon client pipeline:
//! the closed property-value variant, event and profile payloads, device
//! snapshots, campaign trigger definitions, and the pure rule evaluator that
//! matches incoming events against campaign trigger conditions.

pub mod campaign;
pub mod device;
pub mod error;
pub mod event;
pub mod rules;
pub mod value;

// Re-export commonly used types
pub use campaign::{
    Campaign, DataType, EventFilter, FrequencyCap, HideKind, Layout, Operator, PropertyCondition,
    PropertyPath, TriggerCondition,
};
pub use device::{DeviceRequest, DeviceSnapshot};
pub use error::{BeaconError, BeaconResult};
pub use event::{keys, Event, Profile, SystemEvent};
pub use value::PropertyValue;
