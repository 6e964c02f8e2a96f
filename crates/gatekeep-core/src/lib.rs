// ABOUTME: Core library for gatekeep, containing the resource group domain model and JSON codec.
// ABOUTME: This crate defines the shared configuration types used across all gatekeep components.

pub mod codec;
pub mod model;
pub mod row;
pub mod units;

pub use model::{ManagerSpec, ResourceGroupIdTemplate, ResourceGroupSpec, SchedulingPolicy, SelectorSpec};
pub use units::{MemoryLimit, Size, TimeSpan};
