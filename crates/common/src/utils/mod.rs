//! Common utility helpers
//!
//! - **[`serde`]**: Serialization helpers for durations in configuration files
//! - **[`type_name`]**: Short type names for metric tags

pub mod serde;
pub mod type_name;

pub use self::serde::{duration_millis, option_duration_millis};
pub use self::type_name::short_type_name;
