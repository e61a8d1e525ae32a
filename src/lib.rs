//! Client side of a motion capture link.
//!
//! A [`StreamingClient`] delivers skeleton descriptions and per frame bone
//! poses. [`MotiveLink`] turns descriptions into a bind pose definition and
//! frames into local transform matrices, and only trusts frames once a
//! description has been fully processed.

pub mod command;
pub mod config;
pub mod data;
pub mod error;
pub mod frame_cache;
pub mod link_state;
pub mod motive_link;
pub mod mqtt_client;
pub mod skeleton;
pub mod streaming;
pub mod transform;

pub use command::{Command, CommandChannel, COMMAND_FAILED};
pub use config::LinkConfig;
pub use error::LinkError;
pub use frame_cache::{FrameCache, FrameSnapshot};
pub use link_state::{LinkState, LinkStateMachine};
pub use motive_link::{LinkStats, MotiveLink};
pub use mqtt_client::MqttStreamingClient;
pub use skeleton::{SkeletonDefinition, SkeletonModel};
pub use streaming::StreamingClient;
pub use transform::{compose, TransformMatrix};
