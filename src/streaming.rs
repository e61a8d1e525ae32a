use crate::data::{Description, Frame};
use anyhow::Result;

pub type DescriptionHandler = Box<dyn Fn(Description) + Send + Sync>;
pub type FrameHandler = Box<dyn Fn(Frame) + Send + Sync>;

/// Connection to a tracking server that streams model descriptions and
/// frames and accepts control commands.
///
/// Handlers are called from the client's own receive thread.
pub trait StreamingClient: Send + Sync {
    fn connect(&self) -> Result<()>;

    /// Ask the server to (re)send its model descriptions
    fn request_model_definitions(&self) -> Result<()>;

    /// Start delivering events to the handlers without blocking
    fn run_async(&self) -> Result<()>;

    /// Deliver events until the client shuts down
    fn run(&self) -> Result<()>;

    fn shutdown(&self);

    /// Send a command and wait for the server's status code
    fn send_command(&self, command: &str) -> i32;

    fn on_description(&self, handler: DescriptionHandler);

    fn on_frame(&self, handler: FrameHandler);
}
