use crate::link_state::LinkStateMachine;
use crate::streaming::StreamingClient;
use log::*;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Returned without contacting the server when the link can't take commands
pub const COMMAND_FAILED: i32 = -1;

/// Control commands understood by the tracking server
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LiveMode,
    EditMode,
    TimelinePlay,
    TimelineStop,
    SetPlaybackStartFrame(i32),
    SetPlaybackStopFrame(i32),
    SetPlaybackCurrentFrame(i32),
    SetPlaybackLooping(bool),
    StartRecording,
    StopRecording,
    SetRecordTakeName(String),
    SetCurrentSession(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LiveMode => write!(f, "LiveMode"),
            Command::EditMode => write!(f, "EditMode"),
            Command::TimelinePlay => write!(f, "TimelinePlay"),
            Command::TimelineStop => write!(f, "TimelineStop"),
            Command::SetPlaybackStartFrame(frame) => write!(f, "SetPlaybackStartFrame,{}", frame),
            Command::SetPlaybackStopFrame(frame) => write!(f, "SetPlaybackStopFrame,{}", frame),
            Command::SetPlaybackCurrentFrame(frame) => {
                write!(f, "SetPlaybackCurrentFrame,{}", frame)
            }
            Command::SetPlaybackLooping(looping) => {
                write!(f, "SetPlaybackLooping,{}", if *looping { 1 } else { 0 })
            }
            Command::StartRecording => write!(f, "StartRecording"),
            Command::StopRecording => write!(f, "StopRecording"),
            Command::SetRecordTakeName(name) => write!(f, "SetRecordTakeName,{}", name),
            Command::SetCurrentSession(name) => write!(f, "SetCurrentSession,{}", name),
        }
    }
}

/// Fire and forget control commands, gated by link readiness.
///
/// Calls never retry; a `-1` result means the command was not sent or the
/// server did not answer.
pub struct CommandChannel {
    client: RwLock<Option<Arc<dyn StreamingClient>>>,
    state: Arc<LinkStateMachine>,
}

impl CommandChannel {
    pub fn new(state: Arc<LinkStateMachine>) -> Self {
        Self {
            client: RwLock::new(None),
            state,
        }
    }

    pub fn set_client(&self, client: Option<Arc<dyn StreamingClient>>) {
        match self.client.write() {
            Ok(mut current) => *current = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
    }

    fn client(&self) -> Option<Arc<dyn StreamingClient>> {
        match self.client.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn send(&self, command: Command) -> i32 {
        let client = match self.client() {
            Some(client) => client,
            None => {
                warn!("Not sending {}, no streaming client", command);
                return COMMAND_FAILED;
            }
        };
        if !self.state.is_ready() {
            warn!("Not sending {}, link is not ready", command);
            return COMMAND_FAILED;
        }
        let command = command.to_string();
        let result = client.send_command(&command);
        debug!("Command {} returned {}", command, result);
        result
    }

    pub fn set_live_mode(&self) -> i32 {
        self.send(Command::LiveMode)
    }

    pub fn set_edit_mode(&self) -> i32 {
        self.send(Command::EditMode)
    }

    pub fn timeline_play(&self) -> i32 {
        self.send(Command::TimelinePlay)
    }

    pub fn timeline_stop(&self) -> i32 {
        self.send(Command::TimelineStop)
    }

    pub fn set_playback_start_frame(&self, frame: i32) -> i32 {
        self.send(Command::SetPlaybackStartFrame(frame))
    }

    pub fn set_playback_stop_frame(&self, frame: i32) -> i32 {
        self.send(Command::SetPlaybackStopFrame(frame))
    }

    pub fn set_playback_current_frame(&self, frame: i32) -> i32 {
        self.send(Command::SetPlaybackCurrentFrame(frame))
    }

    pub fn set_playback_looping(&self, looping: bool) -> i32 {
        self.send(Command::SetPlaybackLooping(looping))
    }

    pub fn set_recording_start(&self) -> i32 {
        self.send(Command::StartRecording)
    }

    pub fn set_recording_stop(&self) -> i32 {
        self.send(Command::StopRecording)
    }

    pub fn set_record_take_name(&self, name: &str) -> i32 {
        self.send(Command::SetRecordTakeName(name.to_owned()))
    }

    pub fn set_current_session(&self, name: &str) -> i32 {
        self.send(Command::SetCurrentSession(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{DescriptionHandler, FrameHandler};
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<String>>,
    }

    impl StreamingClient for RecordingClient {
        fn connect(&self) -> Result<()> {
            Ok(())
        }
        fn request_model_definitions(&self) -> Result<()> {
            Ok(())
        }
        fn run_async(&self) -> Result<()> {
            Ok(())
        }
        fn run(&self) -> Result<()> {
            Ok(())
        }
        fn shutdown(&self) {}
        fn send_command(&self, command: &str) -> i32 {
            self.sent.lock().unwrap().push(command.to_owned());
            0
        }
        fn on_description(&self, _handler: DescriptionHandler) {}
        fn on_frame(&self, _handler: FrameHandler) {}
    }

    fn ready_state() -> Arc<LinkStateMachine> {
        let state = Arc::new(LinkStateMachine::new());
        let ticket = state.begin_rebuild().unwrap();
        state.complete_rebuild(ticket, || {});
        state
    }

    #[test]
    fn test_command_strings() {
        assert_eq!(Command::LiveMode.to_string(), "LiveMode");
        assert_eq!(Command::SetPlaybackStartFrame(12).to_string(), "SetPlaybackStartFrame,12");
        assert_eq!(Command::SetPlaybackLooping(false).to_string(), "SetPlaybackLooping,0");
        assert_eq!(
            Command::SetRecordTakeName("take_01".to_owned()).to_string(),
            "SetRecordTakeName,take_01"
        );
    }

    #[test]
    fn test_no_client_fails() {
        let channel = CommandChannel::new(ready_state());
        assert_eq!(channel.timeline_play(), COMMAND_FAILED);
    }

    #[test]
    fn test_not_ready_fails_without_sending() {
        let client = Arc::new(RecordingClient::default());
        let channel = CommandChannel::new(Arc::new(LinkStateMachine::new()));
        channel.set_client(Some(client.clone()));
        assert_eq!(channel.set_recording_start(), COMMAND_FAILED);
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_ready_forwards_commands() {
        let client = Arc::new(RecordingClient::default());
        let channel = CommandChannel::new(ready_state());
        channel.set_client(Some(client.clone()));
        assert_eq!(channel.set_live_mode(), 0);
        assert_eq!(channel.set_playback_current_frame(40), 0);
        assert_eq!(channel.set_current_session("Session 2"), 0);
        assert_eq!(
            *client.sent.lock().unwrap(),
            vec!["LiveMode", "SetPlaybackCurrentFrame,40", "SetCurrentSession,Session 2"]
        );
    }
}
