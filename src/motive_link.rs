use crate::command::CommandChannel;
use crate::config::LinkConfig;
use crate::data::{Description, Frame};
use crate::error::LinkError;
use crate::frame_cache::{FrameCache, FrameSnapshot};
use crate::link_state::{LinkState, LinkStateMachine};
use crate::skeleton::{SkeletonDefinition, SkeletonModel};
use crate::streaming::StreamingClient;
use anyhow::{Context, Result};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub descriptions: u64,
    pub rejected_descriptions: u64,
    pub frames_received: u64,
    pub frames_converted: u64,
    /// Frames that arrived while WAITING or went stale during conversion
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    descriptions: AtomicU64,
    rejected_descriptions: AtomicU64,
    frames_received: AtomicU64,
    frames_converted: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Everything the stream callbacks touch
struct LinkCore {
    position_scale: f64,
    state: Arc<LinkStateMachine>,
    skeleton: RwLock<Arc<SkeletonModel>>,
    frames: FrameCache,
    counters: Counters,
    /// Bumped on every attach, handlers of older clients stop acting
    attachment: AtomicU64,
}

impl LinkCore {
    fn is_attached(&self, attachment: u64) -> bool {
        self.attachment.load(Ordering::SeqCst) == attachment
    }

    fn skeleton(&self) -> Arc<SkeletonModel> {
        match self.skeleton.read() {
            Ok(skeleton) => Arc::clone(&*skeleton),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn publish_skeleton(&self, model: Arc<SkeletonModel>) {
        match self.skeleton.write() {
            Ok(mut skeleton) => *skeleton = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }

    fn handle_description(&self, description: &Description) {
        debug!("Received model descriptions");
        let ticket = match self.state.begin_rebuild() {
            Some(ticket) => ticket,
            None => return,
        };
        self.counters.descriptions.fetch_add(1, Ordering::Relaxed);

        match SkeletonModel::build(description, self.position_scale) {
            Ok(model) => {
                let bone_count = model.len();
                let model = Arc::new(model);
                if self
                    .state
                    .complete_rebuild(ticket, || self.publish_skeleton(model))
                {
                    info!(
                        "Skeleton ready with {} bones in {} skeletons",
                        bone_count,
                        description.skeletons.len()
                    );
                }
            }
            Err(error) => {
                self.counters
                    .rejected_descriptions
                    .fetch_add(1, Ordering::Relaxed);
                let keep_previous = !self.skeleton().is_empty();
                error!(
                    "Rejected model description: {}, keeping previous skeleton: {}",
                    error, keep_previous
                );
                self.state.abort_rebuild(ticket, keep_previous);
            }
        }
    }

    fn handle_frame(&self, frame: &Frame) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        let ticket = match self.state.frame_ticket() {
            Some(ticket) => ticket,
            None => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Dropping frame, link is not ready");
                return;
            }
        };

        let model = self.skeleton();
        let snapshot = FrameSnapshot::convert(frame, &model, self.position_scale);
        if self
            .state
            .publish_frame(ticket, || self.frames.replace(snapshot))
        {
            self.counters.frames_converted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping frame, skeleton changed during conversion");
        }
    }
}

/// Receives skeleton descriptions and frames from a [`StreamingClient`] and
/// keeps the latest bind pose and local bone transforms for consumers.
pub struct MotiveLink {
    config: LinkConfig,
    core: Arc<LinkCore>,
    client: Mutex<Option<Arc<dyn StreamingClient>>>,
    commands: CommandChannel,
}

impl MotiveLink {
    pub fn new(config: LinkConfig) -> Self {
        let state = Arc::new(LinkStateMachine::new());
        let core = Arc::new(LinkCore {
            position_scale: config.position_scale,
            state: Arc::clone(&state),
            skeleton: RwLock::new(Arc::new(SkeletonModel::empty())),
            frames: FrameCache::new(),
            counters: Counters::default(),
            attachment: AtomicU64::new(0),
        });
        Self {
            config,
            core,
            client: Mutex::new(None),
            commands: CommandChannel::new(state),
        }
    }

    /// Subscribe to the client's events and route commands through it.
    ///
    /// Handlers only hold a weak reference, events for a dropped link are
    /// ignored. A previously attached client is shut down and its events are
    /// ignored from here on. A disposed link refuses new clients.
    pub fn attach(&self, client: Arc<dyn StreamingClient>) {
        if self.core.state.is_disposed() {
            warn!("Not attaching a streaming client to a disposed link");
            return;
        }
        let attachment = self.core.attachment.fetch_add(1, Ordering::SeqCst) + 1;

        let core = Arc::downgrade(&self.core);
        client.on_description(Box::new(move |description: Description| {
            if let Some(core) = core.upgrade() {
                if core.is_attached(attachment) {
                    core.handle_description(&description);
                }
            }
        }));
        let core = Arc::downgrade(&self.core);
        client.on_frame(Box::new(move |frame: Frame| {
            if let Some(core) = core.upgrade() {
                if core.is_attached(attachment) {
                    core.handle_frame(&frame);
                }
            }
        }));
        self.commands.set_client(Some(Arc::clone(&client)));

        let previous = self.client_slot().replace(client);
        if let Some(previous) = previous {
            warn!("Replacing the attached streaming client, shutting the previous one down");
            previous.shutdown();
        }
    }

    fn client_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn StreamingClient>>> {
        match self.client.lock() {
            Ok(client) => client,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Connect, ask for model definitions and start receiving.
    ///
    /// Connecting is retried with a doubling backoff up to
    /// `connect_attempts` times.
    pub fn start(&self) -> Result<()> {
        let client = self
            .client_slot()
            .clone()
            .ok_or(LinkError::NotConnected)
            .context("No streaming client attached")?;

        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match client.connect() {
                Ok(()) => break,
                Err(error) if attempt < attempts => {
                    let backoff = self.config.connect_backoff(attempt);
                    warn!(
                        "Connect attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, attempts, error, backoff
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(error.context(format!("Failed to connect after {} attempts", attempts)))
                }
            }
        }

        client.request_model_definitions()?;
        thread::sleep(self.config.settle_delay());
        client.run_async()?;
        info!("MotiveLink started and listening for data");
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        self.core.state.state()
    }

    pub fn is_ready(&self) -> bool {
        self.core.state.is_ready()
    }

    pub fn skeleton(&self) -> Arc<SkeletonModel> {
        self.core.skeleton()
    }

    pub fn skeleton_definition(&self) -> SkeletonDefinition {
        self.core.skeleton().definition()
    }

    /// Latest converted frame. Kept while a new description is processed.
    pub fn local_matrices(&self) -> Arc<FrameSnapshot> {
        self.core.frames.snapshot()
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        let counters = &self.core.counters;
        LinkStats {
            descriptions: counters.descriptions.load(Ordering::Relaxed),
            rejected_descriptions: counters.rejected_descriptions.load(Ordering::Relaxed),
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            frames_converted: counters.frames_converted.load(Ordering::Relaxed),
            frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Handle a description as if the attached client delivered it
    pub fn handle_description(&self, description: &Description) {
        self.core.handle_description(description);
    }

    /// Handle a frame as if the attached client delivered it
    pub fn handle_frame(&self, frame: &Frame) {
        self.core.handle_frame(frame);
    }

    /// Stop accepting events, shut the client down and release the skeleton
    /// and frame data
    pub fn dispose(&self) {
        if self.core.state.is_disposed() {
            return;
        }
        info!("Disposing MotiveLink");
        self.core.state.dispose();
        self.commands.set_client(None);
        let client = self.client_slot().take();
        if let Some(client) = client {
            client.shutdown();
        }
        self.core.publish_skeleton(Arc::new(SkeletonModel::empty()));
        self.core.frames.clear();
    }
}

impl Drop for MotiveLink {
    fn drop(&mut self) {
        self.dispose();
    }
}
