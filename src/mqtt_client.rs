use crate::config::{LinkConfig, Topics};
use crate::data::{Description, Frame};
use crate::error::LinkError;
use crate::streaming::{DescriptionHandler, FrameHandler, StreamingClient};
use anyhow::Result;
use log::*;
use rumqtt::{MqttClient, MqttOptions, Notification, QoS, ReconnectOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::COMMAND_FAILED;

/// Longest the notification thread waits before checking for shutdown
const NOTIFICATION_POLL: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub id: u64,
    pub command: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub id: u64,
    pub result: i32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Whether received data is handed to the handlers yet
#[derive(Default)]
struct DispatchState {
    running: bool,
    stopped: bool,
    /// Latest description received before dispatch started
    pending: Option<Description>,
}

/// State shared with the notification thread
struct Dispatcher {
    topics: Topics,
    state: Mutex<DispatchState>,
    description_handlers: Mutex<Vec<DescriptionHandler>>,
    frame_handlers: Mutex<Vec<FrameHandler>>,
    pending_commands: Mutex<HashMap<u64, mpsc::Sender<i32>>>,
    dropped_payloads: AtomicU64,
}

impl Dispatcher {
    fn new(topics: Topics) -> Self {
        Self {
            topics,
            state: Mutex::new(DispatchState::default()),
            description_handlers: Mutex::new(Vec::new()),
            frame_handlers: Mutex::new(Vec::new()),
            pending_commands: Mutex::new(HashMap::new()),
            dropped_payloads: AtomicU64::new(0),
        }
    }

    fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        if topic == self.topics.command_reply {
            if self.is_stopped() {
                return;
            }
            match serde_json::from_slice::<CommandReply>(payload) {
                Ok(reply) => self.resolve_command(reply),
                Err(error) => self.drop_payload(topic, &error),
            }
        } else if topic == self.topics.description {
            match Description::deserialize(payload) {
                Ok(description) => {
                    // handlers run under the state lock so start() and
                    // shutdown() order against delivery
                    let mut state = lock(&self.state);
                    if state.stopped {
                        return;
                    }
                    if state.running {
                        self.deliver_description(description);
                    } else {
                        debug!("Holding description until dispatch starts");
                        state.pending = Some(description);
                    }
                }
                Err(error) => self.drop_payload(topic, &error),
            }
        } else if topic == self.topics.frame {
            match Frame::deserialize(payload) {
                Ok(frame) => {
                    let state = lock(&self.state);
                    if !state.running {
                        return;
                    }
                    for handler in lock(&self.frame_handlers).iter() {
                        handler(frame.clone());
                    }
                }
                Err(error) => self.drop_payload(topic, &error),
            }
        } else {
            trace!("Ignoring message on {}", topic);
        }
    }

    fn deliver_description(&self, description: Description) {
        for handler in lock(&self.description_handlers).iter() {
            handler(description.clone());
        }
    }

    fn resolve_command(&self, reply: CommandReply) {
        match lock(&self.pending_commands).remove(&reply.id) {
            Some(sender) => {
                // receiver may already have timed out
                let _ = sender.send(reply.result);
            }
            None => debug!("Reply for unknown command {}", reply.id),
        }
    }

    fn drop_payload(&self, topic: &str, error: &serde_json::Error) {
        let dropped = self.dropped_payloads.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("Dropped malformed payload on {} ({} so far): {}", topic, dropped, error);
    }

    /// Start handing data to the handlers, delivering a held description
    /// first. Fails once stopped.
    fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.stopped {
            return false;
        }
        state.running = true;
        if let Some(description) = state.pending.take() {
            self.deliver_description(description);
        }
        true
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        state.stopped = true;
        state.running = false;
        state.pending = None;
    }
}

/// What one wait on the notification channel produced
enum Received {
    Notification(Notification),
    Idle,
    Closed,
}

/// Body of the notification thread. Returns once the dispatcher is stopped
/// or the connection closes the channel.
fn pump_notifications<F>(dispatcher: Arc<Dispatcher>, mut receive: F)
where
    F: FnMut(Duration) -> Received,
{
    while !dispatcher.is_stopped() {
        match receive(NOTIFICATION_POLL) {
            Received::Notification(Notification::Publish(message)) => {
                dispatcher.dispatch(&message.topic_name, &message.payload)
            }
            Received::Notification(_) | Received::Idle => (),
            Received::Closed => break,
        }
    }
    debug!("Notification thread finished");
}

/// [`StreamingClient`] talking to a tracking server bridge over MQTT.
///
/// Descriptions and frames arrive as JSON on their own topics. Commands are
/// published with an id and the bridge answers on the reply topic.
///
/// Handlers run on the notification thread and must not call `shutdown`,
/// which waits for that thread to finish.
pub struct MqttStreamingClient {
    config: LinkConfig,
    dispatcher: Arc<Dispatcher>,
    mqtt_client: Mutex<Option<MqttClient>>,
    notification_thread: Mutex<Option<JoinHandle<()>>>,
    next_command_id: AtomicU64,
}

impl MqttStreamingClient {
    pub fn new(config: LinkConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.topics.clone()));
        Self {
            config,
            dispatcher,
            mqtt_client: Mutex::new(None),
            notification_thread: Mutex::new(None),
            next_command_id: AtomicU64::new(1),
        }
    }

    /// Payloads that failed to parse since the client was created
    pub fn dropped_payloads(&self) -> u64 {
        self.dispatcher.dropped_payloads.load(Ordering::Relaxed)
    }

    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<()> {
        let mut mqtt_client = lock(&self.mqtt_client);
        let mqtt_client = mqtt_client.as_mut().ok_or(LinkError::NotConnected)?;
        mqtt_client
            .publish(topic.to_owned(), qos, false, payload)
            .map_err(|error| LinkError::Transport(format!("{:?}", error)))?;
        Ok(())
    }
}

impl StreamingClient for MqttStreamingClient {
    fn connect(&self) -> Result<()> {
        let mqtt_options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker_host.clone(),
            self.config.broker_port,
        )
        .set_reconnect_opts(ReconnectOptions::Always(5));
        let (mut mqtt_client, notifications) = MqttClient::start(mqtt_options)
            .map_err(|error| LinkError::Transport(format!("{:?}", error)))?;
        info!(
            "Connected to MQTT at {}:{}",
            self.config.broker_host, self.config.broker_port
        );

        let topics = &self.config.topics;
        for topic_name in &[&topics.description, &topics.frame, &topics.command_reply] {
            mqtt_client
                .subscribe(topic_name.to_string(), QoS::AtMostOnce)
                .map_err(|error| LinkError::Transport(format!("{:?}", error)))?;
            trace!("Subscribing to {}", topic_name);
        }
        *lock(&self.mqtt_client) = Some(mqtt_client);

        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = thread::spawn(move || {
            pump_notifications(dispatcher, |timeout| {
                match notifications.recv_timeout(timeout) {
                    Ok(notification) => Received::Notification(notification),
                    Err(error) if error.is_timeout() => Received::Idle,
                    Err(_) => Received::Closed,
                }
            })
        });
        *lock(&self.notification_thread) = Some(handle);
        Ok(())
    }

    fn request_model_definitions(&self) -> Result<()> {
        debug!("Requesting model definitions");
        self.publish(&self.config.topics.model_request, QoS::AtLeastOnce, Vec::new())
    }

    fn run_async(&self) -> Result<()> {
        if !self.dispatcher.start() {
            return Err(LinkError::NotConnected.into());
        }
        Ok(())
    }

    fn run(&self) -> Result<()> {
        self.run_async()?;
        let handle = lock(&self.notification_thread).take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| LinkError::Transport("notification thread panicked".to_owned()))?,
            None => return Err(LinkError::NotConnected.into()),
        }
        Ok(())
    }

    fn shutdown(&self) {
        info!("Shutting down MQTT streaming client");
        self.dispatcher.stop();
        // dropping the senders fails every command still waiting
        lock(&self.dispatcher.pending_commands).clear();

        let mqtt_client = lock(&self.mqtt_client).take();
        if let Some(mut mqtt_client) = mqtt_client {
            if let Err(error) = mqtt_client.shutdown() {
                warn!("Failed to disconnect from MQTT: {:?}", error);
            }
        }

        let handle = lock(&self.notification_thread).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Notification thread panicked");
            }
        }
    }

    fn send_command(&self, command: &str) -> i32 {
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let payload = match serde_json::to_vec(&CommandRequest {
            id,
            command: command.to_owned(),
        }) {
            Ok(payload) => payload,
            Err(error) => {
                error!("Failed to encode command {}: {}", command, error);
                return COMMAND_FAILED;
            }
        };

        let (sender, receiver) = mpsc::channel();
        lock(&self.dispatcher.pending_commands).insert(id, sender);
        if let Err(error) = self.publish(&self.config.topics.command, QoS::AtLeastOnce, payload) {
            warn!("Failed to send command {}: {}", command, error);
            lock(&self.dispatcher.pending_commands).remove(&id);
            return COMMAND_FAILED;
        }

        match receiver.recv_timeout(self.config.command_timeout()) {
            Ok(result) => result,
            Err(error) => {
                warn!("No reply to command {}: {}", command, error);
                lock(&self.dispatcher.pending_commands).remove(&id);
                COMMAND_FAILED
            }
        }
    }

    fn on_description(&self, handler: DescriptionHandler) {
        lock(&self.dispatcher.description_handlers).push(handler);
    }

    fn on_frame(&self, handler: FrameHandler) {
        lock(&self.dispatcher.frame_handlers).push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    const DESCRIPTION: &[u8] = br#"[{"name": "Actor", "bones": [
        {"id": 1, "name": "Hips", "parent_id": -1, "position": [0.0, 1.0, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0]}
    ]}]"#;
    const FRAME: &[u8] = br#"[{"id": 1, "bones": [
        {"id": 1, "position": [0.0, 1.0, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0]}
    ]}]"#;

    fn counting_client() -> (MqttStreamingClient, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let client = MqttStreamingClient::new(LinkConfig::default());
        let descriptions = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&descriptions);
        client.on_description(Box::new(move |_: Description| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&frames);
        client.on_frame(Box::new(move |_: Frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (client, descriptions, frames)
    }

    fn named_description(name: &str) -> Vec<u8> {
        format!(
            r#"[{{"name": "{}", "bones": [
                {{"id": 1, "name": "Hips", "parent_id": -1, "position": [0.0, 1.0, 0.0], "rotation": [0.0, 0.0, 0.0, 1.0]}}
            ]}}]"#,
            name
        )
        .into_bytes()
    }

    #[test]
    fn test_description_held_until_run() {
        let (client, descriptions, frames) = counting_client();
        let topics = Topics::default();
        client.dispatcher.dispatch(&topics.description, DESCRIPTION);
        client.dispatcher.dispatch(&topics.frame, FRAME);
        assert_eq!(descriptions.load(Ordering::SeqCst), 0);
        assert_eq!(frames.load(Ordering::SeqCst), 0);

        client.run_async().unwrap();
        assert_eq!(descriptions.load(Ordering::SeqCst), 1);
        client.dispatcher.dispatch(&topics.frame, FRAME);
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_payload_is_counted() {
        let (client, _, frames) = counting_client();
        client.run_async().unwrap();
        client.dispatcher.dispatch(&Topics::default().frame, b"{\"not\": \"a frame\"}");
        assert_eq!(frames.load(Ordering::SeqCst), 0);
        assert_eq!(client.dropped_payloads(), 1);
    }

    #[test]
    fn test_command_reply_is_routed() {
        let client = MqttStreamingClient::new(LinkConfig::default());
        let (sender, receiver) = mpsc::channel();
        lock(&client.dispatcher.pending_commands).insert(7, sender);
        client
            .dispatcher
            .dispatch(&Topics::default().command_reply, br#"{"id": 7, "result": 0}"#);
        assert_eq!(receiver.recv().unwrap(), 0);
        assert!(lock(&client.dispatcher.pending_commands).is_empty());
    }

    #[test]
    fn test_disconnected_command_fails() {
        let client = MqttStreamingClient::new(LinkConfig::default());
        assert_eq!(client.send_command("LiveMode"), COMMAND_FAILED);
        assert!(lock(&client.dispatcher.pending_commands).is_empty());
        assert!(client.request_model_definitions().is_err());
    }

    #[test]
    fn test_shutdown_stops_dispatch() {
        let (client, descriptions, _) = counting_client();
        client.run_async().unwrap();
        client.shutdown();
        client.dispatcher.dispatch(&Topics::default().description, DESCRIPTION);
        assert_eq!(descriptions.load(Ordering::SeqCst), 0);
        assert!(client.run_async().is_err());
    }

    #[test]
    fn test_description_racing_run_async_is_delivered() {
        for _ in 0..500 {
            let (client, descriptions, _) = counting_client();
            let barrier = Arc::new(Barrier::new(2));
            let receiver = {
                let dispatcher = Arc::clone(&client.dispatcher);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    dispatcher.dispatch(&Topics::default().description, DESCRIPTION);
                })
            };
            barrier.wait();
            client.run_async().unwrap();
            receiver.join().unwrap();
            assert_eq!(descriptions.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_held_description_never_overrides_newer_one() {
        let topics = Topics::default();
        let first = named_description("First");
        let second = named_description("Second");
        for _ in 0..500 {
            let client = MqttStreamingClient::new(LinkConfig::default());
            let names = Arc::new(Mutex::new(Vec::new()));
            let recorded = Arc::clone(&names);
            client.on_description(Box::new(move |description: Description| {
                lock(&recorded).push(description.skeletons[0].name.clone());
            }));
            client.dispatcher.dispatch(&topics.description, &first);

            let barrier = Arc::new(Barrier::new(2));
            let receiver = {
                let dispatcher = Arc::clone(&client.dispatcher);
                let barrier = Arc::clone(&barrier);
                let second = second.clone();
                let topic = topics.description.clone();
                thread::spawn(move || {
                    barrier.wait();
                    dispatcher.dispatch(&topic, &second);
                })
            };
            barrier.wait();
            client.run_async().unwrap();
            receiver.join().unwrap();
            assert_eq!(lock(&names).last().map(String::as_str), Some("Second"));
        }
    }

    #[test]
    fn test_shutdown_joins_notification_thread() {
        let client = MqttStreamingClient::new(LinkConfig::default());
        let waits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&waits);
        let dispatcher = Arc::clone(&client.dispatcher);
        // a connection that never delivers anything
        let handle = thread::spawn(move || {
            pump_notifications(dispatcher, |timeout| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(timeout);
                Received::Idle
            })
        });
        *lock(&client.notification_thread) = Some(handle);

        client.shutdown();
        assert!(lock(&client.notification_thread).is_none());
        let after_shutdown = waits.load(Ordering::SeqCst);
        thread::sleep(NOTIFICATION_POLL * 3);
        assert_eq!(waits.load(Ordering::SeqCst), after_shutdown);
    }

    #[test]
    fn test_closed_channel_ends_notification_loop() {
        let client = MqttStreamingClient::new(LinkConfig::default());
        let mut waits = 0;
        pump_notifications(Arc::clone(&client.dispatcher), |_| {
            waits += 1;
            Received::Closed
        });
        assert_eq!(waits, 1);
    }
}
