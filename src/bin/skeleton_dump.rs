use anyhow::Result;
use log::*;
use motive_link::{LinkConfig, MotiveLink, MqttStreamingClient};
use simplelog::{Config, SimpleLogger};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => LinkConfig::from_file(path)?,
        None => LinkConfig::default(),
    };
    SimpleLogger::init(config.log_level_filter(), Config::default())?;

    let link = MotiveLink::new(config.clone());
    link.attach(Arc::new(MqttStreamingClient::new(config)));
    link.start()?;

    while !link.is_ready() {
        info!("Waiting for MotiveLink to be ready...");
        sleep(Duration::from_secs(1));
    }
    println!("{}", link.skeleton_definition().to_json()?);

    let mut last_converted = 0;
    for second in 1..=10 {
        sleep(Duration::from_secs(1));
        let stats = link.stats();
        info!(
            "{}s: {} frames/s, {} received, {} dropped",
            second,
            stats.frames_converted - last_converted,
            stats.frames_received,
            stats.frames_dropped
        );
        last_converted = stats.frames_converted;
    }

    link.dispose();
    Ok(())
}
