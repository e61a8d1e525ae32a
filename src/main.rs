use anyhow::Result;
use kiss3d::nalgebra::Point3;
use kiss3d::window::Window;
use log::*;
use motive_link::transform::translation;
use motive_link::{LinkConfig, MotiveLink, MqttStreamingClient, TransformMatrix};
use simplelog::{Config, SimpleLogger};
use std::sync::Arc;

fn load_config() -> Result<LinkConfig> {
    match std::env::args().nth(1) {
        Some(path) => Ok(LinkConfig::from_file(path)?),
        None => Ok(LinkConfig::default()),
    }
}

/// Floor tile edge in server units
const FLOOR_TILE: f32 = 0.5;
/// Smallest half width of the floor, used before any joint is tracked
const MIN_FLOOR_HALF_WIDTH: f32 = 1.0;

/// Half width of a square floor at y = 0 covering every joint, snapped to
/// whole tiles
fn floor_half_width(joints: &[Point3<f32>]) -> f32 {
    let reach = joints
        .iter()
        .map(|joint| joint.x.abs().max(joint.z.abs()))
        .fold(MIN_FLOOR_HALF_WIDTH, f32::max);
    (reach / FLOOR_TILE).ceil() * FLOOR_TILE
}

fn draw_floor(window: &mut Window, half_width: f32, color: &Point3<f32>) {
    let tiles = (2.0 * half_width / FLOOR_TILE).round() as i32;
    for line in 0..=tiles {
        let offset = line as f32 * FLOOR_TILE - half_width;
        window.draw_line(
            &Point3::new(offset, 0.0, -half_width),
            &Point3::new(offset, 0.0, half_width),
            color,
        );
        window.draw_line(
            &Point3::new(-half_width, 0.0, offset),
            &Point3::new(half_width, 0.0, offset),
            color,
        );
    }
}

/// Undo the link's position scaling, the scene is drawn in server units
fn to_view_point(transform: &TransformMatrix, position_scale: f64) -> Point3<f32> {
    let position = translation(transform);
    let scale = 1.0 / position_scale;
    Point3::new(
        (position.x * scale) as f32,
        (position.y * scale) as f32,
        (position.z * scale) as f32,
    )
}

fn main() -> Result<()> {
    let config = load_config()?;
    SimpleLogger::init(config.log_level_filter(), Config::default())?;

    let link = MotiveLink::new(config.clone());
    let client = Arc::new(MqttStreamingClient::new(config.clone()));
    link.attach(client);
    link.start()?;

    let mut window = Window::new("motive_link skeleton view");
    window.set_background_color(0.5, 0.5, 0.5);
    window.set_point_size(10.0);

    let floor_color = Point3::new(0.3, 0.3, 0.3);
    let joint_color = Point3::new(0.5, 0.0, 0.5);
    let bone_color = Point3::new(1.0, 1.0, 1.0);
    let mut half_width = MIN_FLOOR_HALF_WIDTH;
    while window.render() {
        draw_floor(&mut window, half_width, &floor_color);
        if !link.is_ready() {
            continue;
        }
        let skeleton = link.skeleton();
        let frame = link.local_matrices();
        let parents = skeleton.parent_indices();
        let joints: Vec<Option<Point3<f32>>> = frame
            .world_transforms(&skeleton)
            .iter()
            .map(|transform| {
                transform
                    .as_ref()
                    .map(|transform| to_view_point(transform, config.position_scale))
            })
            .collect();

        for (index, joint) in joints.iter().enumerate() {
            let joint = match joint {
                Some(joint) => joint,
                None => continue,
            };
            window.draw_point(joint, &joint_color);
            if parents[index] >= 0 {
                if let Some(parent) = &joints[parents[index] as usize] {
                    window.draw_line(parent, joint, &bone_color);
                }
            }
        }

        let tracked: Vec<Point3<f32>> = joints.iter().flatten().cloned().collect();
        half_width = half_width.max(floor_half_width(&tracked));
    }

    info!("Viewer closed");
    link.dispose();
    Ok(())
}
