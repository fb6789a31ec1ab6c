#![allow(dead_code)]

use std::time::{Duration, Instant};

use garmentfe::coords::CanvasPoint;
use garmentfe::ops::shapes::ShapeContent;
use garmentfe::{EngineSettings, LayerContent, LayerId, Project, RecordingSink, TextureSink};
use image::{Rgba, RgbaImage};

pub const BLUE: [u8; 4] = [0, 0, 255, 255];
pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const GREEN: [u8; 4] = [0, 255, 0, 255];

pub fn settings(width: u32, height: u32) -> EngineSettings {
    EngineSettings { canvas_width: width, canvas_height: height, ..Default::default() }
}

pub fn recording_project(width: u32, height: u32) -> Project<RecordingSink> {
    Project::new(settings(width, height), RecordingSink::default())
}

pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// An axis-aligned, hard-edged filled square.
pub fn square(center: (f32, f32), half: f32, color: [u8; 4]) -> LayerContent {
    LayerContent::Shape(ShapeContent {
        center: CanvasPoint::new(center.0, center.1),
        half_width: half,
        half_height: half,
        anti_alias: false,
        primary_color: color,
        ..Default::default()
    })
}

pub fn add_square<S: TextureSink>(
    project: &mut Project<S>,
    name: &str,
    center: (f32, f32),
    half: f32,
    color: [u8; 4],
    now: Instant,
) -> LayerId {
    project.add_content_layer(name, square(center, half, color), now).unwrap()
}

pub fn pixel<S: TextureSink>(project: &Project<S>, x: u32, y: u32) -> [u8; 4] {
    project.composed().expect("composed surface").get_pixel(x, y).0
}

pub fn close(a: [u8; 4], b: [u8; 4], tol: u8) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= tol)
}

/// Times far enough apart that the history debounce never merges them.
pub fn apart(t0: Instant, step: u64) -> Instant {
    t0 + Duration::from_secs(step)
}
