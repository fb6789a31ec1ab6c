//! Project files (`.gfe`) and flat PNG export.
//!
//! A project file is a bincode-encoded [`ProjectFile`]. Raster surfaces are
//! stored sparsely: only populated 64×64 chunks are written, each as its own
//! PNG. The base texture and placed images are stored as whole PNGs.
//!
//! Loading validates everything before a single layer is built, so a
//! broken file never yields a half-restored project.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, ImageError, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::TextureSink;
use crate::canvas::{BlendMode, CanvasSize, TiledImage, CHUNK_SIZE};
use crate::components::layers::{Layer, LayerContent, LayerId, LayerKind, LayerRegistry, LockFlags};
use crate::compositor::BaseTexture;
use crate::coords::CanvasPoint;
use crate::error::EngineError;
use crate::ops::brush::StrokeData;
use crate::ops::placed_image::PlacedImage;
use crate::ops::puff::{PuffContent, PuffParams};
use crate::ops::shapes::ShapeContent;
use crate::ops::text::{TextContent, TextFont};
use crate::project::Project;
use crate::settings::EngineSettings;

const GFE_MAGIC_V1: &str = "GFE1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
pub const MAX_CANVAS_DIM: u32 = 16_384;
/// Maximum number of layers in a project file.
pub const MAX_LAYERS: usize = 512;

#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Image error: {0}")]
    Image(#[from] ImageError),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Project rejected: {0}")]
    Engine(#[from] EngineError),
}

impl From<Box<bincode::ErrorKind>> for ProjectFileError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        ProjectFileError::Serialize(e.to_string())
    }
}

// ============================================================================
// ON-DISK MODEL
// ============================================================================

/// One populated chunk of a raster surface.
#[derive(Serialize, Deserialize)]
pub struct ChunkData {
    pub cx: u32,
    pub cy: u32,
    pub png: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
pub enum ContentData {
    Paint {
        chunks: Vec<ChunkData>,
        stroke: Option<StrokeData>,
    },
    Text {
        text: String,
        position: CanvasPoint,
        font_size: f32,
        color: [u8; 4],
        font: Option<Vec<u8>>,
    },
    Shape(ShapeContent),
    Image {
        png: Vec<u8>,
        position: CanvasPoint,
        display_size: (f32, f32),
    },
    Puff {
        params: PuffParams,
        mask: Option<Vec<ChunkData>>,
    },
    Group {
        children: Vec<u128>,
    },
}

#[derive(Serialize, Deserialize)]
pub struct LayerData {
    pub id: u128,
    pub parent: Option<u128>,
    pub kind: u8,
    pub name: String,
    pub order: i64,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: u8,
    pub locked: u8,
    pub content: ContentData,
}

/// Version 1 project file. Layers are listed top-down, groups before
/// their children.
#[derive(Serialize, Deserialize)]
pub struct ProjectFile {
    pub magic: String,
    pub width: u32,
    pub height: u32,
    pub active_layer: Option<u128>,
    pub layers: Vec<LayerData>,
    pub base_texture_png: Option<Vec<u8>>,
}

// ============================================================================
// SAVE
// ============================================================================

/// Save `project` as a `.gfe` file.
pub fn save_project<S: TextureSink>(project: &Project<S>, path: &Path) -> Result<(), ProjectFileError> {
    let file = build_project_file(project)?;
    write_project_file(&file, path)?;
    tracing::info!("saved project '{}' ({} layers) to {}", project.name, file.layers.len(), path.display());
    Ok(())
}

/// Snapshot the project into its on-disk model.
pub fn build_project_file<S: TextureSink>(project: &Project<S>) -> Result<ProjectFile, ProjectFileError> {
    let registry = project.registry();
    let size = registry.size();
    let mut layers = Vec::with_capacity(registry.layer_count());
    for id in registry.walk_top_down() {
        let Some(layer) = registry.get(id) else { continue };
        layers.push(LayerData {
            id: id.as_u128(),
            parent: layer.parent().map(|p| p.as_u128()),
            kind: layer.kind().to_u8(),
            name: layer.name.clone(),
            order: layer.order,
            visible: layer.visible,
            opacity: layer.opacity(),
            blend_mode: layer.blend_mode.to_u8(),
            locked: layer.locked.to_bits(),
            content: encode_content(&layer.content)?,
        });
    }
    let base_texture_png = match project.base_texture().image() {
        Some(img) => Some(encode_png(img)?),
        None => None,
    };
    Ok(ProjectFile {
        magic: GFE_MAGIC_V1.to_string(),
        width: size.width,
        height: size.height,
        active_layer: registry.active_layer().map(|id| id.as_u128()),
        layers,
        base_texture_png,
    })
}

/// Write a prepared project file to disk.
pub fn write_project_file(project: &ProjectFile, path: &Path) -> Result<(), ProjectFileError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, project)?;
    Ok(())
}

fn encode_content(content: &LayerContent) -> Result<ContentData, ProjectFileError> {
    Ok(match content {
        LayerContent::Paint { surface, stroke } => ContentData::Paint {
            chunks: encode_chunks(surface)?,
            stroke: stroke.clone(),
        },
        LayerContent::Text(t) => ContentData::Text {
            text: t.text.clone(),
            position: t.position,
            font_size: t.font_size,
            color: t.color,
            font: t.font.as_ref().map(|f| f.bytes().to_vec()),
        },
        LayerContent::Shape(s) => ContentData::Shape(s.clone()),
        LayerContent::Image(img) => ContentData::Image {
            png: encode_png(&img.image)?,
            position: img.position,
            display_size: img.display_size,
        },
        LayerContent::Puff(p) => ContentData::Puff {
            params: p.params(),
            mask: p.mask.as_ref().map(encode_chunks).transpose()?,
        },
        LayerContent::Group(children) => ContentData::Group {
            children: children.iter().map(|c| c.as_u128()).collect(),
        },
    })
}

fn encode_chunks(surface: &TiledImage) -> Result<Vec<ChunkData>, ProjectFileError> {
    surface
        .chunk_keys()
        .filter_map(|(cx, cy)| surface.get_chunk(cx, cy).map(|c| (cx, cy, c)))
        .map(|(cx, cy, chunk)| Ok::<_, ProjectFileError>(ChunkData { cx, cy, png: encode_png(chunk)? }))
        .collect()
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ProjectFileError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.clone()).write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

// ============================================================================
// LOAD
// ============================================================================

/// Load a `.gfe` file into a fresh project. The canvas size comes from the
/// file; everything else in `settings` is kept.
pub fn load_project<S: TextureSink>(
    path: &Path,
    mut settings: EngineSettings,
    sink: S,
) -> Result<Project<S>, ProjectFileError> {
    let file = read_project_file(path)?;
    let (registry, base) = restore_project_file(file)?;

    let size = registry.size();
    settings.canvas_width = size.width;
    settings.canvas_height = size.height;
    let mut project = Project::new(settings, sink);
    project.install_loaded(registry, base, Instant::now())?;
    project.path = Some(path.to_path_buf());
    project.name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string());
    tracing::info!("loaded project '{}' ({} layers)", project.name, project.registry().layer_count());
    Ok(project)
}

pub fn read_project_file(path: &Path) -> Result<ProjectFile, ProjectFileError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(ProjectFileError::InvalidFormat("File too small".into()));
    }

    // bincode encodes a String as: 8-byte length prefix + UTF-8 data.
    // The magic is 4 chars, so bytes 8..12 hold it.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != GFE_MAGIC_V1 {
        return Err(ProjectFileError::InvalidFormat(format!("Unknown magic '{magic}'")));
    }
    let file: ProjectFile = bincode::deserialize(&raw)?;
    Ok(file)
}

/// Validate a decoded file and rebuild the registry and base texture.
pub fn restore_project_file(file: ProjectFile) -> Result<(LayerRegistry, BaseTexture), ProjectFileError> {
    if file.width == 0 || file.height == 0 {
        return Err(ProjectFileError::InvalidFormat("Canvas dimensions cannot be zero".into()));
    }
    if file.width > MAX_CANVAS_DIM || file.height > MAX_CANVAS_DIM {
        return Err(ProjectFileError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            file.width, file.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if file.layers.len() > MAX_LAYERS {
        return Err(ProjectFileError::InvalidFormat(format!(
            "Project contains {} layers, which exceeds the maximum of {}",
            file.layers.len(),
            MAX_LAYERS
        )));
    }
    let size = CanvasSize::new(file.width, file.height);
    validate_links(&file.layers)?;

    let mut layers = Vec::with_capacity(file.layers.len());
    for ld in file.layers {
        let kind = LayerKind::from_u8(ld.kind)
            .ok_or_else(|| ProjectFileError::InvalidFormat(format!("Layer '{}' has unknown kind {}", ld.name, ld.kind)))?;
        let content = decode_content(ld.content, size, &ld.name)?;
        if content.kind() != kind {
            return Err(ProjectFileError::InvalidFormat(format!(
                "Layer '{}' is tagged {} but holds {} content",
                ld.name,
                kind.name(),
                content.kind().name()
            )));
        }
        let mut layer = Layer::restored(
            LayerId::from_u128(ld.id),
            ld.name,
            ld.parent.map(LayerId::from_u128),
            ld.order,
            content,
        );
        layer.visible = ld.visible;
        layer.set_opacity(ld.opacity);
        layer.blend_mode = BlendMode::from_u8(ld.blend_mode);
        layer.locked = LockFlags::from_bits(ld.locked);
        layers.push(layer);
    }

    // stored top-down; insert bottom-up so sequence ties break as before
    let mut registry = LayerRegistry::new(size);
    for layer in layers.into_iter().rev() {
        let id = layer.id();
        if !registry.insert_restored(layer) {
            return Err(ProjectFileError::InvalidFormat(format!("Duplicate layer id {id}")));
        }
    }
    if let Some(active) = file.active_layer.map(LayerId::from_u128) {
        if !registry.set_active_layer(active) {
            tracing::warn!("project file names a missing active layer {active}, ignoring");
        }
    }

    let base = match file.base_texture_png {
        Some(png) => {
            let img = decode_png(&png)?;
            if img.dimensions() != (size.width, size.height) {
                return Err(ProjectFileError::InvalidFormat(format!(
                    "Base texture is {}x{}, canvas is {}x{}",
                    img.width(),
                    img.height(),
                    size.width,
                    size.height
                )));
            }
            BaseTexture::Valid(Arc::new(img))
        }
        None => BaseTexture::Unset,
    };
    Ok((registry, base))
}

/// Parent links and group child lists must agree and form a forest.
fn validate_links(layers: &[LayerData]) -> Result<(), ProjectFileError> {
    let by_id: HashMap<u128, &LayerData> = layers.iter().map(|l| (l.id, l)).collect();
    if by_id.len() != layers.len() {
        return Err(ProjectFileError::InvalidFormat("Duplicate layer ids".into()));
    }
    let group_children = |id: u128| match by_id.get(&id).map(|l| &l.content) {
        Some(ContentData::Group { children }) => Some(children),
        _ => None,
    };

    for ld in layers {
        if let Some(parent) = ld.parent {
            let Some(children) = group_children(parent) else {
                return Err(ProjectFileError::InvalidFormat(format!(
                    "Layer '{}' names a parent that is not a group",
                    ld.name
                )));
            };
            if !children.contains(&ld.id) {
                return Err(ProjectFileError::InvalidFormat(format!(
                    "Layer '{}' is missing from its group's child list",
                    ld.name
                )));
            }
        }
        if let ContentData::Group { children } = &ld.content {
            for child in children {
                if by_id.get(child).and_then(|c| c.parent) != Some(ld.id) {
                    return Err(ProjectFileError::InvalidFormat(format!(
                        "Group '{}' lists a child that does not belong to it",
                        ld.name
                    )));
                }
            }
        }

        // walk up; a chain longer than the layer count is a cycle
        let mut seen = HashSet::new();
        let mut cursor = ld.parent;
        while let Some(p) = cursor {
            if !seen.insert(p) || seen.len() > layers.len() {
                return Err(ProjectFileError::InvalidFormat(format!("Group cycle above layer '{}'", ld.name)));
            }
            cursor = by_id.get(&p).and_then(|l| l.parent);
        }
    }
    Ok(())
}

fn decode_content(data: ContentData, size: CanvasSize, name: &str) -> Result<LayerContent, ProjectFileError> {
    Ok(match data {
        ContentData::Paint { chunks, stroke } => LayerContent::Paint {
            surface: decode_chunks(chunks, size, name)?,
            stroke,
        },
        ContentData::Text { text, position, font_size, color, font } => {
            let font = match font {
                Some(bytes) => Some(TextFont::from_bytes(bytes).map_err(|e| {
                    ProjectFileError::InvalidFormat(format!("Text layer '{name}' embeds an unreadable font: {e}"))
                })?),
                None => None,
            };
            LayerContent::Text(TextContent { text, position, font_size, color, font })
        }
        ContentData::Shape(shape) => LayerContent::Shape(shape),
        ContentData::Image { png, position, display_size } => LayerContent::Image(PlacedImage {
            image: Arc::new(decode_png(&png)?),
            position,
            display_size,
        }),
        ContentData::Puff { params, mask } => {
            let mask = mask.map(|chunks| decode_chunks(chunks, size, name)).transpose()?;
            LayerContent::Puff(PuffContent::from_params(params, mask))
        }
        ContentData::Group { children } => LayerContent::Group(children.into_iter().map(LayerId::from_u128).collect()),
    })
}

fn decode_chunks(chunks: Vec<ChunkData>, size: CanvasSize, name: &str) -> Result<TiledImage, ProjectFileError> {
    let mut tiled = TiledImage::with_size(size);
    let chunks_x = size.width.div_ceil(CHUNK_SIZE);
    let chunks_y = size.height.div_ceil(CHUNK_SIZE);
    for cd in chunks {
        if cd.cx >= chunks_x || cd.cy >= chunks_y {
            return Err(ProjectFileError::InvalidFormat(format!(
                "Chunk ({},{}) in layer '{}' lies outside the canvas",
                cd.cx, cd.cy, name
            )));
        }
        let chunk = decode_png(&cd.png)?;
        if chunk.dimensions() != (CHUNK_SIZE, CHUNK_SIZE) {
            return Err(ProjectFileError::InvalidFormat(format!(
                "Chunk ({},{}) in layer '{}' is {}x{}, expected {}x{}",
                cd.cx,
                cd.cy,
                name,
                chunk.width(),
                chunk.height(),
                CHUNK_SIZE,
                CHUNK_SIZE
            )));
        }
        tiled.blit_rgba_at(
            (cd.cx * CHUNK_SIZE) as i32,
            (cd.cy * CHUNK_SIZE) as i32,
            CHUNK_SIZE,
            CHUNK_SIZE,
            chunk.as_raw(),
        );
    }
    Ok(tiled)
}

fn decode_png(bytes: &[u8]) -> Result<RgbaImage, ProjectFileError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

// ============================================================================
// EXPORT
// ============================================================================

/// Write the composed surface (without selection overlay) as a PNG.
pub fn export_png<S: TextureSink>(project: &Project<S>, path: &Path) -> Result<(), ProjectFileError> {
    let Some(composed) = project.composed() else {
        return Err(ProjectFileError::InvalidFormat("Nothing has been composed yet".into()));
    };
    composed.save_with_format(path, image::ImageFormat::Png)?;
    tracing::info!("exported {}x{} PNG to {}", composed.width(), composed.height(), path.display());
    Ok(())
}

/// Load a picture from disk as RGBA, e.g. for a placed image or base texture.
pub fn load_image(path: &Path) -> Result<RgbaImage, ProjectFileError> {
    Ok(image::open(path)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NullSink;
    use image::Rgba;

    fn small_settings() -> EngineSettings {
        EngineSettings { canvas_width: 100, canvas_height: 80, ..Default::default() }
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gfe");
        let file = ProjectFile {
            magic: "PFE1".into(),
            width: 10,
            height: 10,
            active_layer: None,
            layers: Vec::new(),
            base_texture_png: None,
        };
        write_project_file(&file, &path).unwrap();
        assert!(matches!(read_project_file(&path), Err(ProjectFileError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_oversized_canvas_and_orphaned_children() {
        let oversized = ProjectFile {
            magic: GFE_MAGIC_V1.into(),
            width: MAX_CANVAS_DIM + 1,
            height: 10,
            active_layer: None,
            layers: Vec::new(),
            base_texture_png: None,
        };
        assert!(matches!(restore_project_file(oversized), Err(ProjectFileError::InvalidFormat(_))));

        let orphan = LayerData {
            id: 7,
            parent: Some(99),
            kind: LayerKind::Paint.to_u8(),
            name: "orphan".into(),
            order: 0,
            visible: true,
            opacity: 1.0,
            blend_mode: 0,
            locked: 0,
            content: ContentData::Paint { chunks: Vec::new(), stroke: None },
        };
        let file = ProjectFile {
            magic: GFE_MAGIC_V1.into(),
            width: 10,
            height: 10,
            active_layer: None,
            layers: vec![orphan],
            base_texture_png: None,
        };
        assert!(matches!(restore_project_file(file), Err(ProjectFileError::InvalidFormat(_))));
    }

    #[test]
    fn sparse_surface_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shirt.gfe");
        let now = Instant::now();

        let mut project = Project::new(small_settings(), NullSink);
        let mut surface = TiledImage::new(100, 80);
        surface.put_pixel(70, 70, Rgba([200, 10, 10, 255]));
        let id = project
            .add_content_layer("paint", LayerContent::Paint { surface, stroke: None }, now)
            .unwrap();
        save_project(&project, &path).unwrap();

        let loaded = load_project(&path, EngineSettings::default(), NullSink).unwrap();
        assert_eq!(loaded.canvas_size(), CanvasSize::new(100, 80));
        assert_eq!(loaded.name, "shirt");
        let layer = loaded.registry().get(id).unwrap();
        match &layer.content {
            LayerContent::Paint { surface, .. } => {
                assert_eq!(surface.chunk_count(), 1);
                assert_eq!(surface.get_pixel(70, 70).0, [200, 10, 10, 255]);
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(loaded.composed(), project.composed());
    }

    #[test]
    fn export_writes_the_composed_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");
        let project = Project::new(small_settings(), NullSink);
        export_png(&project, &path).unwrap();
        let img = load_image(&path).unwrap();
        assert_eq!(img.dimensions(), (100, 80));
    }
}
