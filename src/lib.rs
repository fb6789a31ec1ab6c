//! GarmentFE engine: layered texture editing for 3D garment models.
//!
//! Layers live in a [`LayerRegistry`], are flattened over the model's base
//! texture by the [`Compositor`], and the result is pushed to the 3D scene
//! through the [`bridge`]. [`Project`] ties the pieces together and records
//! every edit in the [`HistoryManager`].

#![allow(clippy::too_many_arguments)]
#![allow(clippy::large_enum_variant)]

pub mod bridge;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod coords;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use bridge::{NullSink, PushOutcome, RecordingSink, StaticSource, TextureSink, TextureSource};
pub use canvas::{BlendMode, CanvasRect, CanvasSize, TiledImage};
pub use components::history::{CheckpointId, HistoryManager};
pub use components::layers::{Layer, LayerContent, LayerId, LayerKind, LayerRegistry, LayerUpdate, LockFlags};
pub use components::selection::SelectionTracker;
pub use compositor::{BaseTexture, CompositeReport, CompositeStatus, Compositor};
pub use coords::{CanvasPoint, UvPoint};
pub use error::{EngineError, EngineResult};
pub use project::{PointerPhase, Project, ToolEvent, ToolKind};
pub use settings::EngineSettings;
