//! Core engine module
//!
//! The winit loop, configuration, scene files and frame timing

pub mod debug;
mod engine;
pub mod scene;
mod time;

pub use debug::{FrameStats, TitleCounter};
pub use engine::{Application, Engine, EngineConfig, EngineContext, EngineError};
pub use scene::{LightRecord, LoadSummary, ModelRecord, SceneDescription, SceneError};
pub use time::Time;
