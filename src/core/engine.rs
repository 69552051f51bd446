//! Core Engine struct and main loop

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::assets::MediaFolders;
use crate::core::Time;
use crate::core::debug::FrameStats;
use crate::core::scene::{SceneDescription, SceneError};
use crate::input::Input;
use crate::renderer::scene::SceneConfig;
use crate::renderer::{RenderBackend, RenderError, Scene, WgpuBackend};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Frame cap when vsync is off (0 for unlimited)
    pub target_fps: u32,
    pub vsync: bool,
    /// Folders searched, in order, for meshes, textures and shaders
    pub media_folders: Vec<PathBuf>,
    /// Scene file loaded after start-up
    pub scene_file: Option<PathBuf>,
    pub scene: SceneConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: String::from("umbra"),
            width: 1280,
            height: 720,
            target_fps: 0,
            vsync: true,
            media_folders: vec![PathBuf::from("media")],
            scene_file: None,
            scene: SceneConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a RON config file
    pub fn load_ron(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        ron::from_str(&content).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.scene.title = self.title.clone();
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub fn with_media_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.media_folders.push(folder.into());
        self
    }

    #[must_use]
    pub fn with_scene_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.scene_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_scene_config(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }

    fn frame_period(&self) -> Option<Duration> {
        (self.target_fps > 0 && !self.vsync)
            .then(|| Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps)))
    }
}

/// Errors that stop the engine. The message is what the user is shown.
#[derive(Debug)]
pub enum EngineError {
    EventLoop(String),
    Window(String),
    Config(String),
    Render(RenderError),
    Scene(SceneError),
    /// Raised by the application's own setup
    Application(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventLoop(e) => write!(f, "Event loop error: {e}"),
            Self::Window(e) => write!(f, "Failed to create window: {e}"),
            Self::Config(e) => write!(f, "Invalid config: {e}"),
            Self::Render(e) => write!(f, "{e}"),
            Self::Scene(e) => write!(f, "Error loading scene: {e}"),
            Self::Application(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            Self::Scene(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RenderError> for EngineError {
    fn from(e: RenderError) -> Self {
        Self::Render(e)
    }
}

impl From<SceneError> for EngineError {
    fn from(e: SceneError) -> Self {
        Self::Scene(e)
    }
}

/// Application hooks driven by the engine
pub trait Application: 'static {
    /// Called once after the window, backend and scene exist
    fn init(&mut self, ctx: &mut EngineContext) -> Result<(), EngineError>;

    /// Called every frame before the scene renders
    fn update(&mut self, _ctx: &mut EngineContext) {}

    /// Called before the scene is released
    fn shutdown(&mut self, _ctx: &mut EngineContext) {}
}

/// Everything an application can touch during a frame
pub struct EngineContext {
    pub time: Time,
    pub input: Input,
    pub stats: FrameStats,
    pub scene: Scene,
    pub backend: WgpuBackend,
    should_quit: bool,
}

impl EngineContext {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.backend.viewport_size().0
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.backend.viewport_size().1
    }

    /// Request engine shutdown after the current frame
    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Record and present one frame
    fn render(&mut self) -> Result<(), RenderError> {
        self.scene
            .render_scene(self.time.delta_seconds(), &self.input, &mut self.backend)
    }
}

/// Main engine struct
pub struct Engine<A: Application> {
    config: EngineConfig,
    app: A,
    context: Option<EngineContext>,
    window: Option<Arc<Window>>,
    error: Option<EngineError>,
    next_frame: Instant,
}

impl<A: Application> Engine<A> {
    pub fn new(config: EngineConfig, app: A) -> Self {
        Self {
            config,
            app,
            context: None,
            window: None,
            error: None,
            next_frame: Instant::now(),
        }
    }

    /// Run until the window closes or the application quits.
    ///
    /// Returns the error that stopped the engine, if any.
    pub fn run(mut self) -> Result<(), EngineError> {
        env_logger::init();
        log::info!("Starting engine: {}", self.config.title);

        let event_loop = EventLoop::new().map_err(|e| EngineError::EventLoop(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(&mut self)
            .map_err(|e| EngineError::EventLoop(e.to_string()))?;

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<(), EngineError> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| EngineError::Window(e.to_string()))?,
        );

        let mut backend =
            pollster::block_on(WgpuBackend::new(Arc::clone(&window), self.config.vsync))?;

        let mut media = MediaFolders::new();
        for folder in &self.config.media_folders {
            media.add(folder);
        }
        let mut scene = Scene::new(self.config.scene.clone(), media, &mut backend)?;

        if let Some(path) = &self.config.scene_file {
            log::info!("Loading scene file {}", path.display());
            SceneDescription::load(path)?.apply(&mut scene, &mut backend)?;
        }

        let mut context = EngineContext {
            time: Time::new(),
            input: Input::new(),
            stats: FrameStats::new(),
            scene,
            backend,
            should_quit: false,
        };
        self.app.init(&mut context)?;

        self.context = Some(context);
        self.window = Some(window);
        log::info!("Engine initialized successfully");
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: EngineError) {
        log::error!("{error}");
        self.error = Some(error);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        ctx.time.update();
        ctx.stats.record_frame(ctx.time.delta());

        self.app.update(ctx);
        if ctx.should_quit() {
            event_loop.exit();
            return;
        }

        let rendered = ctx.render();
        ctx.input.end_frame();
        if let Err(e) = rendered {
            self.fail(event_loop, e.into());
        }
    }
}

impl<A: Application> ApplicationHandler for Engine<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    ctx.backend.resize(new_size.width, new_size.height);
                }
            }

            WindowEvent::Focused(false) => ctx.input.release_all(),

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key_code) = event.physical_key {
                    if key_code == KeyCode::Escape && event.state == ElementState::Pressed {
                        ctx.quit();
                    }
                    ctx.input.process_keyboard(key_code, event.state);
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                ctx.input
                    .process_mouse_motion(glam::Vec2::new(position.x as f32, position.y as f32));
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let (Some(ctx), DeviceEvent::MouseMotion { delta }) = (self.context.as_mut(), event) {
            ctx.input
                .process_mouse_delta(glam::Vec2::new(delta.0 as f32, delta.1 as f32));
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };
        match self.config.frame_period() {
            None => window.request_redraw(),
            Some(period) => {
                let now = Instant::now();
                if now >= self.next_frame {
                    self.next_frame = now + period;
                    window.request_redraw();
                }
                event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame));
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut ctx) = self.context.take() {
            self.app.shutdown(&mut ctx);
            ctx.scene.release(&mut ctx.backend);
            log::info!("Engine shut down after {} frames", ctx.stats.total_frames());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_ron_round_trip() {
        let config = EngineConfig::default()
            .with_title("demo")
            .with_size(800, 600)
            .with_scene_file("levels/one.json");
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let parsed: EngineConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.scene.title, "demo");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: EngineConfig = ron::from_str("(width: 640, vsync: false)").unwrap();
        assert_eq!(parsed.width, 640);
        assert_eq!(parsed.height, 720);
        assert!(!parsed.vsync);
        assert_eq!(parsed.scene.render_distance, 400.0);
    }

    #[test]
    fn test_frame_period_only_without_vsync() {
        let config = EngineConfig::default().with_target_fps(50);
        assert!(config.frame_period().is_none());
        let config = config.with_vsync(false);
        assert_eq!(config.frame_period(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = EngineConfig::load_ron("does/not/exist.ron").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
