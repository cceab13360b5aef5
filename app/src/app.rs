//! Windowed application and event loop.

use std::path::Path;
use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::raw_window_handle::HasDisplayHandle;
use winit::window::{Window, WindowId};

use vkngine_core::mesh::generate_cube;
use vkngine_core::texture::{generate_checkerboard, load_image};
use vkngine_core::AssetError;
use vkngine_graphics::vulkan::{DeviceHandle, DeviceRequirements, InstanceHandle, Surface};
use vkngine_graphics::{
    FrameOutcome, GraphicsError, MeshRenderer, PresentationStateMachine, ResizeManager,
    RuntimeConfig, SceneAssets,
};

use crate::args::AppArgs;
use crate::error::AppError;

/// Load the scene from the given paths, falling back to a cube and a
/// checkerboard for whichever is missing.
pub fn scene_assets(mesh: Option<&Path>, texture: Option<&Path>) -> Result<SceneAssets, AssetError> {
    let mesh = match mesh {
        Some(path) => vkngine_core::gltf::load_mesh(path)?,
        None => generate_cube(0.5),
    };
    let texture = match texture {
        Some(path) => load_image(path)?,
        None => generate_checkerboard(256, 32, [235, 235, 235, 255], [40, 40, 48, 255]),
    };
    Ok(SceneAssets { mesh, texture })
}

/// Everything that draws into the window.
struct Graphics {
    renderer: MeshRenderer,
    presentation: PresentationStateMachine,
    resize: ResizeManager,
}

impl Graphics {
    fn new(window: &Window, args: &AppArgs, config: &RuntimeConfig) -> Result<Self, AppError> {
        let size = window.inner_size();
        let config = config.clone().with_window_extent(size.width, size.height);

        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::creation("display handle", e))?;
        let extensions = Surface::required_extensions(display.as_raw())?;
        let instance = InstanceHandle::new(&config, &extensions)?;
        let surface = Surface::new(Arc::clone(&instance), window)?;
        let device = DeviceHandle::new(instance, Some(&*surface), DeviceRequirements::windowed())?;

        let assets = scene_assets(args.mesh.as_deref(), args.texture.as_deref())?;
        let renderer = MeshRenderer::new(device, surface, &assets, &config)?;

        log::info!(
            "Graphics initialized ({}x{} physical, scale_factor={})",
            size.width,
            size.height,
            window.scale_factor()
        );
        Ok(Self {
            renderer,
            presentation: PresentationStateMachine::new(),
            resize: ResizeManager::new((size.width, size.height), config.resize_debounce),
        })
    }
}

/// Windowed textured mesh application.
pub struct App {
    args: AppArgs,
    config: RuntimeConfig,
    // Declared before the window: the surface must go first.
    graphics: Option<Graphics>,
    window: Option<Window>,
    frames_presented: u64,
    error: Option<AppError>,
}

impl App {
    pub fn new(args: AppArgs) -> Self {
        let config = args.runtime_config();
        Self {
            args,
            config,
            graphics: None,
            window: None,
            frames_presented: 0,
            error: None,
        }
    }

    /// Open the window and run until it is closed, `--max-frames` is
    /// reached, or an error stops the loop.
    pub fn run(args: AppArgs) -> Result<(), AppError> {
        let event_loop = EventLoop::new()?;
        let mut app = Self::new(args);
        event_loop.run_app(&mut app)?;
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        log::error!("Stopping: {error}");
        self.error = Some(error);
        event_loop.exit();
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(graphics) = &mut self.graphics else {
            return;
        };
        if graphics.resize.is_minimized() {
            return;
        }
        if let Some(resize) = graphics.resize.update() {
            log::debug!("Rebuild requested for {}x{}", resize.width, resize.height);
            graphics.presentation.request_rebuild();
        }

        match graphics.presentation.draw_frame(&mut graphics.renderer) {
            Ok(FrameOutcome::Rebuilt) => {}
            Ok(_) => self.frames_presented += 1,
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        }

        if let Some(max_frames) = self.args.max_frames {
            if self.frames_presented >= max_frames {
                log::info!("Reached max frames limit ({}), exiting", max_frames);
                event_loop.exit();
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.config.window_extent;
        let attributes = Window::default_attributes()
            .with_title(self.config.application_name.as_str())
            .with_inner_size(winit::dpi::PhysicalSize::new(width, height));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        };
        log::info!("Window created");

        match Graphics::new(&window, &self.args, &self.config) {
            Ok(graphics) => self.graphics = Some(graphics),
            Err(e) => {
                self.window = Some(window);
                self.fail(event_loop, e);
                return;
            }
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(graphics) = &mut self.graphics {
                    graphics.renderer.set_window_extent(size.width, size.height);
                    graphics.resize.on_resize_event(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(graphics) = self.graphics.take() {
            let stats = graphics.presentation.stats();
            log::info!(
                "Presented {} frames ({} rebuilds, {} suboptimal acquires)",
                stats.frames_presented,
                stats.rebuilds,
                stats.suboptimal_acquires
            );
        }
    }
}
