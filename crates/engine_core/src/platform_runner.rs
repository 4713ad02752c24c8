// crates/engine_core/src/platform_runner.rs

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{Fullscreen, Window, WindowBuilder};

use crate::app::Application;
use crate::config::RendererConfig;
use crate::engine_loop::FrameClock;
use crate::error::PlatformError;
use crate::gpu::soft::{PresentedImage, SoftDevice, SoftDeviceConfig};
use crate::gpu::Device;
use crate::input::{EngineAction, InputPoller, KeyBindings};
use crate::present::{HeadlessSurface, PresentSurface};
use crate::renderer::Renderer;
use crate::shader::BuiltinShaderCompiler;

/// Shows the frames presented by the software device in a window.
///
/// Each new presented image is written into the wgpu surface texture, so
/// the on-screen image is exactly what the renderer's back buffer held.
pub struct WindowPresenter {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    swizzle: bool,
    last_sequence: Option<u64>,
}

impl WindowPresenter {
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self, PlatformError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(PlatformError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    label: Some("window presenter"),
                },
                None,
            )
            .await?;

        let caps = surface.get_capabilities(&adapter);
        if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            return Err(PlatformError::Surface(
                "surface textures cannot be copy destinations".into(),
            ));
        }
        // Back buffers hold UNORM RGBA bytes; pick a matching non-sRGB format.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| {
                matches!(
                    f,
                    wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Bgra8Unorm
                )
            })
            .ok_or_else(|| PlatformError::Surface(format!("no 8-bit UNORM format in {:?}", caps.formats)))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: present_mode(vsync),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(target: "platform", ?format, adapter = %adapter.get_info().name, "window presenter ready");

        Ok(Self {
            surface,
            device,
            queue,
            config,
            swizzle: format == wgpu::TextureFormat::Bgra8Unorm,
            last_sequence: None,
        })
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width > 0 && size.height > 0 {
            self.config.width = size.width;
            self.config.height = size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.config.present_mode = present_mode(vsync);
        self.surface.configure(&self.device, &self.config);
    }

    /// Copies `image` to the window. Stale or mismatched images are skipped.
    pub fn show(&mut self, image: &PresentedImage) -> Result<(), PlatformError> {
        if self.last_sequence == Some(image.sequence) {
            return Ok(());
        }
        if image.width != self.config.width || image.height != self.config.height {
            debug!(
                target: "platform",
                image = ?(image.width, image.height),
                window = ?(self.config.width, self.config.height),
                "presented image does not match the window, skipping"
            );
            return Ok(());
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                warn!(target: "platform", "surface lost/outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!(target: "platform", "surface timeout, skipping this frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(PlatformError::Surface("out of memory".into()));
            }
        };

        let texels = if self.swizzle {
            swizzle_rgba_bgra(&image.rgba)
        } else {
            image.rgba.clone()
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::empty());
        frame.present();
        self.last_sequence = Some(image.sequence);
        Ok(())
    }
}

fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}

fn swizzle_rgba_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut out = rgba.to_vec();
    for px in out.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    out
}

/// Owns the application and runs the winit event loop around a
/// [`Renderer`] on the software device.
pub struct PlatformRunner<A: Application> {
    app: A,
    config: RendererConfig,
    bindings: KeyBindings,
}

impl<A: Application> PlatformRunner<A> {
    pub fn new(app: A, config: RendererConfig) -> Self {
        Self {
            app,
            config,
            bindings: KeyBindings::default(),
        }
    }

    pub fn with_bindings(mut self, bindings: KeyBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn start(self) -> Result<(), PlatformError> {
        let Self {
            mut app,
            config,
            bindings,
        } = self;

        let event_loop = EventLoop::new()?;
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(app.title())
                .with_inner_size(PhysicalSize::new(config.width, config.height))
                .build(&event_loop)?,
        );
        let size = window.inner_size();
        let mut presenter = pollster::block_on(WindowPresenter::new(window.clone(), config.vsync))?;

        let soft = Arc::new(SoftDevice::new(SoftDeviceConfig {
            capture_presented: true,
            rasterize: true,
            ..Default::default()
        })?);
        let device: Arc<dyn Device> = soft.clone();
        let surface = HeadlessSurface::new(
            device.clone(),
            config.back_buffer_count,
            size.width.max(1),
            size.height.max(1),
            config.vsync,
        )?;
        let mut renderer = Renderer::new(device, surface, &BuiltinShaderCompiler, config)?;
        app.setup(&mut renderer)?;
        renderer.finish_setup()?;

        let mut clock = FrameClock::new();
        let mut input = InputPoller::new(bindings);
        let mut outcome: Result<(), PlatformError> = Ok(());

        event_loop.run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => elwt.exit(),

                    WindowEvent::Resized(size) => {
                        if let Err(err) = renderer.resize(size.width, size.height) {
                            warn!(target: "platform", %err, "resize rejected");
                        }
                        presenter.resize(size);
                        app.on_resize(&mut renderer, size.width, size.height);
                    }

                    WindowEvent::RedrawRequested => {
                        let time = clock.tick();
                        let frame = app
                            .update(&mut renderer, time, &mut input)
                            .and_then(|()| renderer.tick(time));
                        if let Err(err) = frame {
                            error!(target: "platform", %err, "frame failed, exiting");
                            outcome = Err(err.into());
                            elwt.exit();
                            return;
                        }
                        if let Some(image) = soft.presented_image() {
                            if let Err(err) = presenter.show(&image) {
                                error!(target: "platform", %err, "window presentation failed, exiting");
                                outcome = Err(err);
                                elwt.exit();
                            }
                        }
                    }

                    other => input.handle_event(&other),
                },

                Event::AboutToWait => {
                    for action in input.drain_actions() {
                        match action {
                            EngineAction::Quit => elwt.exit(),
                            EngineAction::ToggleFullscreen => {
                                let next = match window.fullscreen() {
                                    Some(_) => None,
                                    None => Some(Fullscreen::Borderless(None)),
                                };
                                info!(target: "platform", fullscreen = next.is_some(), "toggling fullscreen");
                                window.set_fullscreen(next);
                            }
                            EngineAction::ToggleVSync => {
                                let vsync = !renderer.surface().vsync();
                                renderer.set_vsync(vsync);
                                presenter.set_vsync(vsync);
                            }
                        }
                    }
                    window.request_redraw();
                }

                _ => {}
            }
        })?;

        drop(renderer);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_swaps_red_and_blue() {
        assert_eq!(swizzle_rgba_bgra(&[1, 2, 3, 4, 5, 6, 7, 8]), vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn vsync_selects_present_mode() {
        assert_eq!(present_mode(true), wgpu::PresentMode::AutoVsync);
        assert_eq!(present_mode(false), wgpu::PresentMode::AutoNoVsync);
    }
}
