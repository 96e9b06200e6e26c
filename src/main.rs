//! Greenroom: chroma-key video billboard compositor CLI.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use greenroom::config::{parse_hex_color, Config, ConfigWatcher};
use greenroom::frame::{PixelFormat, VideoFrame};
use greenroom::keying::{KeyingParams, ShaderSet};
use greenroom::render::{Compositor, GpuContext, StageWindow};
use greenroom::video::test_pattern::TestPatternSource;
use greenroom::video::{FrameSource, VideoPlayer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

/// Size of the built-in test pattern when no video is given.
const TEST_PATTERN_SIZE: (u32, u32) = (640, 360);

/// Chroma-key video billboard compositor.
#[derive(Parser, Debug)]
#[command(name = "greenroom")]
#[command(about = "Composite green-screen video onto a billboard stage")]
struct Args {
    /// Video file or direct http(s) URL (omit for the built-in test pattern)
    #[arg(short, long)]
    video: Option<String>,

    /// Backdrop image drawn on the plane behind the keyed screen
    #[arg(short, long)]
    backdrop: Option<PathBuf>,

    /// Chroma distance below which pixels are fully transparent
    #[arg(long, default_value = "0.24")]
    threshold_sensitivity: f32,

    /// Width of the transparency ramp above the threshold
    #[arg(long, default_value = "0.2")]
    smoothing: f32,

    /// Explicit key color as #RRGGBB (omit to sample the frame corner)
    #[arg(long)]
    key_color: Option<String>,

    /// YAML config file, watched for changes while running
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Window height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Restart the video from the beginning at end of stream
    #[arg(long)]
    loop_playback: bool,

    /// Render a single composite to this PNG and exit (headless)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Playback time of the snapshot in seconds; playback runs in real time
    #[arg(long, default_value = "0.0")]
    at: f32,
}

impl Args {
    /// Keying parameters from the command line alone.
    fn keying_params(&self) -> Result<KeyingParams> {
        let key_override = match &self.key_color {
            Some(hex) => Some(parse_hex_color(hex)?),
            None => None,
        };
        Ok(KeyingParams {
            threshold_sensitivity: self.threshold_sensitivity,
            smoothing: self.smoothing,
            key_override,
        })
    }
}

/// Loads a backdrop image. RGB stills stay RGB; the texture upload expands
/// them.
fn load_backdrop(path: &Path) -> Result<VideoFrame> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load backdrop image {:?}", path))?;
    let frame = match image {
        image::DynamicImage::ImageRgb8(rgb) => {
            let (width, height) = rgb.dimensions();
            VideoFrame::from_data(width, height, PixelFormat::Rgb, rgb.into_raw())
        }
        other => {
            let rgba = other.to_rgba8();
            let (width, height) = rgba.dimensions();
            VideoFrame::from_data(width, height, PixelFormat::Rgba, rgba.into_raw())
        }
    };
    Ok(frame)
}

/// Opens the requested video, or falls back to the built-in test pattern.
fn create_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    match &args.video {
        Some(input) => {
            let player = VideoPlayer::new(input, args.loop_playback)?;
            info!(
                "Opened {} ({}x{}, {:.1}s)",
                input, player.width, player.height, player.duration
            );
            Ok(Box::new(player))
        }
        None => {
            info!("No video given, using the built-in test pattern");
            let (width, height) = TEST_PATTERN_SIZE;
            Ok(Box::new(TestPatternSource::new(width, height)))
        }
    }
}

/// Event-loop state for the windowed compositor.
struct GreenroomApp {
    args: Args,
    window: Option<Arc<Window>>,
    renderer: Option<StageWindow>,
    source: Option<Box<dyn FrameSource>>,
    config_watcher: Option<ConfigWatcher>,
    start_time: Instant,
    last_timestamp: Option<u64>,
    frame_count: u32,
    fps_last_time: Instant,
}

impl GreenroomApp {
    fn new(args: Args) -> Self {
        Self {
            args,
            window: None,
            renderer: None,
            source: None,
            config_watcher: None,
            start_time: Instant::now(),
            last_timestamp: None,
            frame_count: 0,
            fps_last_time: Instant::now(),
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let backdrop = match &self.args.backdrop {
            Some(path) => {
                let frame = load_backdrop(path)?;
                info!(
                    "Loaded backdrop {:?} ({}x{})",
                    path, frame.width, frame.height
                );
                Some(frame)
            }
            None => None,
        };

        self.config_watcher = ConfigWatcher::new(self.args.config.clone());

        // The config file, when present, is the live source of truth for
        // keying parameters; command-line values seed everything else.
        let mut params = self.args.keying_params()?;
        if let Some(config) = self.config_watcher.as_ref().and_then(|w| w.current()) {
            params = config.keying_params()?;
            info!("Applying keying parameters from the config file");
        }

        self.renderer = Some(StageWindow::new(window, backdrop.as_ref(), params)?);
        info!("Renderer initialized");

        self.source = Some(create_source(&self.args)?);
        self.start_time = Instant::now();

        Ok(())
    }

    fn process_frame(&mut self) {
        let Some(source) = &mut self.source else {
            return;
        };
        let Some(renderer) = &mut self.renderer else {
            return;
        };

        self.frame_count += 1;
        let elapsed = self.fps_last_time.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            debug!("[Perf] Rendering at {:.2} FPS", fps);
            self.frame_count = 0;
            self.fps_last_time = Instant::now();
        }

        if let Some(watcher) = &mut self.config_watcher {
            if let Some((_, new_config)) = watcher.check_for_changes() {
                match new_config.keying_params() {
                    Ok(params) => {
                        info!(
                            "Reloaded keying parameters: threshold {:.3}, smoothing {:.3}",
                            params.threshold_sensitivity, params.smoothing
                        );
                        renderer.set_keying_params(params);
                    }
                    Err(e) => error!("Ignoring config change: {}", e),
                }
            }
        }

        // Upload each decoded frame's bytes once, tracked by timestamp.
        let time = self.start_time.elapsed().as_secs_f32();
        if let Some(frame) = source.current_frame(time) {
            let timestamp = frame.timestamp_us;
            let changed = match (timestamp, self.last_timestamp) {
                (Some(ts), Some(prev)) => ts != prev,
                _ => true,
            };
            if changed {
                renderer.upload_frame(frame);
                self.last_timestamp = timestamp;
            }
        }

        if let Err(e) = renderer.render() {
            error!("Render error: {}", e);
        }
    }
}

impl ApplicationHandler for GreenroomApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("Greenroom - Chroma Key Stage")
            .with_inner_size(PhysicalSize::new(self.args.width, self.args.height));

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());

                if let Err(e) = self.initialize(window) {
                    error!("Initialization error: {}", e);
                    event_loop.exit();
                }
            }
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size);
                }
            }
            WindowEvent::MouseInput {
                state: ElementState::Released,
                ..
            } => {
                // Pointer release pauses a playing video; a paused or ended
                // one restarts from the start.
                if let Some(source) = &mut self.source {
                    let time = self.start_time.elapsed().as_secs_f32();
                    source.toggle_playback(time);
                }
            }
            WindowEvent::RedrawRequested => {
                self.process_frame();

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting greenroom...");

    if let Some(output) = args.snapshot.clone() {
        return run_snapshot_mode(args, &output);
    }
    run_window_mode(args)
}

/// Opens the window and hands control to winit.
fn run_window_mode(args: Args) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = GreenroomApp::new(args);
    event_loop.run_app(&mut app)?;

    Ok(())
}

/// Composites a single frame offscreen and writes it as a PNG.
fn run_snapshot_mode(args: Args, output: &Path) -> Result<()> {
    let backdrop = match &args.backdrop {
        Some(path) => Some(load_backdrop(path)?),
        None => None,
    };

    let mut params = args.keying_params()?;
    if let Some(path) = &args.config {
        params = Config::load(path)?.keying_params()?;
        info!("Applying keying parameters from {:?}", path);
    }

    let gpu = GpuContext::headless()?;
    let shaders = ShaderSet::compile(&gpu.device)?;
    let mut compositor = Compositor::new(
        &gpu,
        &shaders,
        wgpu::TextureFormat::Rgba8Unorm,
        backdrop.as_ref(),
        params,
    )?;

    let mut source = create_source(&args)?;

    // Play in real time until the requested timestamp has a frame.
    let start = Instant::now();
    let deadline = Duration::from_secs_f32(args.at + 20.0);
    let mut snapshot_frame: Option<VideoFrame> = None;
    loop {
        let now = start.elapsed().as_secs_f32();
        if let Some(frame) = source.current_frame(now) {
            snapshot_frame = Some(frame.clone());
        }
        if now >= args.at && snapshot_frame.is_some() {
            break;
        }
        if start.elapsed() > deadline {
            return Err(anyhow!("No frame decoded within {:.1}s", args.at + 20.0));
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let frame = snapshot_frame
        .ok_or_else(|| anyhow!("Video source produced no frames before {:.2}s", args.at))?;
    compositor.upload_frame(&frame);
    let composite = compositor.render_to_frame(args.width, args.height)?;

    let image =
        image::RgbaImage::from_raw(composite.width, composite.height, composite.data)
            .ok_or_else(|| anyhow!("Snapshot buffer has the wrong size"))?;
    image
        .save(output)
        .with_context(|| format!("Failed to write snapshot {:?}", output))?;
    info!(
        "Wrote {}x{} snapshot to {:?}",
        args.width, args.height, output
    );

    Ok(())
}
