//! Video playback for the keyed screen.
//! Frames are decoded by an `ffmpeg` subprocess into raw RGBA and paced
//! against the caller's clock.

pub mod test_pattern;

use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

/// A source of RGBA frames driven by an external clock.
///
/// `time` is a monotonically increasing value in seconds (the render loop's
/// clock); sources pace themselves against it and never block.
pub trait FrameSource {
    /// The frame to display at `time`, if any is due yet.
    fn current_frame(&mut self, time: f32) -> Option<&VideoFrame>;

    /// Source dimensions in pixels.
    fn size(&self) -> (u32, u32);

    /// Pauses playback; when paused or ended, restarts from the beginning
    /// and resumes.
    fn toggle_playback(&mut self, time: f32);

    /// True while playback is suspended (paused, or finished and waiting
    /// for a restart).
    fn is_paused(&self) -> bool;
}

/// Returns true for inputs ffmpeg should treat as network streams.
fn is_network_source(input: &str) -> bool {
    matches!(Url::parse(input), Ok(url) if url.scheme() == "http" || url.scheme() == "https")
}

/// A frame tagged with the playback run it belongs to. Frames from before a
/// restart carry an older generation and are discarded by the receiver.
struct DecodedFrame {
    generation: u64,
    frame: VideoFrame,
}

/// Playback-run state shared with the decode thread.
///
/// Bumping `generation` abandons the current run. `ended` is raised by the
/// decode thread when a non-looping run stops producing frames, and cleared
/// when a restart begins the next run. One mutex guards both so a restart
/// and an end-of-stream cannot interleave.
struct RunState {
    generation: u64,
    ended: bool,
}

/// Plays a video by running ffmpeg in a decode thread and pacing its raw
/// RGBA output against the caller's clock.
pub struct VideoPlayer {
    /// Frames arriving from the decode thread
    frame_rx: Receiver<DecodedFrame>,
    /// The frame being displayed
    current_frame: Option<VideoFrame>,
    /// A decoded frame not due yet
    next_frame: Option<VideoFrame>,
    /// Video dimensions
    pub width: u32,
    pub height: u32,
    /// Video duration in seconds (0 when the container does not know)
    pub duration: f32,
    /// Playback start time (set when the first frame is requested)
    start_time: Option<f32>,
    paused: bool,
    /// Signal to stop the decode thread
    stop_signal: Arc<Mutex<bool>>,
    /// Generation and ended flag for the current playback run
    run_state: Arc<Mutex<RunState>>,
    _thread: JoinHandle<()>,
}

impl VideoPlayer {
    /// Opens a video and starts decoding in a background thread.
    ///
    /// `source` is a local path or a direct http(s) URL. With
    /// `loop_playback` the decoder restarts at end of stream; otherwise
    /// playback holds the last frame until restarted.
    pub fn new(source: &str, loop_playback: bool) -> Result<Self> {
        info!("Opening video via ffmpeg CLI: {}", source);

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,duration,r_frame_rate",
                "-of",
                "csv=p=0",
                source,
            ])
            .output()
            .map_err(|e| anyhow!("Failed to run ffprobe: {}", e))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let stdout = String::from_utf8(output.stdout)?;
        let (width, height, duration, fps) = parse_probe_output(&stdout)?;
        info!(
            "Video: {}x{}, {:.1}s, {:.1} fps",
            width, height, duration, fps
        );

        // Bounded channel so decode cannot run away from playback
        let (frame_tx, frame_rx) = mpsc::sync_channel(5);

        let stop_signal = Arc::new(Mutex::new(false));
        let run_state = Arc::new(Mutex::new(RunState {
            generation: 0,
            ended: false,
        }));

        let thread = {
            let source = source.to_string();
            let stop_signal = stop_signal.clone();
            let run_state = run_state.clone();
            thread::spawn(move || {
                Self::decode_loop(
                    source,
                    width,
                    height,
                    fps,
                    loop_playback,
                    frame_tx,
                    stop_signal,
                    run_state,
                );
            })
        };

        Ok(Self {
            frame_rx,
            current_frame: None,
            next_frame: None,
            width,
            height,
            duration,
            start_time: None,
            paused: false,
            stop_signal,
            run_state,
            _thread: thread,
        })
    }

    /// Background decode loop. Spawns ffmpeg, reads raw frames, and re-spawns
    /// it on loop or restart.
    fn decode_loop(
        source: String,
        width: u32,
        height: u32,
        fps: f32,
        loop_playback: bool,
        tx: mpsc::SyncSender<DecodedFrame>,
        stop_signal: Arc<Mutex<bool>>,
        run_state: Arc<Mutex<RunState>>,
    ) {
        let frame_size = (width * height * 4) as usize;
        let frame_duration = if fps > 0.0 { 1.0 / fps } else { 1.0 / 30.0 };

        loop {
            if *stop_signal.lock().unwrap() {
                return;
            }
            let run_generation = run_state.lock().unwrap().generation;

            info!("Starting ffmpeg process");
            let mut args: Vec<&str> = Vec::new();
            if is_network_source(&source) {
                args.extend_from_slice(&[
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                    "-thread_queue_size",
                    "512",
                ]);
            }
            args.extend_from_slice(&[
                "-i",
                &source,
                "-f",
                "image2pipe",
                "-pix_fmt",
                "rgba",
                "-vcodec",
                "rawvideo",
                "-",
            ]);

            let mut child = match Command::new("ffmpeg")
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
            {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to spawn ffmpeg: {}", e);
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };

            // Log ffmpeg's stderr, errors only
            let mut stderr = child.stderr.take().unwrap();
            thread::spawn(move || {
                let mut buf = [0u8; 1024];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let msg = String::from_utf8_lossy(&buf[..n]);
                            for line in msg.lines() {
                                if line.contains("Error")
                                    || line.contains("error")
                                    || line.contains("failed")
                                {
                                    error!("ffmpeg: {}", line);
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }
            });

            let mut stdout = child.stdout.take().unwrap();
            let mut buffer = vec![0u8; frame_size];
            let mut frame_count = 0u64;

            loop {
                if *stop_signal.lock().unwrap() {
                    let _ = child.kill();
                    return;
                }
                if run_state.lock().unwrap().generation != run_generation {
                    // Restart requested; abandon this run.
                    let _ = child.kill();
                    break;
                }

                if let Err(e) = stdout.read_exact(&mut buffer) {
                    if e.kind() != std::io::ErrorKind::UnexpectedEof {
                        warn!("Error reading from ffmpeg: {}", e);
                    }
                    break;
                }

                let timestamp_us = (frame_count as f64 * frame_duration as f64 * 1e6) as u64;
                frame_count += 1;

                let mut frame =
                    VideoFrame::from_data(width, height, PixelFormat::Rgba, buffer.clone());
                frame.timestamp_us = Some(timestamp_us);

                // The bounded channel blocks here when playback lags; the
                // drain in toggle_playback unblocks a pending restart.
                if tx
                    .send(DecodedFrame {
                        generation: run_generation,
                        frame,
                    })
                    .is_err()
                {
                    let _ = child.kill();
                    return;
                }
            }

            let _ = child.wait();

            if run_state.lock().unwrap().generation != run_generation {
                continue;
            }
            if loop_playback {
                info!("Video loop restarting");
                continue;
            }

            // End of stream without looping: raise the ended flag so the next
            // toggle restarts, then hold until restarted or stopped.
            info!("Playback finished");
            {
                let mut run = run_state.lock().unwrap();
                if run.generation == run_generation {
                    run.ended = true;
                }
            }
            loop {
                if *stop_signal.lock().unwrap() {
                    return;
                }
                if run_state.lock().unwrap().generation != run_generation {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    fn timestamp_secs(frame: &VideoFrame) -> f32 {
        frame.timestamp_us.unwrap_or(0) as f32 / 1e6
    }
}

impl FrameSource for VideoPlayer {
    /// Get the frame to display for the given clock time.
    fn current_frame(&mut self, time: f32) -> Option<&VideoFrame> {
        if self.paused {
            return self.current_frame.as_ref();
        }
        let start = *self.start_time.get_or_insert(time);
        let playback_time = time - start;

        // 1. Promote the buffered frame once its timestamp is due
        if let Some(ref frame) = self.next_frame {
            if Self::timestamp_secs(frame) <= playback_time {
                self.current_frame = self.next_frame.take();
            } else {
                return self.current_frame.as_ref();
            }
        }

        // 2. Consume decoded frames until one is in the future; showing the
        //    newest due frame skips ahead when playback lags
        let current_generation = self.run_state.lock().unwrap().generation;
        loop {
            match self.frame_rx.try_recv() {
                Ok(decoded) => {
                    if decoded.generation != current_generation {
                        continue;
                    }
                    if Self::timestamp_secs(&decoded.frame) <= playback_time {
                        self.current_frame = Some(decoded.frame);
                    } else {
                        self.next_frame = Some(decoded.frame);
                        break;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        self.current_frame.as_ref()
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pause, or restart from the top when paused or ended. Restarting bumps
    /// the generation so frames of the abandoned run are discarded wherever
    /// they are in flight.
    fn toggle_playback(&mut self, time: f32) {
        let restart = self.paused || self.run_state.lock().unwrap().ended;
        if restart {
            info!("Restarting playback from the beginning");
            {
                let mut run = self.run_state.lock().unwrap();
                run.generation += 1;
                run.ended = false;
            }
            while self.frame_rx.try_recv().is_ok() {}
            self.current_frame = None;
            self.next_frame = None;
            self.start_time = Some(time);
            self.paused = false;
        } else {
            info!("Pausing playback");
            self.paused = true;
        }
    }

    fn is_paused(&self) -> bool {
        self.paused || self.run_state.lock().unwrap().ended
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        *self.stop_signal.lock().unwrap() = true;
    }
}

/// Parses ffprobe's CSV line: width and height, then duration and frame rate
/// in whichever order the build emits them. The trailing fields are told
/// apart by shape: a fraction is the rate, a bare float is the duration, and
/// "N/A" (streams without a known duration) is skipped.
fn parse_probe_output(stdout: &str) -> Result<(u32, u32, f32, f32)> {
    let parts: Vec<&str> = stdout.trim().split(',').collect();
    if parts.len() < 3 {
        return Err(anyhow!("Invalid ffprobe output: {}", stdout));
    }

    let width: u32 = parts[0].parse()?;
    let height: u32 = parts[1].parse()?;

    let mut duration = 0.0;
    let mut fps = 30.0;
    for part in &parts[2..] {
        if part.eq_ignore_ascii_case("N/A") {
            continue;
        }
        if part.contains('/') {
            fps = parse_fps(part);
        } else if let Ok(d) = part.parse::<f32>() {
            duration = d;
        }
    }

    Ok((width, height, duration, fps))
}

fn parse_fps(s: &str) -> f32 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f32 = num.parse().unwrap_or(0.0);
        let d: f32 = den.parse().unwrap_or(1.0);
        if d == 0.0 {
            0.0
        } else {
            n / d
        }
    } else {
        s.parse().unwrap_or(30.0)
    }
}
