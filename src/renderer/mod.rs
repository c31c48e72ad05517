pub mod state;

use crossbeam::channel::{self, select, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{Camera, PhysicsEngine, SceneOptions, SceneSnapshot};
use crate::profile_scope;
use crate::renderer::state::{OverlayState, PacingWarning};
use crate::simulation::SimulationController;

pub const PLACEHOLDER_TEXT: &str = "Drag-and-drop model file here";

/// What the render thread produced for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// No model loaded.
    Placeholder {
        loading: bool,
        load_error: Option<String>,
        message: &'static str,
    },
    Scene {
        scene: SceneSnapshot,
        paused: bool,
        pacing: Option<PacingWarning>,
    },
}

impl Frame {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Frame::Placeholder { .. })
    }
}

/// Destination for composed frames. Runs on the render thread.
pub trait FrameSink: Send + 'static {
    fn present(&mut self, frame: &Frame);
}

/// Build the frame for the current controller state. The simulation lock is
/// held only while the scene is copied; overlay state is read afterwards.
pub fn compose_frame<E: PhysicsEngine>(
    controller: &SimulationController<E>,
    overlay: &OverlayState,
    options: &SceneOptions,
    camera: &Camera,
) -> Frame {
    profile_scope!("compose_frame");
    match controller.update_scene(options, camera) {
        None => Frame::Placeholder {
            loading: overlay.is_loading(),
            load_error: overlay.load_error(),
            message: PLACEHOLDER_TEXT,
        },
        Some(scene) => Frame::Scene {
            scene,
            paused: overlay.is_paused(),
            pacing: overlay.pacing_warning(),
        },
    }
}

/// Fixed-rate render loop on its own thread.
pub struct RenderSync {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl RenderSync {
    pub fn spawn<E, S>(
        controller: Arc<SimulationController<E>>,
        fps: u32,
        options: SceneOptions,
        camera: Camera,
        mut sink: S,
    ) -> std::io::Result<Self>
    where
        E: PhysicsEngine,
        S: FrameSink,
    {
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let overlay = controller.overlay();

        let handle = thread::Builder::new().name("render".into()).spawn(move || {
            let ticker = channel::tick(period);
            let mut frames = 0u64;
            info!(fps, "render thread started");
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let frame = compose_frame(controller.as_ref(), &overlay, &options, &camera);
                        sink.present(&frame);
                        frames += 1;
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            info!(frames, "render thread exiting");
            frames
        })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the loop and return the number of frames presented.
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        let _ = self.stop_tx.send(());
        match handle.join() {
            Ok(frames) => frames,
            Err(_) => {
                error!("render thread panicked");
                0
            }
        }
    }
}

impl Drop for RenderSync {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Presents frames as log lines. Transitions are logged at info level,
/// individual frames at trace.
#[derive(Debug, Default)]
pub struct TracingSink {
    last: Option<FrameKind>,
}

#[derive(Debug, Clone, PartialEq)]
enum FrameKind {
    Placeholder { loading: bool, load_error: Option<String> },
    Running { pacing: bool },
    Paused,
}

impl FrameSink for TracingSink {
    fn present(&mut self, frame: &Frame) {
        let kind = match frame {
            Frame::Placeholder {
                loading, load_error, ..
            } => FrameKind::Placeholder {
                loading: *loading,
                load_error: load_error.clone(),
            },
            Frame::Scene { paused: true, .. } => FrameKind::Paused,
            Frame::Scene { pacing, .. } => FrameKind::Running {
                pacing: pacing.is_some(),
            },
        };

        if self.last.as_ref() != Some(&kind) {
            match frame {
                Frame::Placeholder {
                    loading,
                    load_error,
                    message,
                } => match load_error {
                    Some(err) => warn!(loading, error = %err, "{message}"),
                    None => info!(loading, "{message}"),
                },
                Frame::Scene { scene, paused: true, .. } => {
                    info!(model = %scene.label, time = scene.time, "PAUSE")
                }
                Frame::Scene {
                    scene,
                    pacing: Some(warning),
                    ..
                } => warn!(
                    model = %scene.label,
                    desired = warning.desired,
                    measured = warning.measured,
                    "running at {:.1}% of real time",
                    warning.measured_percent()
                ),
                Frame::Scene { scene, .. } => {
                    debug!(model = %scene.label, bodies = scene.bodies.len(), "rendering")
                }
            }
            self.last = Some(kind);
        }

        if let Frame::Scene { scene, .. } = frame {
            trace!(time = scene.time, bodies = scene.bodies.len(), "frame");
        }
    }
}
