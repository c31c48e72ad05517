// simulation/controller.rs
// Owns the live model/state pair, the history ring and the background
// simulation thread.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::history::{HistoryArchive, HistoryBuffer};
use super::scheduler::{Branch, RealtimeScheduler, Stepper};
use crate::config::{self, SimConfig};
use crate::engine::{Camera, PhysicsEngine, SceneOptions, SceneSnapshot};
use crate::error::ControllerError;
use crate::profile_scope;
use crate::renderer::state::OverlayState;

/// Model and state always come and go together.
struct Loaded<E: PhysicsEngine> {
    model: E::Model,
    state: E::State,
}

struct Inner<E: PhysicsEngine> {
    loaded: Option<Loaded<E>>,
    history: HistoryBuffer,
    scheduler: RealtimeScheduler,
    paused: bool,
    slowdown: f64,
    busy_wait: bool,
    /// Steps executed since the current model (or reset) was installed.
    steps: u64,
}

struct Shared<E: PhysicsEngine> {
    engine: E,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<E>>,
    /// Pause gate: the worker waits here while paused or unloaded.
    resume: Condvar,
    terminate: AtomicBool,
    overlay: Arc<OverlayState>,
    idle_sleep: Duration,
}

impl<E: PhysicsEngine> Shared<E> {
    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

/// Steps the live state and records every step in history.
struct LiveStepper<'a, E: PhysicsEngine> {
    engine: &'a E,
    loaded: &'a mut Loaded<E>,
    history: &'a mut HistoryBuffer,
    steps: &'a mut u64,
}

impl<E: PhysicsEngine> Stepper for LiveStepper<'_, E> {
    fn sim_time(&self) -> f64 {
        self.engine.sim_time(&self.loaded.state)
    }

    fn step(&mut self) {
        let Loaded { model, state } = &mut *self.loaded;
        self.engine.step(model, state);
        self.history.append(self.engine, model, state);
        *self.steps += 1;
    }
}

/// Point-in-time summary of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub loaded: bool,
    pub paused: bool,
    pub sim_time: Option<f64>,
    pub scrub_offset: i64,
    pub history_len: usize,
    pub slowdown: f64,
    pub measured_slowdown: f64,
    pub busy_wait: bool,
    pub steps: u64,
}

pub struct SimulationController<E: PhysicsEngine> {
    shared: Arc<Shared<E>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: PhysicsEngine> SimulationController<E> {
    pub fn new(engine: E, config: &SimConfig) -> Self {
        Self::with_clock(engine, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(engine: E, config: &SimConfig, clock: Arc<dyn Clock>) -> Self {
        let pacing = &config.pacing;
        let overlay = Arc::new(OverlayState::new(pacing.misalign_threshold));
        overlay.set_desired_slowdown(pacing.slowdown);
        overlay.set_busy_wait(pacing.busy_wait);

        let inner = Inner {
            loaded: None,
            history: HistoryBuffer::new(config.history),
            scheduler: RealtimeScheduler::new(pacing.misalign_threshold, config.refresh_budget()),
            paused: false,
            slowdown: pacing.slowdown,
            busy_wait: pacing.busy_wait,
            steps: 0,
        };

        Self {
            shared: Arc::new(Shared {
                engine,
                clock,
                inner: Mutex::new(inner),
                resume: Condvar::new(),
                terminate: AtomicBool::new(false),
                overlay,
                idle_sleep: Duration::from_millis(pacing.idle_sleep_ms),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    pub fn overlay(&self) -> Arc<OverlayState> {
        Arc::clone(&self.shared.overlay)
    }

    /// Load a model file and swap it in. On failure the current model keeps
    /// running and the error is kept for the overlay.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), ControllerError> {
        let path = path.as_ref();
        let overlay = &self.shared.overlay;
        overlay.set_loading(true);
        let result = self.shared.engine.load_model(path);
        overlay.set_loading(false);

        match result {
            Ok(model) => {
                overlay.clear_load_error();
                info!(path = %path.display(), "model loaded");
                self.replace(model)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "model load failed");
                overlay.set_load_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Install `model` with a fresh state and history. Starts the simulation
    /// thread on first use, before the model is swapped in, so a failed spawn
    /// leaves the previous model in place. The pause flag is left as it was.
    pub fn replace(&self, model: E::Model) -> Result<(), ControllerError> {
        self.ensure_worker()?;
        let engine = &self.shared.engine;
        let previous = {
            let mut inner = self.shared.inner.lock();
            let mut state = engine.make_state(&model);
            engine.forward(&model, &mut state);
            inner.history.initialize(engine, &model, &state);
            let previous = inner.loaded.replace(Loaded { model, state });
            inner.scheduler.invalidate();
            inner.steps = 0;
            debug!(
                history = inner.history.size(),
                state_size = inner.history.state_size(),
                "model installed"
            );
            self.shared.resume.notify_all();
            previous
        };
        drop(previous);
        Ok(())
    }

    /// Drop the model and its history. The simulation thread stays parked
    /// until the next `replace`.
    pub fn close(&self) {
        let previous = {
            let mut inner = self.shared.inner.lock();
            inner.history.clear();
            inner.scheduler.invalidate();
            inner.steps = 0;
            inner.loaded.take()
        };
        if previous.is_some() {
            info!("model closed");
        }
    }

    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.shared.inner.lock();
        if inner.paused == paused {
            return;
        }
        inner.paused = paused;
        self.shared.overlay.set_paused(paused);
        if !paused {
            let offset = inner.history.scrub_offset();
            if offset != 0 {
                debug!(offset, "resuming from scrubbed state");
            }
            inner.history.rebase_to_scrub();
            let slowdown = inner.slowdown;
            inner.scheduler.retarget(slowdown);
            self.shared.overlay.set_measured_slowdown(slowdown);
            self.shared.resume.notify_all();
        }
        debug!(paused, "pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.inner.lock().paused
    }

    /// Pause and install the history entry `offset` steps behind the newest
    /// one. Sim time does not advance and nothing is appended. Returns false
    /// when no model is loaded.
    pub fn set_scrub_index(&self, offset: i64) -> bool {
        let engine = &self.shared.engine;
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        let Some(loaded) = inner.loaded.as_mut() else {
            return false;
        };

        inner.paused = true;
        self.shared.overlay.set_paused(true);
        inner.history.set_scrub_offset(offset);
        if !inner
            .history
            .load_scrub_state(engine, &loaded.model, &mut loaded.state, offset)
        {
            return false;
        }
        engine.forward(&loaded.model, &mut loaded.state);
        trace!(offset, "scrubbed");
        true
    }

    pub fn scrub_index(&self) -> i64 {
        self.shared.inner.lock().history.scrub_offset()
    }

    /// Run exactly one step while paused. A scrubbed state becomes the new
    /// head of history first.
    ///
    /// Calling this while running is a logic error: debug builds panic,
    /// release builds return [`ControllerError::NotPaused`].
    pub fn step_forward(&self) -> Result<(), ControllerError> {
        let mut guard = self.shared.inner.lock();
        debug_assert!(guard.paused, "step_forward called while running");
        if !guard.paused {
            return Err(ControllerError::NotPaused);
        }

        let inner = &mut *guard;
        let loaded = inner.loaded.as_mut().ok_or(ControllerError::NoModel)?;
        if inner.history.scrub_offset() != 0 {
            inner.history.rebase_to_scrub();
        }
        let mut stepper = LiveStepper {
            engine: &self.shared.engine,
            loaded,
            history: &mut inner.history,
            steps: &mut inner.steps,
        };
        stepper.step();
        Ok(())
    }

    /// Return the live state to the model's initial state and restart
    /// history from it.
    pub fn reset(&self) -> Result<(), ControllerError> {
        let engine = &self.shared.engine;
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        let loaded = inner.loaded.as_mut().ok_or(ControllerError::NoModel)?;

        engine.reset_state(&loaded.model, &mut loaded.state);
        engine.forward(&loaded.model, &mut loaded.state);
        inner.history.initialize(engine, &loaded.model, &loaded.state);
        inner.scheduler.invalidate();
        inner.steps = 0;
        info!("simulation reset");
        Ok(())
    }

    pub fn set_slowdown(&self, slowdown: f64) -> Result<(), ControllerError> {
        if !(slowdown.is_finite() && slowdown > 0.0) {
            return Err(ControllerError::InvalidSlowdown(slowdown));
        }
        let mut inner = self.shared.inner.lock();
        Self::apply_slowdown(&self.shared, &mut inner, slowdown);
        Ok(())
    }

    /// Move to the next faster speed preset. Returns the slowdown in effect.
    pub fn speed_up(&self) -> f64 {
        let mut inner = self.shared.inner.lock();
        if let Some(slowdown) = config::faster_preset(inner.slowdown) {
            Self::apply_slowdown(&self.shared, &mut inner, slowdown);
        }
        inner.slowdown
    }

    /// Move to the next slower speed preset. Returns the slowdown in effect.
    pub fn slow_down(&self) -> f64 {
        let mut inner = self.shared.inner.lock();
        if let Some(slowdown) = config::slower_preset(inner.slowdown) {
            Self::apply_slowdown(&self.shared, &mut inner, slowdown);
        }
        inner.slowdown
    }

    fn apply_slowdown(shared: &Shared<E>, inner: &mut Inner<E>, slowdown: f64) {
        inner.slowdown = slowdown;
        inner.scheduler.retarget(slowdown);
        shared.overlay.set_desired_slowdown(slowdown);
        shared.overlay.set_measured_slowdown(slowdown);
        info!(slowdown, percent = 100.0 / slowdown, "slowdown changed");
    }

    pub fn slowdown(&self) -> f64 {
        self.shared.inner.lock().slowdown
    }

    pub fn set_busy_wait(&self, on: bool) {
        self.shared.inner.lock().busy_wait = on;
        self.shared.overlay.set_busy_wait(on);
    }

    /// Scene for the render thread. The lock is held only for the engine's
    /// scene call.
    pub fn update_scene(&self, options: &SceneOptions, camera: &Camera) -> Option<SceneSnapshot> {
        profile_scope!("update_scene");
        let inner = self.shared.inner.lock();
        let loaded = inner.loaded.as_ref()?;
        Some(
            self.shared
                .engine
                .update_scene(&loaded.model, &loaded.state, options, camera),
        )
    }

    pub fn default_camera(&self) -> Camera {
        let inner = self.shared.inner.lock();
        match inner.loaded.as_ref() {
            Some(loaded) => self.shared.engine.default_camera(&loaded.model),
            None => Camera::default(),
        }
    }

    pub fn is_model_data_null(&self) -> bool {
        self.shared.inner.lock().loaded.is_none()
    }

    pub fn history_buffer_size(&self) -> usize {
        self.shared.inner.lock().history.size()
    }

    pub fn sim_time(&self) -> Option<f64> {
        let inner = self.shared.inner.lock();
        inner
            .loaded
            .as_ref()
            .map(|loaded| self.shared.engine.sim_time(&loaded.state))
    }

    /// Copy of the history entry `offset` steps behind the newest one.
    pub fn history_entry(&self, offset: i64) -> Option<Vec<f64>> {
        self.shared.inner.lock().history.entry(offset).map(<[f64]>::to_vec)
    }

    pub fn status(&self) -> ControllerStatus {
        let inner = self.shared.inner.lock();
        ControllerStatus {
            loaded: inner.loaded.is_some(),
            paused: inner.paused,
            sim_time: inner
                .loaded
                .as_ref()
                .map(|loaded| self.shared.engine.sim_time(&loaded.state)),
            scrub_offset: inner.history.scrub_offset(),
            history_len: inner.history.size(),
            slowdown: inner.slowdown,
            measured_slowdown: inner.scheduler.measured_slowdown(),
            busy_wait: inner.busy_wait,
            steps: inner.steps,
        }
    }

    pub fn export_history(&self) -> Option<HistoryArchive> {
        self.shared.inner.lock().history.to_archive()
    }

    /// Replace history with an archive recorded for the same model, pause,
    /// and install its newest entry.
    pub fn import_history(&self, archive: HistoryArchive) -> Result<(), ControllerError> {
        let engine = &self.shared.engine;
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        let loaded = inner.loaded.as_mut().ok_or(ControllerError::NoModel)?;

        let expected = engine.integration_state_size(&loaded.model);
        if archive.state_size != expected {
            return Err(ControllerError::HistoryMismatch {
                expected,
                found: archive.state_size,
            });
        }
        inner
            .history
            .restore(archive)
            .map_err(ControllerError::CorruptArchive)?;

        inner.paused = true;
        self.shared.overlay.set_paused(true);
        inner
            .history
            .load_scrub_state(engine, &loaded.model, &mut loaded.state, 0);
        engine.forward(&loaded.model, &mut loaded.state);
        inner.scheduler.invalidate();
        info!(entries = inner.history.size(), "history imported");
        Ok(())
    }

    /// Ask the simulation thread to exit. Wakes it if it is parked.
    /// Idempotent.
    pub fn terminate(&self) {
        if self.shared.terminate.swap(true, Ordering::AcqRel) {
            return;
        }
        // Taking the lock orders this with the worker's check-then-wait.
        let _inner = self.shared.inner.lock();
        self.shared.resume.notify_all();
        debug!("termination requested");
    }

    /// Wait for the simulation thread to exit. Blocks forever unless
    /// `terminate` was called.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("simulation thread panicked");
            }
        }
    }

    pub fn shutdown(&self) {
        self.terminate();
        self.join();
    }

    pub fn has_worker(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn ensure_worker(&self) -> Result<(), ControllerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.terminated() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("simulation".into())
            .spawn(move || run_worker(shared))
            .map_err(ControllerError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }
}

impl<E: PhysicsEngine> Drop for SimulationController<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<E: PhysicsEngine>(shared: Arc<Shared<E>>) {
    info!("simulation thread started");
    loop {
        let busy_wait = {
            let mut guard = shared.inner.lock();
            while !shared.terminated() && (guard.paused || guard.loaded.is_none()) {
                shared.resume.wait(&mut guard);
            }
            if shared.terminated() {
                break;
            }

            profile_scope!("scheduler_iteration");
            let inner = &mut *guard;
            let Some(loaded) = inner.loaded.as_mut() else {
                continue;
            };
            let mut stepper = LiveStepper {
                engine: &shared.engine,
                loaded,
                history: &mut inner.history,
                steps: &mut inner.steps,
            };
            let report = inner
                .scheduler
                .iterate(shared.clock.as_ref(), inner.slowdown, &mut stepper);
            if report.branch == Branch::Resync {
                trace!("scheduler resynced");
            }
            shared
                .overlay
                .set_measured_slowdown(inner.scheduler.measured_slowdown());
            inner.busy_wait
        };

        if busy_wait {
            thread::yield_now();
        } else {
            thread::sleep(shared.idle_sleep);
        }
    }
    info!("simulation thread exiting");
}
