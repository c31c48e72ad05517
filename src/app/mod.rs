use crossbeam::channel::{self, select, Receiver};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cli::{Cli, CliError};
use crate::config::{MIN_THREADS, THREADS_LEAVE_FREE};
use crate::engine::particles::ParticleEngine;
use crate::engine::SceneOptions;
use crate::error::{ArchiveError, ControllerError};
use crate::io::save_history;
use crate::renderer::{RenderSync, TracingSink};
use crate::simulation::SimulationController;

pub mod command_loop;

use command_loop::{handle_command, parse_command, CommandError, Flow};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("history archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to start thread: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode status: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn run(cli: Cli) -> Result<(), AppError> {
    cli.validate()?;
    let config = cli.resolve_config()?;

    // Global rayon pool for the particle engine, leaving cores for the
    // simulation and render threads.
    let threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_THREADS)
        .saturating_sub(THREADS_LEAVE_FREE)
        .max(MIN_THREADS);
    if let Err(err) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        warn!(error = %err, "rayon pool already initialised");
    }

    let controller = Arc::new(SimulationController::new(ParticleEngine::new(), &config));
    if let Some(model) = &cli.model {
        // A bad startup model leaves the placeholder up; the user can `load` another.
        if let Err(err) = controller.load(model) {
            error!(error = %err, "could not load startup model");
        }
    }

    let render = RenderSync::spawn(
        Arc::clone(&controller),
        config.render.fps,
        SceneOptions::default(),
        controller.default_camera(),
        TracingSink::default(),
    )?;
    info!(
        slowdown = config.pacing.slowdown,
        fps = config.render.fps,
        "ready; type `status`, `pause`, `scrub N`, `quit`"
    );

    let lines = spawn_stdin_reader()?;
    dispatch_input(&controller, lines, cli.duration);

    let frames = render.stop();
    if let Some(path) = &cli.dump_history {
        match controller.export_history() {
            Some(archive) => save_history(path, &archive)?,
            None => warn!("no model loaded, history not written"),
        }
    }
    let status = controller.status();
    controller.shutdown();
    info!(frames, steps = status.steps, sim_time = ?status.sim_time, "shut down");

    #[cfg(feature = "profiling")]
    crate::PROFILER.lock().log_and_clear();

    Ok(())
}

fn spawn_stdin_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new().name("stdin".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// Dispatch stdin commands until `quit`, end of input, or the optional
/// deadline. With a deadline, end of input just waits for it.
fn dispatch_input(
    controller: &SimulationController<ParticleEngine>,
    lines: Receiver<String>,
    duration: Option<f64>,
) {
    let deadline = match duration {
        Some(secs) => channel::after(Duration::from_secs_f64(secs)),
        None => channel::never(),
    };
    let closed = channel::never::<String>();
    let mut input_open = true;

    loop {
        let input = if input_open { &lines } else { &closed };
        select! {
            recv(input) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(cmd)) => match handle_command(cmd, controller) {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(err) => warn!(error = %err, "command failed"),
                    },
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "bad command"),
                },
                Err(_) if duration.is_some() => input_open = false,
                Err(_) => break,
            },
            recv(deadline) -> _ => {
                info!("duration elapsed");
                break;
            }
        }
    }
}
