use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use super::AppError;
use crate::engine::PhysicsEngine;
use crate::error::ControllerError;
use crate::io::{load_history, save_history};
use crate::profile_scope;
use crate::simulation::SimulationController;

/// Commands read from stdin, one per line.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Load(PathBuf),
    Close,
    Pause,
    Resume,
    TogglePause,
    StepOnce,
    Reset,
    Scrub(i64),
    Faster,
    Slower,
    SetSlowdown(f64),
    BusyWait(bool),
    Status,
    SaveHistory(PathBuf),
    LoadHistory(PathBuf),
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("`{command}` cannot use `{value}`")]
    InvalidArgument { command: &'static str, value: String },
}

/// What the caller should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<SimCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "load" | "open" => SimCommand::Load(path_arg("load", rest)?),
        "close" => SimCommand::Close,
        "pause" => SimCommand::Pause,
        "resume" | "run" => SimCommand::Resume,
        "toggle" | "space" => SimCommand::TogglePause,
        "step" => SimCommand::StepOnce,
        "reset" => SimCommand::Reset,
        "scrub" => SimCommand::Scrub(number_arg("scrub", rest)?),
        "faster" | "+" => SimCommand::Faster,
        "slower" | "-" => SimCommand::Slower,
        "slowdown" => SimCommand::SetSlowdown(number_arg("slowdown", rest)?),
        "busywait" => SimCommand::BusyWait(match rest {
            "on" | "true" | "1" => true,
            "off" | "false" | "0" => false,
            "" => return Err(CommandError::MissingArgument("busywait")),
            other => {
                return Err(CommandError::InvalidArgument {
                    command: "busywait",
                    value: other.to_string(),
                })
            }
        }),
        "status" => SimCommand::Status,
        "save-history" => SimCommand::SaveHistory(path_arg("save-history", rest)?),
        "load-history" => SimCommand::LoadHistory(path_arg("load-history", rest)?),
        "quit" | "exit" => SimCommand::Quit,
        _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

fn path_arg(command: &'static str, rest: &str) -> Result<PathBuf, CommandError> {
    if rest.is_empty() {
        return Err(CommandError::MissingArgument(command));
    }
    Ok(PathBuf::from(rest))
}

fn number_arg<T: std::str::FromStr>(command: &'static str, rest: &str) -> Result<T, CommandError> {
    if rest.is_empty() {
        return Err(CommandError::MissingArgument(command));
    }
    rest.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        value: rest.to_string(),
    })
}

pub fn handle_command<E: PhysicsEngine>(
    cmd: SimCommand,
    controller: &SimulationController<E>,
) -> Result<Flow, AppError> {
    profile_scope!("command_handling");
    match cmd {
        SimCommand::Load(path) => controller.load(&path)?,
        SimCommand::Close => controller.close(),
        SimCommand::Pause => controller.set_paused(true),
        SimCommand::Resume => controller.set_paused(false),
        SimCommand::TogglePause => controller.set_paused(!controller.is_paused()),
        SimCommand::StepOnce => {
            // Stepping is only defined on a paused simulation.
            controller.set_paused(true);
            controller.step_forward()?;
        }
        SimCommand::Reset => controller.reset()?,
        SimCommand::Scrub(offset) => {
            if !controller.set_scrub_index(offset) {
                return Err(ControllerError::NoModel.into());
            }
        }
        SimCommand::Faster => {
            let slowdown = controller.speed_up();
            info!("speed {:.2}% of real time", 100.0 / slowdown);
        }
        SimCommand::Slower => {
            let slowdown = controller.slow_down();
            info!("speed {:.2}% of real time", 100.0 / slowdown);
        }
        SimCommand::SetSlowdown(slowdown) => controller.set_slowdown(slowdown)?,
        SimCommand::BusyWait(on) => controller.set_busy_wait(on),
        SimCommand::Status => {
            println!("{}", serde_json::to_string(&controller.status())?);
        }
        SimCommand::SaveHistory(path) => {
            let archive = controller.export_history().ok_or(ControllerError::NoModel)?;
            save_history(&path, &archive)?;
            info!(path = %path.display(), "history saved");
        }
        SimCommand::LoadHistory(path) => {
            let archive = load_history(&path)?;
            controller.import_history(archive)?;
        }
        SimCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}
