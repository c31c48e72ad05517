// Controller lifecycle, pause/scrub and thread liveness tests

use super::*;
use crate::config::SimConfig;
use crate::engine::testing::CounterEngine;
use crate::engine::{Camera, SceneOptions};
use crate::error::ControllerError;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DT: f64 = 0.001;

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn close_to(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|t| (t - expected).abs() < 1e-9)
}

/// Controller on a clock that only moves when the test says so. Once the
/// first resync step has run, the worker sits idle until the clock advances.
fn manual_controller() -> (SimulationController<CounterEngine>, ManualClock) {
    let clock = ManualClock::new(0.0);
    let controller = SimulationController::with_clock(
        CounterEngine::default(),
        &SimConfig::default(),
        Arc::new(clock.clone()),
    );
    (controller, clock)
}

/// Loaded, paused controller that has not taken a single step.
fn paused_controller() -> SimulationController<CounterEngine> {
    let (controller, _clock) = manual_controller();
    controller.set_paused(true);
    controller.load("counter.toml").unwrap();
    controller
}

fn step_n(controller: &SimulationController<CounterEngine>, n: usize) {
    for _ in 0..n {
        controller.step_forward().unwrap();
    }
}

#[cfg(test)]
mod lifecycle {
    use super::*;

    #[test]
    fn fresh_controller_is_unloaded_and_running() {
        let (controller, _clock) = manual_controller();
        assert!(controller.is_model_data_null());
        assert!(!controller.is_paused());
        assert_eq!(controller.history_buffer_size(), 0);
        assert_eq!(controller.scrub_index(), 0);
        assert_eq!(controller.sim_time(), None);
        assert!(!controller.has_worker());
        assert!(controller
            .update_scene(&SceneOptions::default(), &Camera::default())
            .is_none());
    }

    #[test]
    fn replace_starts_worker_and_fills_history() {
        let controller = paused_controller();
        assert!(controller.has_worker());
        assert!(!controller.is_model_data_null());
        assert_eq!(controller.history_buffer_size(), 2000);
        for offset in [0, 1, 1999] {
            assert_eq!(controller.history_entry(offset).unwrap(), vec![0.0; 4]);
        }
    }

    #[test]
    fn running_simulation_advances_in_wall_time() {
        let controller = SimulationController::new(CounterEngine::default(), &SimConfig::default());
        controller.load("live.toml").unwrap();
        assert!(wait_until(|| controller.sim_time().unwrap_or(0.0) > 0.02));
        controller.shutdown();
        assert!(!controller.has_worker());
    }

    #[test]
    fn worker_tracks_the_clock() {
        let (controller, clock) = manual_controller();
        controller.load("tracked.toml").unwrap();
        assert!(wait_until(|| controller.status().steps == 1));

        clock.advance(Duration::from_millis(50));
        assert!(wait_until(|| controller.sim_time().unwrap_or(0.0) >= 0.05 - 1e-9));
        thread::sleep(Duration::from_millis(10));
        let t = controller.sim_time().unwrap();
        assert!(t < 0.05 + 2.0 * DT, "sim time overshot: {t}");
    }

    #[test]
    fn slowdown_halves_simulated_progress() {
        let (controller, clock) = manual_controller();
        controller.set_slowdown(2.0).unwrap();
        controller.load("slow.toml").unwrap();
        assert!(wait_until(|| controller.status().steps == 1));

        clock.advance(Duration::from_millis(100));
        assert!(wait_until(|| controller.sim_time().unwrap_or(0.0) >= 0.05 - 1e-9));
        thread::sleep(Duration::from_millis(10));
        let t = controller.sim_time().unwrap();
        assert!(t < 0.05 + 2.0 * DT, "sim time overshot: {t}");
    }

    #[test]
    fn replace_preserves_the_pause_flag() {
        let controller = paused_controller();
        controller.load("second.toml").unwrap();
        assert!(controller.is_paused());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(controller.sim_time(), Some(0.0));
        assert_eq!(controller.status().steps, 0);
    }

    #[test]
    fn replace_swaps_model_and_history_together() {
        let controller = paused_controller();
        step_n(&controller, 3);

        controller.replace(controller.engine().model("swapped")).unwrap();
        let scene = controller
            .update_scene(&SceneOptions::default(), &Camera::default())
            .unwrap();
        assert_eq!(scene.label, "swapped");
        assert_eq!(controller.sim_time(), Some(0.0));
        assert_eq!(controller.history_entry(0).unwrap(), vec![0.0; 4]);
        assert_eq!(controller.status().steps, 0);
    }

    #[test]
    fn failed_load_leaves_current_model_untouched() {
        let controller = paused_controller();
        step_n(&controller, 2);
        let before = controller.status();
        let entries: Vec<_> = (0..3).map(|o| controller.history_entry(o)).collect();

        let err = controller.load("models/bad.toml").unwrap_err();
        assert!(matches!(err, ControllerError::Load(_)));
        assert_eq!(controller.status(), before);
        let after: Vec<_> = (0..3).map(|o| controller.history_entry(o)).collect();
        assert_eq!(entries, after);

        let overlay = controller.overlay();
        assert!(overlay.load_error().unwrap().contains("bad.toml"));
        assert!(!overlay.is_loading());

        controller.load("good.toml").unwrap();
        assert_eq!(overlay.load_error(), None);
    }

    #[test]
    fn close_parks_the_worker_until_the_next_model() {
        let (controller, _clock) = manual_controller();
        controller.load("first.toml").unwrap();
        assert!(wait_until(|| controller.status().steps == 1));

        controller.close();
        assert!(controller.is_model_data_null());
        assert_eq!(controller.history_buffer_size(), 0);
        assert_eq!(controller.sim_time(), None);
        assert!(controller.has_worker());
        assert!(!controller.set_scrub_index(1));

        controller.load("second.toml").unwrap();
        assert!(wait_until(|| controller.status().steps == 1));
        assert!(close_to(controller.sim_time(), DT));
    }

    #[test]
    fn reset_restarts_from_the_initial_state() {
        let controller = paused_controller();
        step_n(&controller, 3);
        controller.set_scrub_index(1);

        controller.reset().unwrap();
        assert_eq!(controller.sim_time(), Some(0.0));
        assert_eq!(controller.scrub_index(), 0);
        assert_eq!(controller.status().steps, 0);
        assert_eq!(controller.history_entry(0).unwrap(), vec![0.0; 4]);
        assert_eq!(controller.history_entry(1).unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn reset_without_model_fails() {
        let (controller, _clock) = manual_controller();
        assert!(matches!(controller.reset(), Err(ControllerError::NoModel)));
    }
}

#[cfg(test)]
mod pause_and_scrub {
    use super::*;

    #[test]
    fn pausing_twice_is_the_same_as_once() {
        let controller = paused_controller();
        step_n(&controller, 2);
        let once = controller.status();
        controller.set_paused(true);
        controller.set_paused(true);
        assert_eq!(controller.status(), once);
    }

    #[test]
    fn paused_simulation_does_not_advance() {
        let controller = SimulationController::new(CounterEngine::default(), &SimConfig::default());
        controller.load("live.toml").unwrap();
        assert!(wait_until(|| controller.sim_time().unwrap_or(0.0) > 0.005));

        controller.set_paused(true);
        let t = controller.sim_time();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(controller.sim_time(), t);
        assert!(controller.overlay().is_paused());
    }

    #[test]
    fn step_forward_runs_exactly_one_step() {
        let controller = paused_controller();
        controller.step_forward().unwrap();
        assert!(close_to(controller.sim_time(), DT));
        assert_eq!(controller.status().steps, 1);
        assert_eq!(controller.history_entry(0).unwrap(), vec![DT, 1.0, 1.0, 1.0]);
        assert_eq!(controller.history_entry(1).unwrap(), vec![0.0; 4]);
        assert!(controller.is_paused());
    }

    #[test]
    fn step_forward_without_model_fails() {
        let (controller, _clock) = manual_controller();
        controller.set_paused(true);
        assert!(matches!(controller.step_forward(), Err(ControllerError::NoModel)));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "step_forward called while running")]
    fn step_forward_while_running_asserts() {
        let (controller, _clock) = manual_controller();
        let _ = controller.step_forward();
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn step_forward_while_running_is_rejected() {
        let (controller, _clock) = manual_controller();
        assert!(matches!(controller.step_forward(), Err(ControllerError::NotPaused)));
    }

    #[test]
    fn scrub_installs_history_without_advancing() {
        let controller = paused_controller();
        step_n(&controller, 5);

        assert!(controller.set_scrub_index(3));
        assert_eq!(controller.scrub_index(), 3);
        assert!(close_to(controller.sim_time(), 2.0 * DT));
        assert_eq!(controller.status().steps, 5);
        // Newest entry is still the one from the last real step.
        assert!(close_to(controller.history_entry(0).map(|e| e[0]), 5.0 * DT));
    }

    #[test]
    fn scrub_forces_pause() {
        let (controller, _clock) = manual_controller();
        controller.load("running.toml").unwrap();
        assert!(!controller.is_paused());

        assert!(controller.set_scrub_index(0));
        assert!(controller.is_paused());
        assert!(controller.overlay().is_paused());
    }

    #[test]
    fn resume_clears_scrub_and_discards_the_future() {
        let (controller, _clock) = manual_controller();
        controller.set_paused(true);
        controller.load("counter.toml").unwrap();
        step_n(&controller, 5);
        controller.set_scrub_index(2);

        controller.set_paused(false);
        assert_eq!(controller.scrub_index(), 0);
        // The clock is frozen, so the worker takes a single resync step.
        assert!(wait_until(|| controller.status().steps == 6));

        controller.set_paused(true);
        assert!(close_to(controller.history_entry(0).map(|e| e[0]), 4.0 * DT));
        assert!(close_to(controller.history_entry(1).map(|e| e[0]), 3.0 * DT));
        assert!(close_to(controller.history_entry(2).map(|e| e[0]), 2.0 * DT));
    }

    #[test]
    fn step_forward_from_scrub_continues_from_the_scrubbed_state() {
        let controller = paused_controller();
        step_n(&controller, 4);
        controller.set_scrub_index(2);

        controller.step_forward().unwrap();
        assert_eq!(controller.scrub_index(), 0);
        assert!(close_to(controller.sim_time(), 3.0 * DT));
        assert!(close_to(controller.history_entry(1).map(|e| e[0]), 2.0 * DT));
    }

    #[test]
    fn concurrent_callers_keep_history_consistent() {
        let controller = Arc::new(SimulationController::new(
            CounterEngine::default(),
            &SimConfig::default(),
        ));
        controller.load("stress.toml").unwrap();

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    for round in 0..50i64 {
                        match (i + round) % 4 {
                            0 => {
                                controller.set_scrub_index(round % 7);
                            }
                            1 => controller.set_paused(false),
                            2 => {
                                controller.set_paused(true);
                                let _ = controller.status();
                            }
                            _ => {
                                let _ = controller.update_scene(&SceneOptions::default(), &Camera::default());
                            }
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        controller.set_paused(true);
        assert_eq!(controller.history_buffer_size(), 2000);
        let entry = controller.history_entry(0).unwrap();
        // Counters and time advance in lockstep, so every entry is self-consistent.
        assert!(entry[1..].iter().all(|v| (v * DT - entry[0]).abs() < 1e-6));
    }
}

#[cfg(test)]
mod termination {
    use super::*;

    fn shuts_down_within_timeout(controller: SimulationController<CounterEngine>) -> bool {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            controller.shutdown();
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(5)).is_ok()
    }

    #[test]
    fn terminate_wakes_a_paused_worker() {
        let controller = paused_controller();
        assert!(shuts_down_within_timeout(controller));
    }

    #[test]
    fn terminate_wakes_a_worker_parked_without_model() {
        let (controller, _clock) = manual_controller();
        controller.load("short.toml").unwrap();
        controller.close();
        assert!(shuts_down_within_timeout(controller));
    }

    #[test]
    fn terminate_stops_a_running_worker() {
        let controller = SimulationController::new(CounterEngine::default(), &SimConfig::default());
        controller.load("running.toml").unwrap();
        assert!(shuts_down_within_timeout(controller));
    }

    #[test]
    fn terminate_is_idempotent() {
        let controller = paused_controller();
        controller.terminate();
        controller.terminate();
        controller.join();
        controller.join();
        assert!(!controller.has_worker());
    }

    #[test]
    fn no_worker_is_started_after_termination() {
        let (controller, _clock) = manual_controller();
        controller.terminate();
        controller.load("late.toml").unwrap();
        assert!(!controller.has_worker());
        assert!(!controller.is_model_data_null());
    }

    #[test]
    fn drop_joins_the_worker() {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let controller = paused_controller();
            drop(controller);
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}

#[cfg(test)]
mod pacing_and_archive {
    use super::*;

    #[test]
    fn presets_step_through_the_table() {
        let (controller, _clock) = manual_controller();
        assert_eq!(controller.speed_up(), 1.0);
        let slower = controller.slow_down();
        assert!((slower - 1.25).abs() < 1e-12);
        assert!((controller.overlay().desired_slowdown() - 1.25).abs() < 1e-12);
        assert!((controller.speed_up() - 1.0).abs() < 1e-12);

        controller.set_slowdown(1000.0).unwrap();
        assert_eq!(controller.slow_down(), 1000.0);
    }

    #[test]
    fn rejects_invalid_slowdown() {
        let (controller, _clock) = manual_controller();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                controller.set_slowdown(bad),
                Err(ControllerError::InvalidSlowdown(_))
            ));
        }
        assert_eq!(controller.slowdown(), 1.0);
    }

    #[test]
    fn changing_slowdown_clears_the_pacing_warning() {
        let (controller, _clock) = manual_controller();
        controller.overlay().set_measured_slowdown(1.0);
        controller.set_slowdown(2.0).unwrap();
        assert_eq!(controller.overlay().pacing_warning(), None);
        assert_eq!(controller.status().measured_slowdown, 2.0);

        controller.slow_down();
        assert_eq!(controller.overlay().pacing_warning(), None);
    }

    #[test]
    fn resume_resets_the_measured_slowdown() {
        let controller = paused_controller();
        controller.set_slowdown(4.0).unwrap();
        controller.overlay().set_measured_slowdown(9.0);
        controller.set_paused(false);
        assert_eq!(controller.overlay().measured_slowdown(), 4.0);
    }

    #[test]
    fn busy_wait_is_mirrored_to_the_overlay() {
        let (controller, _clock) = manual_controller();
        controller.set_busy_wait(true);
        assert!(controller.status().busy_wait);
        assert!(controller.overlay().busy_wait());
    }

    #[test]
    fn exported_history_can_be_imported_again() {
        let controller = paused_controller();
        step_n(&controller, 4);
        let archive = controller.export_history().unwrap();

        controller.reset().unwrap();
        controller.import_history(archive).unwrap();
        assert!(controller.is_paused());
        assert!(close_to(controller.sim_time(), 4.0 * DT));
        assert!(close_to(controller.history_entry(3).map(|e| e[0]), DT));
    }

    #[test]
    fn import_rejects_mismatched_or_corrupt_archives() {
        let controller = paused_controller();
        let mut archive = controller.export_history().unwrap();

        let (other, _clock) = manual_controller();
        assert!(matches!(
            other.import_history(archive.clone()),
            Err(ControllerError::NoModel)
        ));

        archive.state_size = 7;
        assert!(matches!(
            controller.import_history(archive.clone()),
            Err(ControllerError::HistoryMismatch { expected: 4, found: 7 })
        ));

        archive.state_size = 4;
        archive.entries.pop();
        assert!(matches!(
            controller.import_history(archive),
            Err(ControllerError::CorruptArchive(_))
        ));
        assert_eq!(controller.history_buffer_size(), 2000);
    }

    #[test]
    fn import_rejects_an_archive_whose_size_overflows() {
        let controller = paused_controller();
        let archive = HistoryArchive {
            state_size: 4,
            capacity: 1usize << 62,
            cursor: 0,
            entries: vec![],
        };
        assert!(matches!(
            controller.import_history(archive),
            Err(ControllerError::CorruptArchive(_))
        ));
        assert_eq!(controller.history_buffer_size(), 2000);
        assert!(close_to(controller.sim_time(), 0.0));
    }

    #[test]
    fn export_without_model_is_empty() {
        let (controller, _clock) = manual_controller();
        assert!(controller.export_history().is_none());
    }
}
