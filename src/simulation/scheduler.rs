// simulation/scheduler.rs
// Drift-correcting realtime pacing: decides how many engine steps each loop
// iteration runs so simulated time tracks scaled wall time.

use super::clock::Clock;

/// Something the scheduler can advance. `step` must record the new state in
/// history itself, exactly once per call.
pub trait Stepper {
    fn sim_time(&self) -> f64;
    fn step(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SyncPoint {
    wall: f64,
    sim: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Reference point was reset and a single step taken.
    Resync,
    /// Zero or more steps taken against the existing reference point.
    CatchUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    pub branch: Branch,
    pub steps: usize,
}

#[derive(Debug, Clone)]
pub struct RealtimeScheduler {
    sync: Option<SyncPoint>,
    measured_slowdown: f64,
    misalign_threshold: f64,
    /// Wall seconds one catch-up burst may spend stepping.
    refresh_budget: f64,
}

impl RealtimeScheduler {
    pub fn new(misalign_threshold: f64, refresh_budget: f64) -> Self {
        Self {
            sync: None,
            measured_slowdown: 1.0,
            misalign_threshold,
            refresh_budget,
        }
    }

    /// Forget the reference point; the next iteration resyncs.
    pub fn invalidate(&mut self) {
        self.sync = None;
    }

    /// Invalidate and assume the new target is met until a catch-up burst
    /// measures otherwise.
    pub fn retarget(&mut self, slowdown: f64) {
        self.sync = None;
        self.measured_slowdown = slowdown;
    }

    pub fn is_synced(&self) -> bool {
        self.sync.is_some()
    }

    /// Observed wall seconds per simulated second at the start of the most
    /// recent catch-up burst.
    pub fn measured_slowdown(&self) -> f64 {
        self.measured_slowdown
    }

    pub fn iterate<S: Stepper + ?Sized>(
        &mut self,
        clock: &dyn Clock,
        slowdown: f64,
        stepper: &mut S,
    ) -> IterationReport {
        let now = clock.now();
        let sim_time = stepper.sim_time();

        let sync = match self.sync {
            Some(sync) => sync,
            None => return self.resync(now, sim_time, stepper),
        };

        let elapsed_wall = now - sync.wall;
        let mut elapsed_sim = sim_time - sync.sim;
        let misaligned =
            (elapsed_wall / slowdown - elapsed_sim).abs() > self.misalign_threshold;

        if elapsed_sim < 0.0 || elapsed_wall < 0.0 || misaligned {
            return self.resync(now, sim_time, stepper);
        }

        let mut steps = 0;
        while elapsed_wall / slowdown > elapsed_sim {
            if steps == 0 && elapsed_sim > 0.0 {
                self.measured_slowdown = elapsed_wall / elapsed_sim;
            }

            let before = stepper.sim_time();
            stepper.step();
            steps += 1;
            let after = stepper.sim_time();

            // A step that does not move time forward (zero timestep, engine
            // reset) would spin here forever.
            if after <= before {
                break;
            }
            elapsed_sim = after - sync.sim;

            if clock.now() - now > self.refresh_budget {
                break;
            }
        }

        IterationReport {
            branch: Branch::CatchUp,
            steps,
        }
    }

    fn resync<S: Stepper + ?Sized>(&mut self, now: f64, sim_time: f64, stepper: &mut S) -> IterationReport {
        self.sync = Some(SyncPoint {
            wall: now,
            sim: sim_time,
        });
        stepper.step();
        IterationReport {
            branch: Branch::Resync,
            steps: 1,
        }
    }
}
