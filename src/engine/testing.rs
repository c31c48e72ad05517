// Deterministic engine double for controller and renderer tests.

use std::path::Path;

use super::{Camera, PhysicsEngine, SceneOptions, SceneSnapshot};
use crate::error::LoadError;

/// Every step adds `timestep` to the clock and 1.0 to each counter.
/// Paths whose file stem is `bad` fail to load.
#[derive(Debug, Clone)]
pub struct CounterEngine {
    pub timestep: f64,
    pub counters: usize,
}

impl Default for CounterEngine {
    fn default() -> Self {
        Self {
            timestep: 0.001,
            counters: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterModel {
    pub name: String,
    pub timestep: f64,
    pub counters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterState {
    pub time: f64,
    pub values: Vec<f64>,
    pub forward_calls: usize,
}

impl CounterEngine {
    pub fn model(&self, name: &str) -> CounterModel {
        CounterModel {
            name: name.to_string(),
            timestep: self.timestep,
            counters: self.counters,
        }
    }
}

impl PhysicsEngine for CounterEngine {
    type Model = CounterModel;
    type State = CounterState;

    fn load_model(&self, path: &Path) -> Result<CounterModel, LoadError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if stem == "bad" {
            return Err(LoadError::Invalid(format!("{} is not a model", path.display())));
        }
        Ok(self.model(stem))
    }

    fn make_state(&self, model: &CounterModel) -> CounterState {
        CounterState {
            time: 0.0,
            values: vec![0.0; model.counters],
            forward_calls: 0,
        }
    }

    fn step(&self, model: &CounterModel, state: &mut CounterState) {
        state.time += model.timestep;
        for v in &mut state.values {
            *v += 1.0;
        }
    }

    fn reset_state(&self, _model: &CounterModel, state: &mut CounterState) {
        state.time = 0.0;
        state.values.iter_mut().for_each(|v| *v = 0.0);
    }

    fn forward(&self, _model: &CounterModel, state: &mut CounterState) {
        state.forward_calls += 1;
    }

    fn integration_state_size(&self, model: &CounterModel) -> usize {
        1 + model.counters
    }

    fn get_integration_state(&self, _model: &CounterModel, state: &CounterState, out: &mut [f64]) {
        out[0] = state.time;
        out[1..].copy_from_slice(&state.values);
    }

    fn set_integration_state(&self, _model: &CounterModel, state: &mut CounterState, src: &[f64]) {
        state.time = src[0];
        state.values.copy_from_slice(&src[1..]);
    }

    fn update_scene(
        &self,
        model: &CounterModel,
        state: &CounterState,
        options: &SceneOptions,
        camera: &Camera,
    ) -> SceneSnapshot {
        SceneSnapshot {
            label: model.name.clone(),
            time: state.time,
            bodies: Vec::new(),
            flags: options.flags,
            camera: *camera,
        }
    }

    fn sim_time(&self, state: &CounterState) -> f64 {
        state.time
    }
}
