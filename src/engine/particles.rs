// engine/particles.rs
// Reference engine: unit-mass point particles under uniform gravity, bouncing
// inside an axis-aligned cube. Models are described in TOML.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use ultraviolet::DVec3;

use super::{Camera, PhysicsEngine, SceneBody, SceneOptions, SceneSnapshot};
use crate::error::LoadError;
use crate::profile_scope;

const CONTACT_TOLERANCE: f64 = 1e-9;

fn default_name() -> String {
    "untitled".to_string()
}

fn default_timestep() -> f64 {
    0.002
}

fn default_gravity() -> [f64; 3] {
    [0.0, 0.0, -9.81]
}

fn default_restitution() -> f64 {
    0.9
}

fn default_half_extent() -> f64 {
    1.0
}

fn default_radius() -> f64 {
    0.02
}

/// On-disk model description.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelFile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    #[serde(default = "default_restitution")]
    pub restitution: f64,
    /// Half the edge length of the containing cube.
    #[serde(default = "default_half_extent")]
    pub half_extent: f64,
    #[serde(default)]
    pub particles: Vec<ParticleConfig>,
    #[serde(default)]
    pub random: Vec<RandomConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParticleConfig {
    pub position: [f64; 3],
    #[serde(default)]
    pub velocity: [f64; 3],
    #[serde(default = "default_radius")]
    pub radius: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RandomConfig {
    pub count: usize,
    #[serde(default = "default_radius")]
    pub radius: f64,
    /// Velocity variance per axis for unit-mass particles.
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub seed: u64,
}

fn vec3(a: [f64; 3]) -> DVec3 {
    DVec3::new(a[0], a[1], a[2])
}

fn array3(v: DVec3) -> [f64; 3] {
    [v.x, v.y, v.z]
}

/// Sample a random velocity vector from a Maxwell-Boltzmann distribution.
fn sample_velocity(rng: &mut StdRng, temperature: f64) -> DVec3 {
    let sigma = temperature.max(0.0).sqrt();
    let vx: f64 = StandardNormal.sample(rng);
    let vy: f64 = StandardNormal.sample(rng);
    let vz: f64 = StandardNormal.sample(rng);
    DVec3::new(vx, vy, vz) * sigma
}

#[derive(Debug, Clone)]
pub struct ParticleModel {
    pub name: String,
    pub timestep: f64,
    pub gravity: DVec3,
    pub restitution: f64,
    pub half_extent: f64,
    pub radii: Vec<f64>,
    initial_positions: Vec<DVec3>,
    initial_velocities: Vec<DVec3>,
}

impl ParticleModel {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, LoadError> {
        let file: ModelFile = toml::from_str(content).map_err(|e| LoadError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_file(file)
    }

    pub fn from_file(file: ModelFile) -> Result<Self, LoadError> {
        if !(file.timestep.is_finite() && file.timestep > 0.0) {
            return Err(LoadError::Invalid(format!(
                "timestep must be positive, got {}",
                file.timestep
            )));
        }
        if !(file.half_extent.is_finite() && file.half_extent > 0.0) {
            return Err(LoadError::Invalid(format!(
                "half_extent must be positive, got {}",
                file.half_extent
            )));
        }
        if !(0.0..=1.0).contains(&file.restitution) {
            return Err(LoadError::Invalid(format!(
                "restitution must be within [0, 1], got {}",
                file.restitution
            )));
        }

        let h = file.half_extent;
        let mut radii = Vec::new();
        let mut positions = Vec::new();
        let mut velocities = Vec::new();

        for p in &file.particles {
            if !(p.radius > 0.0 && p.radius < h) {
                return Err(LoadError::Invalid(format!(
                    "particle radius {} does not fit a box of half extent {}",
                    p.radius, h
                )));
            }
            radii.push(p.radius);
            positions.push(vec3(p.position));
            velocities.push(vec3(p.velocity));
        }

        for block in &file.random {
            if !(block.radius > 0.0 && block.radius < h) {
                return Err(LoadError::Invalid(format!(
                    "random block radius {} does not fit a box of half extent {}",
                    block.radius, h
                )));
            }
            let mut rng = StdRng::seed_from_u64(block.seed);
            let limit = h - block.radius;
            for _ in 0..block.count {
                let pos = DVec3::new(
                    rng.random_range(-limit..=limit),
                    rng.random_range(-limit..=limit),
                    rng.random_range(-limit..=limit),
                );
                radii.push(block.radius);
                positions.push(pos);
                velocities.push(sample_velocity(&mut rng, block.temperature));
            }
        }

        if radii.is_empty() {
            return Err(LoadError::Invalid("model has no particles".into()));
        }

        Ok(Self {
            name: file.name,
            timestep: file.timestep,
            gravity: vec3(file.gravity),
            restitution: file.restitution,
            half_extent: h,
            radii,
            initial_positions: positions,
            initial_velocities: velocities,
        })
    }

    pub fn particle_count(&self) -> usize {
        self.radii.len()
    }
}

#[derive(Debug, Clone)]
pub struct ParticleState {
    pub time: f64,
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    // Derived by `forward`.
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    pub contacts: usize,
}

/// Clamp one coordinate into `[-limit, limit]`, reflecting the velocity
/// component when a wall is hit.
fn bounce(p: &mut f64, v: &mut f64, limit: f64, restitution: f64) {
    if *p > limit {
        *p = limit;
        if *v > 0.0 {
            *v = -*v * restitution;
        }
    } else if *p < -limit {
        *p = -limit;
        if *v < 0.0 {
            *v = -*v * restitution;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParticleEngine;

impl ParticleEngine {
    pub fn new() -> Self {
        Self
    }
}

impl PhysicsEngine for ParticleEngine {
    type Model = ParticleModel;
    type State = ParticleState;

    fn load_model(&self, path: &Path) -> Result<ParticleModel, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ParticleModel::from_toml_str(&content, path)
    }

    fn make_state(&self, model: &ParticleModel) -> ParticleState {
        let mut state = ParticleState {
            time: 0.0,
            positions: model.initial_positions.clone(),
            velocities: model.initial_velocities.clone(),
            kinetic_energy: 0.0,
            potential_energy: 0.0,
            contacts: 0,
        };
        self.forward(model, &mut state);
        state
    }

    fn step(&self, model: &ParticleModel, state: &mut ParticleState) {
        profile_scope!("particle_step");
        let dt = model.timestep;
        let g = model.gravity;
        let h = model.half_extent;
        let e = model.restitution;

        state
            .positions
            .par_iter_mut()
            .zip(state.velocities.par_iter_mut())
            .zip(model.radii.par_iter())
            .for_each(|((pos, vel), &radius)| {
                // Semi-implicit Euler.
                *vel += g * dt;
                *pos += *vel * dt;
                let limit = h - radius;
                bounce(&mut pos.x, &mut vel.x, limit, e);
                bounce(&mut pos.y, &mut vel.y, limit, e);
                bounce(&mut pos.z, &mut vel.z, limit, e);
            });

        state.time += dt;
        self.forward(model, state);
    }

    fn reset_state(&self, model: &ParticleModel, state: &mut ParticleState) {
        state.time = 0.0;
        state.positions.clone_from(&model.initial_positions);
        state.velocities.clone_from(&model.initial_velocities);
        self.forward(model, state);
    }

    fn forward(&self, model: &ParticleModel, state: &mut ParticleState) {
        let h = model.half_extent;
        state.kinetic_energy = state.velocities.iter().map(|v| 0.5 * v.mag_sq()).sum();
        state.potential_energy = -state
            .positions
            .iter()
            .map(|p| p.dot(model.gravity))
            .sum::<f64>();
        state.contacts = state
            .positions
            .iter()
            .zip(&model.radii)
            .filter(|(p, r)| {
                let limit = h - **r - CONTACT_TOLERANCE;
                p.x.abs() >= limit || p.y.abs() >= limit || p.z.abs() >= limit
            })
            .count();
    }

    fn integration_state_size(&self, model: &ParticleModel) -> usize {
        1 + 6 * model.particle_count()
    }

    fn get_integration_state(&self, model: &ParticleModel, state: &ParticleState, out: &mut [f64]) {
        let n = model.particle_count();
        out[0] = state.time;
        for (i, p) in state.positions.iter().enumerate() {
            out[1 + 3 * i..4 + 3 * i].copy_from_slice(&array3(*p));
        }
        let base = 1 + 3 * n;
        for (i, v) in state.velocities.iter().enumerate() {
            out[base + 3 * i..base + 3 + 3 * i].copy_from_slice(&array3(*v));
        }
    }

    fn set_integration_state(&self, model: &ParticleModel, state: &mut ParticleState, src: &[f64]) {
        let n = model.particle_count();
        state.time = src[0];
        for (i, p) in state.positions.iter_mut().enumerate() {
            *p = DVec3::new(src[1 + 3 * i], src[2 + 3 * i], src[3 + 3 * i]);
        }
        let base = 1 + 3 * n;
        for (i, v) in state.velocities.iter_mut().enumerate() {
            *v = DVec3::new(src[base + 3 * i], src[base + 1 + 3 * i], src[base + 2 + 3 * i]);
        }
    }

    fn update_scene(
        &self,
        model: &ParticleModel,
        state: &ParticleState,
        options: &SceneOptions,
        camera: &Camera,
    ) -> SceneSnapshot {
        profile_scope!("update_scene");
        SceneSnapshot {
            label: model.name.clone(),
            time: state.time,
            bodies: state
                .positions
                .iter()
                .zip(&model.radii)
                .map(|(p, r)| SceneBody {
                    position: array3(*p),
                    radius: *r,
                })
                .collect(),
            flags: options.flags,
            camera: *camera,
        }
    }

    fn sim_time(&self, state: &ParticleState) -> f64 {
        state.time
    }

    fn default_camera(&self, model: &ParticleModel) -> Camera {
        Camera {
            distance: 4.0 * model.half_extent,
            ..Camera::default()
        }
    }
}
