// engine/mod.rs
// The physics-engine contract the simulation core orchestrates, plus the
// scene types handed to the render thread.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::LoadError;

pub mod particles;

#[cfg(test)]
pub(crate) mod testing;

/// External physics engine. The core never does physics itself; it only
/// calls these operations under its own locking and timing discipline.
///
/// Integration state is exchanged as a fixed-size slice of `f64` scalars
/// whose length is `integration_state_size(model)`.
pub trait PhysicsEngine: Send + Sync + 'static {
    type Model: Send + 'static;
    type State: Send + 'static;

    fn load_model(&self, path: &Path) -> Result<Self::Model, LoadError>;

    fn make_state(&self, model: &Self::Model) -> Self::State;

    /// Advance `state` by one solver timestep (a model property).
    fn step(&self, model: &Self::Model, state: &mut Self::State);

    fn reset_state(&self, model: &Self::Model, state: &mut Self::State);

    /// Recompute derived quantities without advancing time.
    fn forward(&self, model: &Self::Model, state: &mut Self::State);

    fn integration_state_size(&self, model: &Self::Model) -> usize;

    fn get_integration_state(&self, model: &Self::Model, state: &Self::State, out: &mut [f64]);

    fn set_integration_state(&self, model: &Self::Model, state: &mut Self::State, src: &[f64]);

    fn update_scene(
        &self,
        model: &Self::Model,
        state: &Self::State,
        options: &SceneOptions,
        camera: &Camera,
    ) -> SceneSnapshot;

    fn sim_time(&self, state: &Self::State) -> f64;

    fn default_camera(&self, _model: &Self::Model) -> Camera {
        Camera::default()
    }
}

/// Engine-defined rendering toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderFlag {
    Shadow,
    Wireframe,
    Reflection,
    Additive,
    Skybox,
    Fog,
    Haze,
    Segment,
    IdColor,
    CullFace,
}

impl RenderFlag {
    pub const COUNT: usize = 10;

    pub const ALL: [RenderFlag; RenderFlag::COUNT] = [
        RenderFlag::Shadow,
        RenderFlag::Wireframe,
        RenderFlag::Reflection,
        RenderFlag::Additive,
        RenderFlag::Skybox,
        RenderFlag::Fog,
        RenderFlag::Haze,
        RenderFlag::Segment,
        RenderFlag::IdColor,
        RenderFlag::CullFace,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Fixed-size set of [`RenderFlag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderFlags(u16);

impl RenderFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, flag: RenderFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn set(&mut self, flag: RenderFlag, on: bool) {
        if on {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    pub fn toggle(&mut self, flag: RenderFlag) {
        self.0 ^= flag.bit();
    }

    pub fn iter(self) -> impl Iterator<Item = RenderFlag> {
        RenderFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<RenderFlag> for RenderFlags {
    fn from_iter<I: IntoIterator<Item = RenderFlag>>(iter: I) -> Self {
        let mut flags = RenderFlags::empty();
        for flag in iter {
            flags.set(flag, true);
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneOptions {
    pub flags: RenderFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub lookat: [f64; 3],
    pub distance: f64,
    pub azimuth: f64,
    pub elevation: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            lookat: [0.0; 3],
            distance: 2.0,
            azimuth: 90.0,
            elevation: -45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBody {
    pub position: [f64; 3],
    pub radius: f64,
}

/// Everything the render thread needs to draw one frame, copied out of the
/// live state while the simulation lock is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub label: String,
    pub time: f64,
    pub bodies: Vec<SceneBody>,
    pub flags: RenderFlags,
    pub camera: Camera,
}
