use super::draw::EmitterGpu;
use super::particle::{Particle, ParticlePool};
use super::track::{BuiltinTarget, BuiltinTracks, TrackValue, UniformTracks};
use super::{clamp01, ParticleSpace};
use crate::arena::Handle;
use crate::curve::CurveMode;
use crate::error::{VfxError, VfxResult};
use crate::renderer::{BlendState, ModelId, ShaderUniforms, TextureId};
use glam::Vec4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

/// Largest step a single tick simulates; longer stalls are truncated.
pub const MAX_TICK_DT: f32 = 0.25;
pub const MIN_LIFETIME: f32 = 1e-4;

const SEED_MIX: u64 = 0x9E37_79B9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Alpha,
    Additive,
}

impl BlendMode {
    pub fn state(self) -> BlendState {
        match self {
            BlendMode::Alpha => BlendState::ALPHA,
            BlendMode::Additive => BlendState::ADDITIVE,
        }
    }
}

/// Runs after built-in tracks for every live particle, with the tick's `dt`.
pub type ParticleCallback<V> = Box<dyn FnMut(&mut Particle<V>, f32)>;
/// Runs once per render after uniform tracks, with the emitter's last tick `dt`.
pub type UniformCallback = Box<dyn FnMut(Handle, &mut ShaderUniforms<'_>, f32)>;

/// Creation parameters for an emitter.
///
/// Callbacks are not part of the parameters so they stay cloneable and comparable; attach them
/// with `set_particle_callback` and `set_uniform_callback` once the emitter exists.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterParams<S: ParticleSpace> {
    pub position: S::Vector,
    pub velocity: S::Vector,
    pub color: Vec4,
    pub size: f32,
    pub rotation: f32,
    /// Particles per second while running.
    pub spawn_rate: f32,
    pub burst_count: u32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub max_particles: u32,
    pub texture: Option<TextureId>,
    /// Renders each particle as an instance of this model. 3D only.
    pub model: Option<ModelId>,
    pub vertex_shader_path: Option<String>,
    pub fragment_shader_path: Option<String>,
    pub blend_mode: BlendMode,
    pub start_active: bool,
}

impl<S: ParticleSpace> Default for EmitterParams<S> {
    fn default() -> Self {
        S::default_params()
    }
}

impl<S: ParticleSpace> EmitterParams<S> {
    /// Clamps counts and lifetimes into their usable ranges.
    pub fn sanitized(mut self) -> Self {
        self.max_particles = self.max_particles.max(1);
        self.lifetime_min = finite_or(self.lifetime_min, MIN_LIFETIME).max(MIN_LIFETIME);
        self.lifetime_max = finite_or(self.lifetime_max, self.lifetime_min).max(self.lifetime_min);
        self.spawn_rate = finite_or(self.spawn_rate, 0.0).max(0.0);
        self.size = finite_or(self.size, 0.0).max(0.0);
        self
    }

    /// Both shader paths or neither.
    pub fn shader_paths(&self, mesh: bool) -> VfxResult<(String, String)> {
        resolve_shader_paths::<S>(self.vertex_shader_path.as_deref(), self.fragment_shader_path.as_deref(), mesh)
    }
}

pub(crate) fn resolve_shader_paths<S: ParticleSpace>(
    vertex: Option<&str>,
    fragment: Option<&str>,
    mesh: bool,
) -> VfxResult<(String, String)> {
    let vertex = vertex.filter(|path| !path.is_empty());
    let fragment = fragment.filter(|path| !path.is_empty());
    match (vertex, fragment) {
        (Some(vertex), Some(fragment)) => Ok((vertex.to_string(), fragment.to_string())),
        (None, None) => {
            let (vertex, fragment) = S::default_shader_paths(mesh);
            Ok((vertex.to_string(), fragment.to_string()))
        }
        _ => Err(VfxError::invalid("vertex and fragment shader paths must be given together")),
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Deterministic per-handle seed; identical handle sequences replay identical lifetimes.
fn seed_for(handle: Handle) -> u64 {
    let mut seed = handle.to_bits().wrapping_add(1);
    seed ^= seed << 13;
    seed ^= SEED_MIX;
    if seed == 0 {
        1
    } else {
        seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct TickCounts {
    pub spawned: u32,
    pub expired: u32,
}

/// One particle source: pool, spawn configuration, tracks and callbacks.
pub struct Emitter<S: ParticleSpace> {
    handle: Handle,
    params: EmitterParams<S>,
    pool: ParticlePool<S::Vector>,
    builtin_tracks: BuiltinTracks,
    uniform_tracks: UniformTracks,
    rng: StdRng,
    running: bool,
    spawn_accumulator: f32,
    uniform_time: f32,
    last_tick_dt: f32,
    particle_callback: Option<ParticleCallback<S::Vector>>,
    uniform_callback: Option<UniformCallback>,
    pub(crate) gpu: EmitterGpu,
}

impl<S: ParticleSpace> std::fmt::Debug for Emitter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("handle", &self.handle)
            .field("space", &S::LABEL)
            .field("alive", &self.pool.alive_count())
            .field("running", &self.running)
            .field("uniform_tracks", &self.uniform_tracks.len())
            .finish_non_exhaustive()
    }
}

impl<S: ParticleSpace> Emitter<S> {
    /// `params` are expected to be sanitized already.
    pub(crate) fn new(handle: Handle, params: EmitterParams<S>) -> VfxResult<Self> {
        let pool = ParticlePool::with_capacity(params.max_particles as usize)?;
        Ok(Self {
            handle,
            running: params.start_active,
            params,
            pool,
            builtin_tracks: BuiltinTracks::default(),
            uniform_tracks: UniformTracks::new(),
            rng: StdRng::seed_from_u64(seed_for(handle)),
            spawn_accumulator: 0.0,
            uniform_time: 0.0,
            last_tick_dt: 0.0,
            particle_callback: None,
            uniform_callback: None,
            gpu: EmitterGpu::default(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn params(&self) -> &EmitterParams<S> {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pool(&self) -> &ParticlePool<S::Vector> {
        &self.pool
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle<S::Vector>> {
        self.pool.iter_alive()
    }

    pub fn alive_count(&self) -> usize {
        self.pool.alive_count()
    }

    pub fn builtin_tracks(&self) -> &BuiltinTracks {
        &self.builtin_tracks
    }

    pub fn uniform_tracks(&self) -> &UniformTracks {
        &self.uniform_tracks
    }

    /// Emitter-wide time wrapped into `[0, 1)`, used to sample uniform tracks.
    pub fn uniform_time(&self) -> f32 {
        self.uniform_time
    }

    pub fn last_tick_dt(&self) -> f32 {
        self.last_tick_dt
    }

    /// True when this emitter draws model instances rather than billboards.
    pub fn uses_mesh(&self) -> bool {
        self.gpu.is_mesh()
    }

    pub(crate) fn params_mut(&mut self) -> &mut EmitterParams<S> {
        &mut self.params
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub(crate) fn set_spawn(&mut self, rate: f32, burst: u32, lifetime_min: f32, lifetime_max: f32) -> VfxResult<()> {
        if !rate.is_finite() || !lifetime_min.is_finite() || !lifetime_max.is_finite() {
            return Err(VfxError::invalid("spawn parameters must be finite"));
        }
        if lifetime_min <= 0.0 {
            return Err(VfxError::invalid(format!("lifetime_min {lifetime_min} must be positive")));
        }
        if lifetime_max < lifetime_min {
            return Err(VfxError::invalid(format!("lifetime_max {lifetime_max} < lifetime_min {lifetime_min}")));
        }
        if rate < 0.0 {
            return Err(VfxError::invalid(format!("spawn rate {rate} must not be negative")));
        }
        self.params.spawn_rate = rate;
        self.params.burst_count = burst;
        self.params.lifetime_min = lifetime_min.max(MIN_LIFETIME);
        self.params.lifetime_max = lifetime_max.max(self.params.lifetime_min);
        Ok(())
    }

    pub(crate) fn set_particle_callback(&mut self, callback: Option<ParticleCallback<S::Vector>>) {
        self.particle_callback = callback;
    }

    pub(crate) fn set_uniform_callback(&mut self, callback: Option<UniformCallback>) {
        self.uniform_callback = callback;
    }

    pub(crate) fn add_builtin_key<T: TrackValue>(
        &mut self,
        target: BuiltinTarget,
        mode: CurveMode,
        t: f32,
        value: T,
    ) -> VfxResult<()> {
        let expected = target.value_type::<S>();
        if T::VALUE_TYPE != expected {
            return Err(VfxError::invalid(format!(
                "{} {} track takes {} keys, not {}",
                S::LABEL,
                target.label(),
                expected.label(),
                T::VALUE_TYPE.label()
            )));
        }
        self.builtin_tracks.get_mut(target).add_key(mode, t, value)
    }

    pub(crate) fn set_builtin_track_enabled(&mut self, target: BuiltinTarget, enabled: bool) {
        self.builtin_tracks.get_mut(target).set_enabled(enabled);
    }

    pub(crate) fn add_uniform_key<T: TrackValue>(
        &mut self,
        name: &str,
        mode: CurveMode,
        t: f32,
        value: T,
    ) -> VfxResult<()> {
        self.uniform_tracks.get_or_create(name)?.add_key(mode, t, value)
    }

    pub(crate) fn clear_builtin_track(&mut self, target: BuiltinTarget) {
        self.builtin_tracks.get_mut(target).reset();
    }

    pub(crate) fn clear_uniform_track(&mut self, name: &str) -> VfxResult<()> {
        self.uniform_tracks.remove(name)
    }

    pub(crate) fn clear_tracks(&mut self) {
        self.builtin_tracks.reset_all();
        self.uniform_tracks.clear_all();
    }

    /// Spawns one particle from the emitter defaults. False when the pool is full.
    pub(crate) fn spawn(&mut self) -> bool {
        if self.pool.is_full() {
            return false;
        }
        let min = self.params.lifetime_min;
        let max = self.params.lifetime_max.max(min);
        let lifetime = if max > min { self.rng.gen_range(min..=max) } else { min };
        let mut particle = Particle {
            position: self.params.position,
            velocity: self.params.velocity,
            color: self.params.color,
            size: self.params.size.max(0.0),
            rotation: self.params.rotation,
            age: 0.0,
            lifetime,
            alive: true,
        };
        apply_builtin_tracks::<S>(&self.builtin_tracks, &mut particle, 0.0);
        self.pool.spawn(particle).is_some()
    }

    /// `count == 0` uses the configured burst count. Returns how many actually spawned.
    pub(crate) fn burst(&mut self, count: u32) -> u32 {
        let count = if count == 0 { self.params.burst_count } else { count };
        let mut spawned = 0;
        for _ in 0..count {
            if !self.spawn() {
                break;
            }
            spawned += 1;
        }
        spawned
    }

    /// Advances by an already-sanitized `dt` (see [`sanitize_dt`]).
    pub(crate) fn tick(&mut self, dt: f32) -> TickCounts {
        let mut counts = TickCounts::default();
        if dt <= 0.0 {
            return counts;
        }
        self.last_tick_dt = dt;
        self.uniform_time = (self.uniform_time + dt).rem_euclid(1.0);

        if self.running && self.params.spawn_rate > 0.0 {
            self.spawn_accumulator += self.params.spawn_rate * dt;
            let whole = self.spawn_accumulator.floor();
            self.spawn_accumulator -= whole;
            for _ in 0..whole as u32 {
                if !self.spawn() {
                    break;
                }
                counts.spawned += 1;
            }
        }

        let tracks = &self.builtin_tracks;
        let callback = &mut self.particle_callback;
        counts.expired = self.pool.advance(dt, |particle| {
            let life = particle.life_fraction();
            apply_builtin_tracks::<S>(tracks, particle, life);
            particle.position = particle.position + particle.velocity * dt;
            if let Some(callback) = callback.as_mut() {
                callback(particle, dt);
            }
        });
        counts
    }

    pub(crate) fn run_uniform_callback(&mut self, uniforms: &mut ShaderUniforms<'_>) {
        let dt = self.last_tick_dt;
        if let Some(callback) = self.uniform_callback.as_mut() {
            callback(self.handle, uniforms, dt);
        }
    }
}

/// Clamps `dt` into `(0, MAX_TICK_DT]`; anything non-positive or non-finite becomes 0 (skip).
pub fn sanitize_dt(dt: f32) -> f32 {
    if !dt.is_finite() || dt <= 0.0 {
        0.0
    } else {
        dt.min(MAX_TICK_DT)
    }
}

fn apply_builtin_tracks<S: ParticleSpace>(tracks: &BuiltinTracks, particle: &mut Particle<S::Vector>, life: f32) {
    let life = clamp01(life);
    if let Some(velocity) = tracks.get(BuiltinTarget::Velocity).eval::<S::Vector>(life) {
        particle.velocity = velocity;
    }
    if let Some(color) = tracks.get(BuiltinTarget::Color).eval::<Vec4>(life) {
        particle.color = color;
    }
    if let Some(size) = tracks.get(BuiltinTarget::Size).eval::<f32>(life) {
        particle.size = size.max(0.0);
    }
    if let Some(rotation) = tracks.get(BuiltinTarget::Rotation).eval::<f32>(life) {
        particle.rotation = rotation;
    }
}
