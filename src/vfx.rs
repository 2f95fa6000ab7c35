//! Particle VFX: pooled emitters driven by keyframed tracks, rendered through instanced draws into
//! an offscreen framebuffer and composited onto a window.

use crate::renderer::{QuadDesc, QuadKind};
use glam::{Vec2, Vec3, Vec4};
use std::ops::{Add, Mul};

pub mod draw;
pub mod emitter;
pub mod particle;
pub mod render;
pub mod system;
pub mod track;

pub use draw::{BillboardInstance2D, BillboardInstance3D, MeshInstance};
pub use emitter::{BlendMode, Emitter, EmitterParams, ParticleCallback, UniformCallback};
pub use particle::{Particle, Particle2D, Particle3D, ParticlePool};
pub use system::{EmitterHandle, VfxDiagnostics, VfxParams, VfxSystem, VfxSystem2D, VfxSystem3D};
pub use track::{BuiltinTarget, BuiltinTracks, Track, TrackCurve, TrackValue, TrackValueType, UniformTracks};

pub const SHADER_2D_VERTEX: &str = "shaders/vfx_2d_vert.glsl";
pub const SHADER_2D_FRAGMENT: &str = "shaders/vfx_2d_frag.glsl";
pub const SHADER_3D_BILLBOARD_VERTEX: &str = "shaders/vfx_3d_billboard_vert.glsl";
pub const SHADER_3D_BILLBOARD_FRAGMENT: &str = "shaders/vfx_3d_billboard_frag.glsl";
pub const SHADER_3D_MESH_VERTEX: &str = "shaders/vfx_3d_mesh_vert.glsl";
pub const SHADER_3D_MESH_FRAGMENT: &str = "shaders/vfx_3d_mesh_frag.glsl";

/// Dimensionality a VFX system simulates in. Implemented by [`Space2D`] and [`Space3D`].
pub trait ParticleSpace: Sized + Clone + std::fmt::Debug + PartialEq + 'static {
    type Vector: TrackValue + Default + Add<Output = Self::Vector> + Mul<f32, Output = Self::Vector> + 'static;

    const LABEL: &'static str;
    /// Whether emitters may render a model per particle instead of a billboard.
    const SUPPORTS_MESH: bool;
    const QUAD_KIND: QuadKind;
    const INSTANCE_STRIDE: u32;

    fn default_params() -> EmitterParams<Self>;

    fn default_shader_paths(mesh: bool) -> (&'static str, &'static str);

    fn quad_desc(max_particles: u32) -> QuadDesc {
        QuadDesc {
            kind: Self::QUAD_KIND,
            instance_stride: Self::INSTANCE_STRIDE,
            max_instances: max_particles.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space2D {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space3D {}

impl ParticleSpace for Space2D {
    type Vector = Vec2;

    const LABEL: &'static str = "2d";
    const SUPPORTS_MESH: bool = false;
    const QUAD_KIND: QuadKind = QuadKind::Flat2D;
    const INSTANCE_STRIDE: u32 = std::mem::size_of::<BillboardInstance2D>() as u32;

    fn default_params() -> EmitterParams<Self> {
        EmitterParams {
            position: Vec2::ZERO,
            velocity: Vec2::new(0.0, 0.45),
            color: Vec4::ONE,
            size: 0.04,
            rotation: 0.0,
            spawn_rate: 32.0,
            burst_count: 16,
            lifetime_min: 0.4,
            lifetime_max: 1.1,
            max_particles: 512,
            texture: None,
            model: None,
            vertex_shader_path: None,
            fragment_shader_path: None,
            blend_mode: BlendMode::Alpha,
            start_active: true,
        }
    }

    fn default_shader_paths(_mesh: bool) -> (&'static str, &'static str) {
        (SHADER_2D_VERTEX, SHADER_2D_FRAGMENT)
    }
}

impl ParticleSpace for Space3D {
    type Vector = Vec3;

    const LABEL: &'static str = "3d";
    const SUPPORTS_MESH: bool = true;
    const QUAD_KIND: QuadKind = QuadKind::Billboard3D;
    const INSTANCE_STRIDE: u32 = std::mem::size_of::<BillboardInstance3D>() as u32;

    fn default_params() -> EmitterParams<Self> {
        EmitterParams {
            position: Vec3::ZERO,
            velocity: Vec3::new(0.0, 0.9, 0.0),
            color: Vec4::ONE,
            size: 0.2,
            rotation: 0.0,
            spawn_rate: 24.0,
            burst_count: 12,
            lifetime_min: 0.5,
            lifetime_max: 1.5,
            max_particles: 1024,
            texture: None,
            model: None,
            vertex_shader_path: None,
            fragment_shader_path: None,
            blend_mode: BlendMode::Alpha,
            start_active: true,
        }
    }

    fn default_shader_paths(mesh: bool) -> (&'static str, &'static str) {
        if mesh {
            (SHADER_3D_MESH_VERTEX, SHADER_3D_MESH_FRAGMENT)
        } else {
            (SHADER_3D_BILLBOARD_VERTEX, SHADER_3D_BILLBOARD_FRAGMENT)
        }
    }
}

pub(crate) fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
