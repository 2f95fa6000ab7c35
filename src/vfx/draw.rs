//! Instance layouts and the GPU objects each emitter owns.

use super::emitter::{resolve_shader_paths, EmitterParams};
use super::particle::{Particle2D, Particle3D};
use super::ParticleSpace;
use crate::error::{VfxError, VfxResult};
use crate::renderer::{MeshDrawId, ModelId, QuadId, RenderContext, ShaderId};
use glam::{Mat3, Mat4, Quat, Vec2, Vec3};
use log::debug;

/// Flat quad instance: 2D affine transform plus straight RGBA color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BillboardInstance2D {
    pub transform: [[f32; 3]; 3],
    pub color: [f32; 4],
}

impl BillboardInstance2D {
    pub fn from_particle(particle: &Particle2D) -> Self {
        let transform =
            Mat3::from_scale_angle_translation(Vec2::splat(particle.size), particle.rotation, particle.position);
        Self { transform: transform.to_cols_array_2d(), color: particle.color.to_array() }
    }
}

/// Camera-facing quad instance. The vertex shader expands it along the camera axes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BillboardInstance3D {
    /// xyz = center, w = size.
    pub position_size: [f32; 4],
    pub color: [f32; 4],
    /// x = rotation around the view axis; yzw unused.
    pub rotation: [f32; 4],
}

impl BillboardInstance3D {
    pub fn from_particle(particle: &Particle3D) -> Self {
        Self {
            position_size: particle.position.extend(particle.size).to_array(),
            color: particle.color.to_array(),
            rotation: [particle.rotation, 0.0, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshInstance {
    pub mvp: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl MeshInstance {
    /// `view_proj * particle transform * mesh transform`, where the particle transform scales
    /// uniformly by size, spins around +Y by rotation and moves to position.
    pub fn from_particle(particle: &Particle3D, view_proj: Mat4, mesh_transform: Mat4) -> Self {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::splat(particle.size),
            Quat::from_rotation_y(particle.rotation),
            particle.position,
        ) * mesh_transform;
        Self { mvp: (view_proj * model).to_cols_array_2d(), color: particle.color.to_array() }
    }
}

pub fn build_instances_2d<'a>(particles: impl Iterator<Item = &'a Particle2D>) -> Vec<BillboardInstance2D> {
    particles.map(BillboardInstance2D::from_particle).collect()
}

pub fn build_instances_3d<'a>(particles: impl Iterator<Item = &'a Particle3D>) -> Vec<BillboardInstance3D> {
    particles.map(BillboardInstance3D::from_particle).collect()
}

pub fn build_mesh_instances<'a>(
    particles: impl Iterator<Item = &'a Particle3D>,
    view_proj: Mat4,
    mesh_transform: Mat4,
) -> Vec<MeshInstance> {
    particles.map(|particle| MeshInstance::from_particle(particle, view_proj, mesh_transform)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MeshDraw {
    pub id: MeshDrawId,
    pub mesh_index: usize,
}

/// Shader plus either one instanced quad or one instance buffer per drawable sub-mesh.
#[derive(Debug, Default)]
pub(crate) struct EmitterGpu {
    pub shader: Option<ShaderId>,
    pub quad: Option<QuadId>,
    pub model: Option<ModelId>,
    pub mesh_draws: Vec<MeshDraw>,
}

impl EmitterGpu {
    /// Creates every GPU object `params` needs. On failure whatever was created is destroyed.
    pub fn build<S: ParticleSpace>(ctx: &mut dyn RenderContext, params: &EmitterParams<S>) -> VfxResult<Self> {
        let model = if S::SUPPORTS_MESH { params.model } else { None };
        let (vertex, fragment) = params.shader_paths(model.is_some())?;
        let mut gpu = EmitterGpu::default();
        match gpu.populate::<S>(ctx, params, model, &vertex, &fragment) {
            Ok(()) => Ok(gpu),
            Err(err) => {
                debug!("[vfx] rolling back partially built {} emitter: {err}", S::LABEL);
                gpu.release(ctx);
                Err(err)
            }
        }
    }

    fn populate<S: ParticleSpace>(
        &mut self,
        ctx: &mut dyn RenderContext,
        params: &EmitterParams<S>,
        model: Option<ModelId>,
        vertex: &str,
        fragment: &str,
    ) -> VfxResult<()> {
        self.shader = Some(ctx.load_shader(vertex, fragment)?);
        let Some(model) = model else {
            self.quad = Some(ctx.create_quad(S::quad_desc(params.max_particles))?);
            return Ok(());
        };
        let meshes = ctx.model_meshes(model).ok_or_else(|| VfxError::not_found(format!("model {}", model.0)))?;
        self.model = Some(model);
        for (mesh_index, mesh) in meshes.iter().enumerate() {
            if !mesh.uploaded || mesh.index_count == 0 {
                continue;
            }
            let id = ctx.create_mesh_draw(model, mesh_index, params.max_particles)?;
            self.mesh_draws.push(MeshDraw { id, mesh_index });
        }
        if self.mesh_draws.is_empty() {
            return Err(VfxError::not_found(format!("model {} has no drawable meshes", model.0)));
        }
        Ok(())
    }

    pub fn is_mesh(&self) -> bool {
        self.model.is_some()
    }

    /// The emitter's shader, if it still resolves in `ctx`.
    pub fn live_shader(&self, ctx: &dyn RenderContext) -> Option<ShaderId> {
        self.shader.filter(|&shader| ctx.shader_exists(shader))
    }

    /// Loads the replacement first and only then drops the old shader.
    pub fn swap_shader<S: ParticleSpace>(
        &mut self,
        ctx: &mut dyn RenderContext,
        vertex: Option<&str>,
        fragment: Option<&str>,
    ) -> VfxResult<(String, String)> {
        let (vertex, fragment) = resolve_shader_paths::<S>(vertex, fragment, self.is_mesh())?;
        let shader = ctx.load_shader(&vertex, &fragment)?;
        if let Some(previous) = self.shader.replace(shader) {
            ctx.destroy_shader(previous);
        }
        Ok((vertex, fragment))
    }

    pub fn release(&mut self, ctx: &mut dyn RenderContext) {
        if let Some(shader) = self.shader.take() {
            ctx.destroy_shader(shader);
        }
        if let Some(quad) = self.quad.take() {
            ctx.destroy_quad(quad);
        }
        for draw in self.mesh_draws.drain(..) {
            ctx.destroy_mesh_draw(draw.id);
        }
        self.model = None;
    }
}
