//! `render` rasterizes every emitter into the system's offscreen framebuffer without advancing
//! the simulation. `draw` composites that framebuffer onto a window.

use super::draw::{build_instances_2d, build_instances_3d, build_mesh_instances};
use super::emitter::{BlendMode, Emitter};
use super::system::{EmitterHandle, Output, VfxSystem};
use super::{ParticleSpace, Space2D, Space3D};
use crate::error::{VfxError, VfxResult};
use crate::renderer::{
    BlendState, CameraId, CullFace, DepthFunc, PipelineStateGuard, RenderContext, ShaderId,
    ShaderUniforms, UniformValue, Viewport, WindowId, Winding,
};
use glam::{Mat4, UVec2, Vec2, Vec4};
use log::{trace, warn};

const RESIZE_TOLERANCE: f32 = 0.5;

impl<S: ParticleSpace> VfxSystem<S> {
    /// Creates or resizes the output to the configured size, or to the window's when none is fixed.
    fn ensure_output(&mut self, ctx: &mut dyn RenderContext, window: WindowId) -> VfxResult<Output> {
        let surface = window_size(&*ctx, window)?;
        if surface.x == 0 || surface.y == 0 {
            return Err(VfxError::backend(format!("window {} has a zero-sized framebuffer", window.0)));
        }
        let desired = self.params().fixed_size().unwrap_or_else(|| surface.as_vec2());
        let existing = self.output.filter(|output| ctx.framebuffer_size(output.framebuffer).is_some());
        let output = match existing {
            None => {
                let framebuffer = ctx.create_framebuffer(desired)?;
                Output { framebuffer, size: desired }
            }
            Some(output) if sizes_differ(output.size, desired) => {
                ctx.resize_framebuffer(output.framebuffer, desired)?;
                Output { size: desired, ..output }
            }
            Some(output) => output,
        };
        self.output = Some(output);
        Ok(output)
    }

    /// Composites the last rendered output onto `window` with straight alpha and no depth test.
    pub fn draw(&self, ctx: &mut dyn RenderContext, window: WindowId) -> VfxResult<()> {
        let size = window_size(&*ctx, window)?;
        let output = self.output.ok_or_else(|| VfxError::not_found("nothing rendered yet"))?;
        let texture = ctx
            .framebuffer_texture(output.framebuffer)
            .ok_or_else(|| VfxError::not_found(format!("framebuffer {}", output.framebuffer.0)))?;
        let mut pass = PipelineStateGuard::capture(ctx);
        pass.unbind_framebuffer();
        let mut state = *pass.saved();
        state.viewport = Viewport::from_size(size);
        state.blend = BlendState::ALPHA;
        state.depth_test = false;
        state.depth_write = false;
        state.cull = None;
        pass.apply_pipeline_state(&state);
        pass.composite_to_window(window, texture)
    }
}

impl VfxSystem<Space2D> {
    /// Draws every emitter into the output framebuffer. Pipeline state and clear color are restored;
    /// the window framebuffer is left bound and the last emitter's shader stays active.
    pub fn render(&mut self, ctx: &mut dyn RenderContext, window: WindowId) -> VfxResult<()> {
        let output = self.ensure_output(ctx, window)?;
        let mut pass = PipelineStateGuard::capture(ctx);
        begin_pass(&mut *pass, output)?;
        let mut state = pass.pipeline_state();
        state.depth_test = false;
        state.depth_write = false;
        state.cull = None;
        pass.apply_pipeline_state(&state);

        for (handle, emitter) in self.emitters.iter_mut() {
            let Some(shader) = emitter.gpu.live_shader(&*pass) else { continue };
            let Some(quad) = emitter.gpu.quad else { continue };
            let instances = build_instances_2d(emitter.particles());
            if instances.is_empty() {
                continue;
            }
            bind_emitter_uniforms(&mut *pass, handle, emitter, shader);
            pass.use_shader(shader);
            pass.set_blend(emitter.params().blend_mode.state());
            let submitted = pass.draw_quad_instanced(quad, bytemuck::cast_slice(&instances), instances.len() as u32);
            report_draw_failure(handle, submitted);
            pass.set_blend(BlendState::ALPHA);
        }

        pass.unbind_framebuffer();
        Ok(())
    }
}

impl VfxSystem<Space3D> {
    /// 3D counterpart of the 2D `render`, projecting through `camera` at the output's aspect ratio.
    /// Leaves the window framebuffer bound and the last emitter's shader active.
    pub fn render(&mut self, ctx: &mut dyn RenderContext, window: WindowId, camera: CameraId) -> VfxResult<()> {
        let camera = ctx.camera(camera).ok_or_else(|| VfxError::not_found(format!("camera {}", camera.0)))?;
        let output = self.ensure_output(ctx, window)?;
        let view_proj = camera.view_projection_for(output.size);
        let (camera_right, camera_up) = camera.billboard_axes();

        let mut pass = PipelineStateGuard::capture(ctx);
        begin_pass(&mut *pass, output)?;
        pass.set_depth(true, DepthFunc::Less, false);
        pass.set_cull(None, Winding::Ccw);

        for (handle, emitter) in self.emitters.iter_mut() {
            let Some(shader) = emitter.gpu.live_shader(&*pass) else { continue };
            bind_emitter_uniforms(&mut *pass, handle, emitter, shader);
            pass.use_shader(shader);
            pass.set_blend(emitter.params().blend_mode.state());

            if emitter.uses_mesh() {
                pass.set_depth_write(true);
                pass.set_cull(Some(CullFace::Back), Winding::Ccw);
                draw_mesh_particles(&mut *pass, handle, emitter, view_proj);
                pass.set_depth_write(false);
                pass.set_cull(None, Winding::Ccw);
                pass.set_blend(BlendState::ALPHA);
                continue;
            }

            pass.set_depth_write(false);
            pass.set_cull(None, Winding::Ccw);
            let Some(quad) = emitter.gpu.quad else {
                pass.set_blend(BlendState::ALPHA);
                continue;
            };
            let instances = build_instances_3d(emitter.particles());
            if instances.is_empty() {
                pass.set_blend(BlendState::ALPHA);
                continue;
            }
            pass.set_uniform(shader, "u_view_proj", UniformValue::Mat4(view_proj));
            pass.set_uniform(shader, "u_camera_right", UniformValue::Vec3(camera_right));
            pass.set_uniform(shader, "u_camera_up", UniformValue::Vec3(camera_up));
            let submitted = pass.draw_quad_instanced(quad, bytemuck::cast_slice(&instances), instances.len() as u32);
            report_draw_failure(handle, submitted);
            pass.set_blend(BlendState::ALPHA);
        }

        pass.unbind_framebuffer();
        Ok(())
    }
}

/// One instanced draw per sub-mesh. A model or sub-mesh that went away is skipped silently.
fn draw_mesh_particles(
    ctx: &mut dyn RenderContext,
    handle: EmitterHandle,
    emitter: &Emitter<Space3D>,
    view_proj: Mat4,
) {
    let Some(model) = emitter.gpu.model else { return };
    let Some(meshes) = ctx.model_meshes(model) else {
        trace!("[vfx] emitter {handle}: model {} is gone, skipping", model.0);
        return;
    };
    for draw in &emitter.gpu.mesh_draws {
        let Some(mesh) = meshes.get(draw.mesh_index) else { continue };
        if !mesh.uploaded || mesh.index_count == 0 {
            continue;
        }
        let instances = build_mesh_instances(emitter.particles(), view_proj, mesh.transform);
        if instances.is_empty() {
            continue;
        }
        let submitted = ctx.draw_mesh_instanced(draw.id, bytemuck::cast_slice(&instances), instances.len() as u32);
        if let Err(err) = submitted {
            trace!("[vfx] emitter {handle}: skipped mesh {}: {err}", draw.mesh_index);
        }
    }
}

/// Binds the output, fits the viewport to it and clears to transparent, leaving the caller's
/// clear color untouched.
fn begin_pass(ctx: &mut dyn RenderContext, output: Output) -> VfxResult<()> {
    ctx.bind_framebuffer(output.framebuffer)?;
    ctx.set_viewport(Viewport::from_size(output.size.round().as_uvec2()));
    clear_transparent(ctx);
    Ok(())
}

fn clear_transparent(ctx: &mut dyn RenderContext) {
    let previous = ctx.clear_color();
    ctx.set_clear_color(Vec4::ZERO);
    ctx.clear();
    ctx.set_clear_color(previous);
}

fn bind_emitter_uniforms<S: ParticleSpace>(
    ctx: &mut dyn RenderContext,
    handle: EmitterHandle,
    emitter: &mut Emitter<S>,
    shader: ShaderId,
) {
    let texture = emitter.params().texture.map(|texture| (texture, ctx.texture_unit(texture)));
    let mut uniforms = ShaderUniforms::new(ctx, shader);
    match texture {
        Some((_, Some(unit))) => {
            uniforms.set("u_texture", UniformValue::Texture(unit));
            uniforms.set_int("u_has_texture", 1);
        }
        Some((texture, None)) => {
            trace!("[vfx] emitter {handle}: texture {} is stale, drawing untextured", texture.0);
            uniforms.set_int("u_has_texture", 0);
        }
        None => uniforms.set_int("u_has_texture", 0),
    }
    uniforms.set_int("u_additive", i32::from(emitter.params().blend_mode == BlendMode::Additive));
    emitter.uniform_tracks().apply(&mut uniforms, emitter.uniform_time());
    emitter.run_uniform_callback(&mut uniforms);
}

fn report_draw_failure(handle: EmitterHandle, result: VfxResult<()>) {
    if let Err(err) = result {
        warn!("[vfx] emitter {handle}: draw failed: {err}");
    }
}

fn window_size(ctx: &dyn RenderContext, window: WindowId) -> VfxResult<UVec2> {
    ctx.window_size(window).ok_or_else(|| VfxError::not_found(format!("window {}", window.0)))
}

fn sizes_differ(a: Vec2, b: Vec2) -> bool {
    (a.x - b.x).abs() > RESIZE_TOLERANCE || (a.y - b.y).abs() > RESIZE_TOLERANCE
}
