use super::draw::EmitterGpu;
use super::emitter::{sanitize_dt, BlendMode, Emitter, EmitterParams, ParticleCallback, UniformCallback};
use super::track::{BuiltinTarget, TrackValue};
use super::{ParticleSpace, Space2D, Space3D};
use crate::arena::{Arena, Handle};
use crate::curve::CurveMode;
use crate::error::{VfxError, VfxResult};
use crate::renderer::{FramebufferId, ModelId, RenderContext, TextureId, WindowId};
use glam::Vec2;
use log::{debug, info, warn};
use serde::Serialize;

pub const DEFAULT_MAX_EMITTERS: usize = 16;

pub type EmitterHandle = Handle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfxParams {
    pub max_emitters: usize,
    /// Fixed output size, used when `auto_resize_with_window` is off. Zero means "follow the window".
    pub render_size: Vec2,
    pub auto_resize_with_window: bool,
}

impl Default for VfxParams {
    fn default() -> Self {
        Self { max_emitters: DEFAULT_MAX_EMITTERS, render_size: Vec2::ZERO, auto_resize_with_window: true }
    }
}

impl VfxParams {
    pub fn validate(&self) -> VfxResult<()> {
        if self.max_emitters == 0 {
            return Err(VfxError::invalid("max_emitters must be at least 1"));
        }
        let size = self.render_size;
        if !size.is_finite() || size.x < 0.0 || size.y < 0.0 {
            return Err(VfxError::invalid(format!("render_size {size} must be finite and non-negative")));
        }
        if (size.x == 0.0) != (size.y == 0.0) {
            return Err(VfxError::invalid(format!("render_size {size} must be fully set or fully zero")));
        }
        Ok(())
    }

    pub(crate) fn fixed_size(&self) -> Option<Vec2> {
        let valid = self.render_size.x > 0.0 && self.render_size.y > 0.0;
        (!self.auto_resize_with_window && valid).then_some(self.render_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VfxDiagnostics {
    pub emitter_count: usize,
    pub alive_particles: usize,
    pub spawned_particles: u64,
    pub expired_particles: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Output {
    pub framebuffer: FramebufferId,
    pub size: Vec2,
}

/// A bounded set of emitters sharing one offscreen output.
///
/// GPU-facing calls take the [`RenderContext`] explicitly. Call [`VfxSystem::destroy`] with the
/// same context to release the framebuffer and every emitter's GPU objects.
pub struct VfxSystem<S: ParticleSpace> {
    params: VfxParams,
    pub(crate) emitters: Arena<Emitter<S>>,
    pub(crate) output: Option<Output>,
    spawned_particles: u64,
    expired_particles: u64,
}

pub type VfxSystem2D = VfxSystem<Space2D>;
pub type VfxSystem3D = VfxSystem<Space3D>;

impl<S: ParticleSpace> VfxSystem<S> {
    pub fn new(params: VfxParams) -> VfxResult<Self> {
        params.validate()?;
        info!("[vfx] created {} system (max {} emitters)", S::LABEL, params.max_emitters);
        Ok(Self { params, emitters: Arena::new(), output: None, spawned_particles: 0, expired_particles: 0 })
    }

    pub fn destroy(mut self, ctx: &mut dyn RenderContext) {
        for mut emitter in self.emitters.drain() {
            emitter.gpu.release(ctx);
        }
        if let Some(output) = self.output.take() {
            ctx.destroy_framebuffer(output.framebuffer);
        }
        info!("[vfx] destroyed {} system", S::LABEL);
    }

    pub fn params(&self) -> &VfxParams {
        &self.params
    }

    pub fn add_emitter(&mut self, ctx: &mut dyn RenderContext, params: EmitterParams<S>) -> VfxResult<EmitterHandle> {
        if self.emitters.len() >= self.params.max_emitters {
            return Err(VfxError::capacity(format!(
                "{} system already holds {} emitters",
                S::LABEL,
                self.params.max_emitters
            )));
        }
        let params = params.sanitized();
        if params.model.is_some() && !S::SUPPORTS_MESH {
            return Err(VfxError::invalid(format!("{} emitters cannot render models", S::LABEL)));
        }
        params.shader_paths(params.model.is_some())?;
        let handle = self.emitters.try_insert_with(|handle| {
            let mut emitter = Emitter::new(handle, params)?;
            emitter.gpu = EmitterGpu::build::<S>(ctx, emitter.params())?;
            Ok::<_, VfxError>(emitter)
        })?;
        debug!("[vfx] added {} emitter {handle}", S::LABEL);
        Ok(handle)
    }

    pub fn remove_emitter(&mut self, ctx: &mut dyn RenderContext, handle: EmitterHandle) -> VfxResult<()> {
        let mut emitter = self.emitters.remove(handle).ok_or_else(|| missing_emitter(handle))?;
        emitter.gpu.release(ctx);
        debug!("[vfx] removed {} emitter {handle}", S::LABEL);
        Ok(())
    }

    pub fn emitter(&self, handle: EmitterHandle) -> VfxResult<&Emitter<S>> {
        self.emitters.get(handle).ok_or_else(|| missing_emitter(handle))
    }

    fn emitter_mut(&mut self, handle: EmitterHandle) -> VfxResult<&mut Emitter<S>> {
        self.emitters.get_mut(handle).ok_or_else(|| missing_emitter(handle))
    }

    pub fn emitter_handles(&self) -> Vec<EmitterHandle> {
        self.emitters.iter().map(|(handle, _)| handle).collect()
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    pub fn start(&mut self, handle: EmitterHandle) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_running(true);
        Ok(())
    }

    /// Stops future spawns; live particles keep aging out.
    pub fn stop(&mut self, handle: EmitterHandle) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_running(false);
        Ok(())
    }

    /// Spawns `count` particles at once (`0` = the emitter's burst count). Returns how many fit.
    pub fn burst(&mut self, handle: EmitterHandle, count: u32) -> VfxResult<u32> {
        let spawned = self.emitter_mut(handle)?.burst(count);
        self.spawned_particles += u64::from(spawned);
        Ok(spawned)
    }

    pub fn set_texture(
        &mut self,
        ctx: &dyn RenderContext,
        handle: EmitterHandle,
        texture: Option<TextureId>,
    ) -> VfxResult<()> {
        if let Some(texture) = texture {
            if ctx.texture_unit(texture).is_none() {
                return Err(VfxError::not_found(format!("texture {}", texture.0)));
            }
        }
        self.emitter_mut(handle)?.params_mut().texture = texture;
        Ok(())
    }

    /// Hot-swaps the emitter's shader. `None` for both paths restores the defaults; if the new
    /// shader fails to load the emitter keeps drawing with the previous one.
    pub fn set_shader(
        &mut self,
        ctx: &mut dyn RenderContext,
        handle: EmitterHandle,
        vertex_path: Option<&str>,
        fragment_path: Option<&str>,
    ) -> VfxResult<()> {
        let emitter = self.emitter_mut(handle)?;
        match emitter.gpu.swap_shader::<S>(ctx, vertex_path, fragment_path) {
            Ok(_) => {
                let params = emitter.params_mut();
                params.vertex_shader_path = vertex_path.filter(|p| !p.is_empty()).map(str::to_string);
                params.fragment_shader_path = fragment_path.filter(|p| !p.is_empty()).map(str::to_string);
                Ok(())
            }
            Err(err) => {
                warn!("[vfx] shader swap for {} emitter {handle} failed, keeping previous shader: {err}", S::LABEL);
                Err(err)
            }
        }
    }

    pub fn set_blend_mode(&mut self, handle: EmitterHandle, blend_mode: BlendMode) -> VfxResult<()> {
        self.emitter_mut(handle)?.params_mut().blend_mode = blend_mode;
        Ok(())
    }

    pub fn set_spawn(
        &mut self,
        handle: EmitterHandle,
        spawn_rate: f32,
        burst_count: u32,
        lifetime_min: f32,
        lifetime_max: f32,
    ) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_spawn(spawn_rate, burst_count, lifetime_min, lifetime_max)
    }

    /// Callbacks are attached after [`VfxSystem::add_emitter`]; `None` removes the callback.
    pub fn set_particle_callback(
        &mut self,
        handle: EmitterHandle,
        callback: Option<ParticleCallback<S::Vector>>,
    ) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_particle_callback(callback);
        Ok(())
    }

    /// `None` removes the callback.
    pub fn set_uniform_callback(&mut self, handle: EmitterHandle, callback: Option<UniformCallback>) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_uniform_callback(callback);
        Ok(())
    }

    pub fn add_builtin_key<T: TrackValue>(
        &mut self,
        handle: EmitterHandle,
        target: BuiltinTarget,
        mode: CurveMode,
        t: f32,
        value: T,
    ) -> VfxResult<()> {
        self.emitter_mut(handle)?.add_builtin_key(target, mode, t, value)
    }

    /// Mutes or unmutes a built-in track without dropping its keys.
    pub fn set_builtin_track_enabled(
        &mut self,
        handle: EmitterHandle,
        target: BuiltinTarget,
        enabled: bool,
    ) -> VfxResult<()> {
        self.emitter_mut(handle)?.set_builtin_track_enabled(target, enabled);
        Ok(())
    }

    pub fn add_uniform_key<T: TrackValue>(
        &mut self,
        handle: EmitterHandle,
        uniform: &str,
        mode: CurveMode,
        t: f32,
        value: T,
    ) -> VfxResult<()> {
        self.emitter_mut(handle)?.add_uniform_key(uniform, mode, t, value)
    }

    pub fn clear_builtin_track(&mut self, handle: EmitterHandle, target: BuiltinTarget) -> VfxResult<()> {
        self.emitter_mut(handle)?.clear_builtin_track(target);
        Ok(())
    }

    pub fn clear_uniform_track(&mut self, handle: EmitterHandle, uniform: &str) -> VfxResult<()> {
        self.emitter_mut(handle)?.clear_uniform_track(uniform)
    }

    pub fn clear_tracks(&mut self, handle: EmitterHandle) -> VfxResult<()> {
        self.emitter_mut(handle)?.clear_tracks();
        Ok(())
    }

    /// Advances every emitter. `dt` is clamped to `(0, 0.25]`; non-positive or non-finite steps are ignored.
    pub fn tick(&mut self, dt: f32) {
        let dt = sanitize_dt(dt);
        if dt <= 0.0 {
            return;
        }
        for (_, emitter) in self.emitters.iter_mut() {
            let counts = emitter.tick(dt);
            self.spawned_particles += u64::from(counts.spawned);
            self.expired_particles += u64::from(counts.expired);
        }
    }

    /// Ticks with the window's last frame delta.
    pub fn tick_window(&mut self, ctx: &dyn RenderContext, window: WindowId) -> VfxResult<()> {
        let dt = ctx.window_delta_time(window).ok_or_else(|| VfxError::not_found(format!("window {}", window.0)))?;
        self.tick(dt);
        Ok(())
    }

    /// Framebuffer written by the last [`render`](VfxSystem::render).
    pub fn framebuffer(&self) -> VfxResult<FramebufferId> {
        self.output.map(|output| output.framebuffer).ok_or_else(|| VfxError::not_found("output not rendered yet"))
    }

    pub fn texture_id(&self, ctx: &dyn RenderContext) -> VfxResult<u32> {
        let framebuffer = self.framebuffer()?;
        ctx.framebuffer_texture(framebuffer)
            .ok_or_else(|| VfxError::not_found(format!("framebuffer {}", framebuffer.0)))
    }

    pub fn diagnostics(&self) -> VfxDiagnostics {
        VfxDiagnostics {
            emitter_count: self.emitters.len(),
            alive_particles: self.emitters.iter().map(|(_, emitter)| emitter.alive_count()).sum(),
            spawned_particles: self.spawned_particles,
            expired_particles: self.expired_particles,
        }
    }
}

impl VfxSystem<Space3D> {
    /// Switches an emitter between billboards (`None`) and per-particle model instances.
    /// On failure the emitter keeps its previous model and GPU objects.
    pub fn set_model(
        &mut self,
        ctx: &mut dyn RenderContext,
        handle: EmitterHandle,
        model: Option<ModelId>,
    ) -> VfxResult<()> {
        let emitter = self.emitter_mut(handle)?;
        if emitter.params().model == model {
            return Ok(());
        }
        let mut candidate = emitter.params().clone();
        candidate.model = model;
        let gpu = EmitterGpu::build::<Space3D>(ctx, &candidate)?;
        let mut previous = std::mem::replace(&mut emitter.gpu, gpu);
        previous.release(ctx);
        emitter.params_mut().model = model;
        debug!("[vfx] 3d emitter {handle} now renders {}", if model.is_some() { "meshes" } else { "billboards" });
        Ok(())
    }
}

impl<S: ParticleSpace> Drop for VfxSystem<S> {
    fn drop(&mut self) {
        if self.output.is_some() || !self.emitters.is_empty() {
            warn!(
                "[vfx] {} system dropped without destroy(); {} emitters and the output framebuffer leak GPU objects",
                S::LABEL,
                self.emitters.len()
            );
        }
    }
}

fn missing_emitter(handle: EmitterHandle) -> VfxError {
    VfxError::not_found(format!("emitter {handle}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::renderer::headless::HeadlessContext;

    #[test]
    fn params_validation() {
        assert!(VfxParams::default().validate().is_ok());
        let bad = [
            VfxParams { max_emitters: 0, ..Default::default() },
            VfxParams { render_size: Vec2::new(-1.0, 10.0), ..Default::default() },
            VfxParams { render_size: Vec2::new(0.0, 10.0), ..Default::default() },
        ];
        for params in bad {
            assert_eq!(params.validate().unwrap_err().kind(), ErrorKind::InvalidArgument, "{params:?}");
        }
        let fixed = VfxParams { render_size: Vec2::new(320.0, 200.0), auto_resize_with_window: false, ..Default::default() };
        assert_eq!(fixed.fixed_size(), Some(Vec2::new(320.0, 200.0)));
        let follow = VfxParams { render_size: Vec2::new(320.0, 200.0), ..Default::default() };
        assert_eq!(follow.fixed_size(), None);
    }

    #[test]
    fn emitter_capacity_is_enforced() {
        let mut ctx = HeadlessContext::new();
        let mut vfx = VfxSystem2D::new(VfxParams { max_emitters: 2, ..Default::default() }).unwrap();
        vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap();
        vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap();
        let err = vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(vfx.emitter_count(), 2);
        vfx.destroy(&mut ctx);
        assert_eq!(ctx.live_shaders(), 0);
        assert_eq!(ctx.live_quads(), 0);
    }

    #[test]
    fn removed_handles_go_stale() {
        let mut ctx = HeadlessContext::new();
        let mut vfx = VfxSystem2D::new(VfxParams::default()).unwrap();
        let first = vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap();
        vfx.remove_emitter(&mut ctx, first).unwrap();
        let second = vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap();
        assert_eq!(first.index(), second.index());
        assert_eq!(vfx.start(first).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(vfx.remove_emitter(&mut ctx, first).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(vfx.start(second).is_ok());
        vfx.destroy(&mut ctx);
    }

    #[test]
    fn flat_emitters_reject_models() {
        let mut ctx = HeadlessContext::new();
        let model = ctx.create_model(Vec::new());
        let mut vfx = VfxSystem2D::new(VfxParams::default()).unwrap();
        let err = vfx.add_emitter(&mut ctx, EmitterParams { model: Some(model), ..Default::default() }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(ctx.live_shaders(), 0);
        vfx.destroy(&mut ctx);
    }

    #[test]
    fn tick_ignores_bad_steps() {
        let mut ctx = HeadlessContext::new();
        let mut vfx = VfxSystem2D::new(VfxParams::default()).unwrap();
        let handle = vfx.add_emitter(&mut ctx, EmitterParams::default()).unwrap();
        for dt in [0.0, -1.0, f32::NAN, f32::NEG_INFINITY] {
            vfx.tick(dt);
        }
        assert_eq!(vfx.diagnostics().spawned_particles, 0);
        assert_eq!(vfx.emitter(handle).unwrap().last_tick_dt(), 0.0);
        vfx.tick(10.0);
        assert_eq!(vfx.emitter(handle).unwrap().last_tick_dt(), 0.25);
        // 32 particles/s for a clamped 0.25s step
        assert_eq!(vfx.diagnostics().spawned_particles, 8);
        vfx.destroy(&mut ctx);
    }
}
