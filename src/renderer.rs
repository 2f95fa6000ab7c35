//! Rendering capabilities consumed by the VFX systems.
//!
//! The systems never talk to a graphics API directly. Everything they need from the GPU, from
//! framebuffers and shaders to instanced draws and pipeline state, goes through [`RenderContext`],
//! which callers pass explicitly into every entry point that touches the GPU.

use crate::camera3d::Camera3D;
use crate::error::VfxResult;
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
use std::ops::{Deref, DerefMut};

pub mod headless;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

resource_id!(
    /// Offscreen color target owned by a VFX system.
    FramebufferId
);
resource_id!(ShaderId);
resource_id!(
    /// Borrowed texture; never created or freed by the VFX systems.
    TextureId
);
resource_id!(
    /// Borrowed model; never created or freed by the VFX systems.
    ModelId
);
resource_id!(WindowId);
resource_id!(CameraId);
resource_id!(
    /// Instanced unit quad plus its per-instance buffer.
    QuadId
);
resource_id!(
    /// Per-instance buffer bound to one sub-mesh of a model.
    MeshDrawId
);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    /// Texture unit/GPU id, as returned by [`RenderContext::texture_unit`].
    Texture(u32),
    Mat4(Mat4),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcColor,
    OneMinusSrcColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub equation: BlendEquation,
}

impl BlendState {
    pub const DISABLED: Self =
        Self { enabled: false, src: BlendFactor::One, dst: BlendFactor::Zero, equation: BlendEquation::Add };
    /// Straight alpha: `src_alpha / one_minus_src_alpha`.
    pub const ALPHA: Self = Self {
        enabled: true,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
        equation: BlendEquation::Add,
    };
    pub const ADDITIVE: Self =
        Self { enabled: true, src: BlendFactor::SrcAlpha, dst: BlendFactor::One, equation: BlendEquation::Add };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullFace {
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winding {
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn from_size(size: UVec2) -> Self {
        Self { x: 0, y: 0, width: size.x, height: size.y }
    }
}

/// Snapshot of every piece of pipeline state the VFX renderers touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub blend: BlendState,
    pub depth_test: bool,
    pub depth_func: DepthFunc,
    pub depth_write: bool,
    pub cull: Option<CullFace>,
    pub front_face: Winding,
    pub viewport: Viewport,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend: BlendState::DISABLED,
            depth_test: false,
            depth_func: DepthFunc::Less,
            depth_write: true,
            cull: None,
            front_face: Winding::Ccw,
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubMesh {
    pub index_count: u32,
    /// Mesh-local transform applied before the particle transform.
    pub transform: Mat4,
    /// False while the mesh has no GPU buffers yet.
    pub uploaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuadKind {
    Flat2D,
    Billboard3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadDesc {
    pub kind: QuadKind,
    pub instance_stride: u32,
    pub max_instances: u32,
}

/// GPU capabilities the VFX systems rely on.
pub trait RenderContext {
    fn create_framebuffer(&mut self, size: Vec2) -> VfxResult<FramebufferId>;
    fn resize_framebuffer(&mut self, framebuffer: FramebufferId, size: Vec2) -> VfxResult<()>;
    fn framebuffer_size(&self, framebuffer: FramebufferId) -> Option<Vec2>;
    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<u32>;
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> VfxResult<()>;
    /// Returns to the default (window) target.
    fn unbind_framebuffer(&mut self);
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn load_shader(&mut self, vertex_path: &str, fragment_path: &str) -> VfxResult<ShaderId>;
    fn shader_exists(&self, shader: ShaderId) -> bool;
    fn use_shader(&mut self, shader: ShaderId);
    fn set_uniform(&mut self, shader: ShaderId, name: &str, value: UniformValue);
    fn destroy_shader(&mut self, shader: ShaderId);

    fn texture_unit(&self, texture: TextureId) -> Option<u32>;
    fn model_meshes(&self, model: ModelId) -> Option<Vec<SubMesh>>;
    fn window_size(&self, window: WindowId) -> Option<UVec2>;
    fn window_delta_time(&self, window: WindowId) -> Option<f32>;
    fn camera(&self, camera: CameraId) -> Option<Camera3D>;

    fn pipeline_state(&self) -> PipelineState;
    fn apply_pipeline_state(&mut self, state: &PipelineState);
    fn clear_color(&self) -> Vec4;
    fn set_clear_color(&mut self, color: Vec4);
    /// Clears color and depth of the bound target.
    fn clear(&mut self);

    fn create_quad(&mut self, desc: QuadDesc) -> VfxResult<QuadId>;
    fn destroy_quad(&mut self, quad: QuadId);
    fn create_mesh_draw(&mut self, model: ModelId, mesh_index: usize, max_instances: u32) -> VfxResult<MeshDrawId>;
    fn destroy_mesh_draw(&mut self, draw: MeshDrawId);
    /// Uploads `count` packed instances and issues one instanced draw with the active shader.
    fn draw_quad_instanced(&mut self, quad: QuadId, instances: &[u8], count: u32) -> VfxResult<()>;
    fn draw_mesh_instanced(&mut self, draw: MeshDrawId, instances: &[u8], count: u32) -> VfxResult<()>;
    /// Draws `texture` as a full-window quad using the window's composite shader.
    fn composite_to_window(&mut self, window: WindowId, texture: u32) -> VfxResult<()>;

    fn set_blend(&mut self, blend: BlendState) {
        let mut state = self.pipeline_state();
        state.blend = blend;
        self.apply_pipeline_state(&state);
    }

    fn set_depth(&mut self, test: bool, func: DepthFunc, write: bool) {
        let mut state = self.pipeline_state();
        state.depth_test = test;
        state.depth_func = func;
        state.depth_write = write;
        self.apply_pipeline_state(&state);
    }

    fn set_depth_write(&mut self, write: bool) {
        let mut state = self.pipeline_state();
        state.depth_write = write;
        self.apply_pipeline_state(&state);
    }

    fn set_cull(&mut self, cull: Option<CullFace>, front_face: Winding) {
        let mut state = self.pipeline_state();
        state.cull = cull;
        state.front_face = front_face;
        self.apply_pipeline_state(&state);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let mut state = self.pipeline_state();
        state.viewport = viewport;
        self.apply_pipeline_state(&state);
    }
}

/// Captures pipeline state on construction and reapplies it when dropped.
///
/// Framebuffer binding and the active shader are not part of [`PipelineState`] and are not restored.
pub struct PipelineStateGuard<'a> {
    context: &'a mut dyn RenderContext,
    saved: PipelineState,
}

impl<'a> PipelineStateGuard<'a> {
    pub fn capture(context: &'a mut dyn RenderContext) -> Self {
        let saved = context.pipeline_state();
        Self { context, saved }
    }

    pub fn saved(&self) -> &PipelineState {
        &self.saved
    }
}

impl<'a> Deref for PipelineStateGuard<'a> {
    type Target = dyn RenderContext + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.context
    }
}

impl<'a> DerefMut for PipelineStateGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.context
    }
}

impl Drop for PipelineStateGuard<'_> {
    fn drop(&mut self) {
        self.context.apply_pipeline_state(&self.saved);
    }
}

/// Uniform writer scoped to one shader, handed to per-frame uniform callbacks.
pub struct ShaderUniforms<'a> {
    context: &'a mut dyn RenderContext,
    shader: ShaderId,
}

impl<'a> ShaderUniforms<'a> {
    pub fn new(context: &'a mut dyn RenderContext, shader: ShaderId) -> Self {
        Self { context, shader }
    }

    pub fn shader(&self) -> ShaderId {
        self.shader
    }

    pub fn set(&mut self, name: &str, value: UniformValue) {
        self.context.set_uniform(self.shader, name, value);
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, UniformValue::Float(value));
    }

    pub fn set_vec2(&mut self, name: &str, value: Vec2) {
        self.set(name, UniformValue::Vec2(value));
    }

    pub fn set_vec3(&mut self, name: &str, value: Vec3) {
        self.set(name, UniformValue::Vec3(value));
    }

    pub fn set_vec4(&mut self, name: &str, value: Vec4) {
        self.set(name, UniformValue::Vec4(value));
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set(name, UniformValue::Int(value));
    }

    pub fn set_mat4(&mut self, name: &str, value: Mat4) {
        self.set(name, UniformValue::Mat4(value));
    }
}

#[cfg(test)]
mod tests {
    use super::headless::HeadlessContext;
    use super::*;
    use crate::error::VfxError;

    fn touch_everything(context: &mut dyn RenderContext) -> VfxResult<()> {
        let mut guard = PipelineStateGuard::capture(context);
        guard.set_blend(BlendState::ADDITIVE);
        guard.set_depth(true, DepthFunc::Greater, false);
        guard.set_cull(Some(CullFace::Front), Winding::Cw);
        guard.set_viewport(Viewport { x: 3, y: 4, width: 5, height: 6 });
        Err(VfxError::backend("bail out mid-pass"))
    }

    #[test]
    fn guard_restores_state_on_error_path() {
        let mut context = HeadlessContext::new();
        context.set_blend(BlendState::ALPHA);
        let before = context.pipeline_state();
        assert!(touch_everything(&mut context).is_err());
        assert_eq!(context.pipeline_state(), before);
    }

    #[test]
    fn shader_uniforms_write_to_their_shader() {
        let mut context = HeadlessContext::new();
        let shader = context.load_shader("a.vert", "a.frag").unwrap();
        {
            let mut uniforms = ShaderUniforms::new(&mut context, shader);
            uniforms.set_float("u_time", 0.5);
            uniforms.set_int("u_mode", 2);
        }
        assert_eq!(context.uniform(shader, "u_time"), Some(UniformValue::Float(0.5)));
        assert_eq!(context.uniform(shader, "u_mode"), Some(UniformValue::Int(2)));
    }
}
