//! In-memory [`RenderContext`] that records every draw instead of rasterizing.
//!
//! Used by the integration tests and the `vfx_soak` tool. Resources live in hash maps keyed by
//! their ids; each draw captures the bound target, active shader uniforms, the packed instance
//! bytes and the pipeline state at submission time.

use super::{
    FramebufferId, MeshDrawId, ModelId, PipelineState, QuadDesc, QuadId, QuadKind, RenderContext, ShaderId,
    SubMesh, TextureId, UniformValue, WindowId,
};
use crate::camera3d::Camera3D;
use crate::error::{VfxError, VfxResult};
use crate::renderer::CameraId;
use glam::{UVec2, Vec2, Vec4};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawTarget {
    Window,
    Framebuffer(FramebufferId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Quad { quad: QuadId, kind: QuadKind },
    Mesh { draw: MeshDrawId, model: ModelId, mesh_index: usize, index_count: u32 },
    Composite { window: WindowId, texture: u32 },
}

#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub target: DrawTarget,
    pub call: DrawCall,
    pub shader: Option<ShaderId>,
    pub instance_count: u32,
    pub instance_bytes: Vec<u8>,
    pub uniforms: HashMap<String, UniformValue>,
    pub state: PipelineState,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    /// Decodes the packed instance buffer.
    pub fn instances<T: bytemuck::Pod>(&self) -> Vec<T> {
        let stride = std::mem::size_of::<T>();
        if stride == 0 {
            return Vec::new();
        }
        self.instance_bytes.chunks_exact(stride).map(bytemuck::pod_read_unaligned::<T>).collect()
    }
}

#[derive(Debug, Clone)]
struct HeadlessFramebuffer {
    size: Vec2,
    texture: u32,
    clears: u32,
    contents: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
struct HeadlessShader {
    vertex_path: String,
    fragment_path: String,
    uniforms: HashMap<String, UniformValue>,
}

#[derive(Debug, Clone)]
struct HeadlessWindow {
    size: UVec2,
    delta_time: f32,
    can_composite: bool,
}

#[derive(Debug, Clone, Copy)]
struct HeadlessMeshDraw {
    model: ModelId,
    mesh_index: usize,
    max_instances: u32,
}

pub struct HeadlessContext {
    next_id: u32,
    state: PipelineState,
    clear_color: Vec4,
    bound: DrawTarget,
    active_shader: Option<ShaderId>,
    framebuffers: HashMap<FramebufferId, HeadlessFramebuffer>,
    shaders: HashMap<ShaderId, HeadlessShader>,
    textures: HashMap<TextureId, u32>,
    models: HashMap<ModelId, Vec<SubMesh>>,
    windows: HashMap<WindowId, HeadlessWindow>,
    cameras: HashMap<CameraId, Camera3D>,
    quads: HashMap<QuadId, QuadDesc>,
    mesh_draws: HashMap<MeshDrawId, HeadlessMeshDraw>,
    failing_shader_paths: HashSet<String>,
    fail_framebuffers: bool,
    fail_quads: bool,
    draws: Vec<DrawRecord>,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            state: PipelineState::default(),
            clear_color: Vec4::new(0.1, 0.1, 0.1, 1.0),
            bound: DrawTarget::Window,
            active_shader: None,
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            textures: HashMap::new(),
            models: HashMap::new(),
            windows: HashMap::new(),
            cameras: HashMap::new(),
            quads: HashMap::new(),
            mesh_draws: HashMap::new(),
            failing_shader_paths: HashSet::new(),
            fail_framebuffers: false,
            fail_quads: false,
            draws: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn create_window(&mut self, size: UVec2) -> WindowId {
        let id = WindowId(self.allocate_id());
        self.windows.insert(id, HeadlessWindow { size, delta_time: 1.0 / 60.0, can_composite: true });
        id
    }

    pub fn set_window_size(&mut self, window: WindowId, size: UVec2) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.size = size;
        }
    }

    pub fn set_window_delta_time(&mut self, window: WindowId, delta_time: f32) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.delta_time = delta_time;
        }
    }

    /// Simulates a window whose composite shader failed to load.
    pub fn set_window_can_composite(&mut self, window: WindowId, can_composite: bool) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.can_composite = can_composite;
        }
    }

    pub fn destroy_window(&mut self, window: WindowId) {
        self.windows.remove(&window);
    }

    pub fn create_texture(&mut self) -> TextureId {
        let id = self.allocate_id();
        self.textures.insert(TextureId(id), id);
        TextureId(id)
    }

    pub fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    pub fn create_model(&mut self, meshes: Vec<SubMesh>) -> ModelId {
        let id = ModelId(self.allocate_id());
        self.models.insert(id, meshes);
        id
    }

    pub fn destroy_model(&mut self, model: ModelId) {
        self.models.remove(&model);
    }

    pub fn create_camera(&mut self, camera: Camera3D) -> CameraId {
        let id = CameraId(self.allocate_id());
        self.cameras.insert(id, camera);
        id
    }

    pub fn destroy_camera(&mut self, camera: CameraId) {
        self.cameras.remove(&camera);
    }

    /// Any later `load_shader` naming `path` fails as if compilation broke.
    pub fn fail_shader_path(&mut self, path: &str) {
        self.failing_shader_paths.insert(path.to_string());
    }

    pub fn fail_framebuffers(&mut self, fail: bool) {
        self.fail_framebuffers = fail;
    }

    pub fn fail_quads(&mut self, fail: bool) {
        self.fail_quads = fail;
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_draw_log(&mut self) {
        self.draws.clear();
        for framebuffer in self.framebuffers.values_mut() {
            framebuffer.contents.clear();
        }
    }

    /// Draws that landed in `framebuffer` since its last clear.
    pub fn framebuffer_contents(&self, framebuffer: FramebufferId) -> Vec<&DrawRecord> {
        self.framebuffers
            .get(&framebuffer)
            .map(|fb| fb.contents.iter().filter_map(|&index| self.draws.get(index)).collect())
            .unwrap_or_default()
    }

    pub fn framebuffer_clear_count(&self, framebuffer: FramebufferId) -> u32 {
        self.framebuffers.get(&framebuffer).map(|fb| fb.clears).unwrap_or(0)
    }

    pub fn bound_target(&self) -> DrawTarget {
        self.bound
    }

    pub fn uniform(&self, shader: ShaderId, name: &str) -> Option<UniformValue> {
        self.shaders.get(&shader).and_then(|entry| entry.uniforms.get(name).copied())
    }

    pub fn shader_paths(&self, shader: ShaderId) -> Option<(&str, &str)> {
        self.shaders.get(&shader).map(|entry| (entry.vertex_path.as_str(), entry.fragment_path.as_str()))
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_quads(&self) -> usize {
        self.quads.len()
    }

    pub fn live_mesh_draws(&self) -> usize {
        self.mesh_draws.len()
    }

    fn record(&mut self, call: DrawCall, instances: &[u8], count: u32) {
        let uniforms = self
            .active_shader
            .and_then(|shader| self.shaders.get(&shader))
            .map(|entry| entry.uniforms.clone())
            .unwrap_or_default();
        let index = self.draws.len();
        self.draws.push(DrawRecord {
            target: self.bound,
            call,
            shader: self.active_shader,
            instance_count: count,
            instance_bytes: instances.to_vec(),
            uniforms,
            state: self.state,
        });
        if let DrawTarget::Framebuffer(id) = self.bound {
            if let Some(framebuffer) = self.framebuffers.get_mut(&id) {
                framebuffer.contents.push(index);
            }
        }
    }

    fn check_instances(&self, stride: u32, max_instances: u32, instances: &[u8], count: u32) -> VfxResult<()> {
        if count > max_instances {
            return Err(VfxError::capacity(format!("{count} instances exceed buffer of {max_instances}")));
        }
        if stride > 0 && instances.len() != stride as usize * count as usize {
            return Err(VfxError::invalid(format!(
                "instance data is {} bytes, expected {} x {stride}",
                instances.len(),
                count
            )));
        }
        Ok(())
    }
}

fn valid_size(size: Vec2) -> bool {
    size.is_finite() && size.x >= 1.0 && size.y >= 1.0
}

impl RenderContext for HeadlessContext {
    fn create_framebuffer(&mut self, size: Vec2) -> VfxResult<FramebufferId> {
        if self.fail_framebuffers || !valid_size(size) {
            return Err(VfxError::backend(format!("framebuffer {size} is incomplete")));
        }
        let id = self.allocate_id();
        self.framebuffers
            .insert(FramebufferId(id), HeadlessFramebuffer { size, texture: id, clears: 0, contents: Vec::new() });
        Ok(FramebufferId(id))
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferId, size: Vec2) -> VfxResult<()> {
        if !valid_size(size) {
            return Err(VfxError::backend(format!("framebuffer {size} is incomplete")));
        }
        let entry = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| VfxError::not_found(format!("framebuffer {}", framebuffer.0)))?;
        entry.size = size;
        Ok(())
    }

    fn framebuffer_size(&self, framebuffer: FramebufferId) -> Option<Vec2> {
        self.framebuffers.get(&framebuffer).map(|fb| fb.size)
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<u32> {
        self.framebuffers.get(&framebuffer).map(|fb| fb.texture)
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> VfxResult<()> {
        if !self.framebuffers.contains_key(&framebuffer) {
            return Err(VfxError::not_found(format!("framebuffer {}", framebuffer.0)));
        }
        self.bound = DrawTarget::Framebuffer(framebuffer);
        Ok(())
    }

    fn unbind_framebuffer(&mut self) {
        self.bound = DrawTarget::Window;
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.bound == DrawTarget::Framebuffer(framebuffer) {
            self.bound = DrawTarget::Window;
        }
    }

    fn load_shader(&mut self, vertex_path: &str, fragment_path: &str) -> VfxResult<ShaderId> {
        if vertex_path.is_empty() || fragment_path.is_empty() {
            return Err(VfxError::invalid("shader paths must not be empty"));
        }
        for path in [vertex_path, fragment_path] {
            if self.failing_shader_paths.contains(path) {
                return Err(VfxError::backend(format!("failed to compile {path}")));
            }
        }
        let id = ShaderId(self.allocate_id());
        self.shaders.insert(
            id,
            HeadlessShader {
                vertex_path: vertex_path.to_string(),
                fragment_path: fragment_path.to_string(),
                uniforms: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn shader_exists(&self, shader: ShaderId) -> bool {
        self.shaders.contains_key(&shader)
    }

    fn use_shader(&mut self, shader: ShaderId) {
        if self.shaders.contains_key(&shader) {
            self.active_shader = Some(shader);
        }
    }

    fn set_uniform(&mut self, shader: ShaderId, name: &str, value: UniformValue) {
        if let Some(entry) = self.shaders.get_mut(&shader) {
            entry.uniforms.insert(name.to_string(), value);
        }
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
        if self.active_shader == Some(shader) {
            self.active_shader = None;
        }
    }

    fn texture_unit(&self, texture: TextureId) -> Option<u32> {
        self.textures.get(&texture).copied()
    }

    fn model_meshes(&self, model: ModelId) -> Option<Vec<SubMesh>> {
        self.models.get(&model).cloned()
    }

    fn window_size(&self, window: WindowId) -> Option<UVec2> {
        self.windows.get(&window).map(|w| w.size)
    }

    fn window_delta_time(&self, window: WindowId) -> Option<f32> {
        self.windows.get(&window).map(|w| w.delta_time)
    }

    fn camera(&self, camera: CameraId) -> Option<Camera3D> {
        self.cameras.get(&camera).cloned()
    }

    fn pipeline_state(&self) -> PipelineState {
        self.state
    }

    fn apply_pipeline_state(&mut self, state: &PipelineState) {
        self.state = *state;
    }

    fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    fn clear(&mut self) {
        if let DrawTarget::Framebuffer(id) = self.bound {
            if let Some(framebuffer) = self.framebuffers.get_mut(&id) {
                framebuffer.clears += 1;
                framebuffer.contents.clear();
            }
        }
    }

    fn create_quad(&mut self, desc: QuadDesc) -> VfxResult<QuadId> {
        if self.fail_quads {
            return Err(VfxError::out_of_memory("instance buffer allocation failed"));
        }
        let id = QuadId(self.allocate_id());
        self.quads.insert(id, desc);
        Ok(id)
    }

    fn destroy_quad(&mut self, quad: QuadId) {
        self.quads.remove(&quad);
    }

    fn create_mesh_draw(&mut self, model: ModelId, mesh_index: usize, max_instances: u32) -> VfxResult<MeshDrawId> {
        let meshes = self.models.get(&model).ok_or_else(|| VfxError::not_found(format!("model {}", model.0)))?;
        let mesh = meshes
            .get(mesh_index)
            .ok_or_else(|| VfxError::not_found(format!("mesh {mesh_index} of model {}", model.0)))?;
        if !mesh.uploaded {
            return Err(VfxError::backend(format!("mesh {mesh_index} of model {} has no GPU buffers", model.0)));
        }
        if self.fail_quads {
            return Err(VfxError::out_of_memory("instance buffer allocation failed"));
        }
        let id = MeshDrawId(self.allocate_id());
        self.mesh_draws.insert(id, HeadlessMeshDraw { model, mesh_index, max_instances });
        Ok(id)
    }

    fn destroy_mesh_draw(&mut self, draw: MeshDrawId) {
        self.mesh_draws.remove(&draw);
    }

    fn draw_quad_instanced(&mut self, quad: QuadId, instances: &[u8], count: u32) -> VfxResult<()> {
        let desc = *self.quads.get(&quad).ok_or_else(|| VfxError::not_found(format!("quad {}", quad.0)))?;
        self.check_instances(desc.instance_stride, desc.max_instances, instances, count)?;
        self.record(DrawCall::Quad { quad, kind: desc.kind }, instances, count);
        Ok(())
    }

    fn draw_mesh_instanced(&mut self, draw: MeshDrawId, instances: &[u8], count: u32) -> VfxResult<()> {
        let entry =
            *self.mesh_draws.get(&draw).ok_or_else(|| VfxError::not_found(format!("mesh draw {}", draw.0)))?;
        let index_count = self
            .models
            .get(&entry.model)
            .and_then(|meshes| meshes.get(entry.mesh_index))
            .map(|mesh| mesh.index_count)
            .ok_or_else(|| VfxError::not_found(format!("model {}", entry.model.0)))?;
        self.check_instances(0, entry.max_instances, instances, count)?;
        self.record(
            DrawCall::Mesh { draw, model: entry.model, mesh_index: entry.mesh_index, index_count },
            instances,
            count,
        );
        Ok(())
    }

    fn composite_to_window(&mut self, window: WindowId, texture: u32) -> VfxResult<()> {
        let entry = self.windows.get(&window).ok_or_else(|| VfxError::not_found(format!("window {}", window.0)))?;
        if !entry.can_composite {
            return Err(VfxError::backend(format!("window {} has no composite shader", window.0)));
        }
        self.record(DrawCall::Composite { window, texture }, &[], 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_discards_previous_contents() {
        let mut ctx = HeadlessContext::new();
        let fb = ctx.create_framebuffer(Vec2::new(64.0, 64.0)).unwrap();
        let quad = ctx
            .create_quad(QuadDesc { kind: QuadKind::Flat2D, instance_stride: 4, max_instances: 8 })
            .unwrap();
        ctx.bind_framebuffer(fb).unwrap();
        ctx.draw_quad_instanced(quad, &[0; 8], 2).unwrap();
        assert_eq!(ctx.framebuffer_contents(fb).len(), 1);
        ctx.clear();
        assert!(ctx.framebuffer_contents(fb).is_empty());
        assert_eq!(ctx.framebuffer_clear_count(fb), 1);
    }

    #[test]
    fn oversized_instance_upload_is_rejected() {
        let mut ctx = HeadlessContext::new();
        let quad = ctx
            .create_quad(QuadDesc { kind: QuadKind::Billboard3D, instance_stride: 4, max_instances: 1 })
            .unwrap();
        let err = ctx.draw_quad_instanced(quad, &[0; 8], 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CapacityExceeded);
        assert!(ctx.draws().is_empty());
    }

    #[test]
    fn failing_shader_paths_report_backend_failure() {
        let mut ctx = HeadlessContext::new();
        ctx.fail_shader_path("broken.frag");
        let err = ctx.load_shader("ok.vert", "broken.frag").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BackendFailure);
        assert_eq!(ctx.live_shaders(), 0);
    }
}
