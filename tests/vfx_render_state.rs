use glam::{UVec2, Vec4};
use kestrel_vfx::renderer::headless::HeadlessContext;
use kestrel_vfx::renderer::{
    BlendState, CullFace, DepthFunc, PipelineState, RenderContext, ShaderUniforms, UniformValue, Viewport, WindowId,
    Winding,
};
use kestrel_vfx::vfx::{BlendMode, Space2D, SHADER_2D_FRAGMENT, SHADER_2D_VERTEX};
use kestrel_vfx::{CurveMode, EmitterParams, ErrorKind, VfxParams, VfxSystem2D};
use std::cell::Cell;
use std::rc::Rc;

fn setup() -> (HeadlessContext, WindowId, VfxSystem2D) {
    let mut ctx = HeadlessContext::new();
    let window = ctx.create_window(UVec2::new(256, 256));
    let system = VfxSystem2D::new(VfxParams::default()).unwrap();
    (ctx, window, system)
}

fn emitter_params(blend_mode: BlendMode) -> EmitterParams<Space2D> {
    EmitterParams { blend_mode, start_active: false, ..Default::default() }
}

#[test]
fn mixed_blend_modes_leave_alpha_blending_behind() {
    let (mut ctx, window, mut system) = setup();
    ctx.set_blend(BlendState::ALPHA);
    let additive = system.add_emitter(&mut ctx, emitter_params(BlendMode::Additive)).unwrap();
    let alpha = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap();
    system.burst(additive, 4).unwrap();
    system.burst(alpha, 4).unwrap();

    system.render(&mut ctx, window).unwrap();

    assert_eq!(ctx.pipeline_state().blend, BlendState::ALPHA, "render must not leak additive blending");
    let contents = ctx.framebuffer_contents(system.framebuffer().unwrap());
    assert_eq!(contents.len(), 2);
    assert_eq!(contents[0].state.blend, BlendState::ADDITIVE);
    assert_eq!(contents[0].uniform("u_additive"), Some(UniformValue::Int(1)));
    assert_eq!(contents[1].state.blend, BlendState::ALPHA);
    assert_eq!(contents[1].uniform("u_additive"), Some(UniformValue::Int(0)));
    system.destroy(&mut ctx);
}

#[test]
fn render_restores_arbitrary_caller_state() {
    let (mut ctx, window, mut system) = setup();
    let caller = PipelineState {
        blend: BlendState::DISABLED,
        depth_test: true,
        depth_func: DepthFunc::GreaterEqual,
        depth_write: true,
        cull: Some(CullFace::Front),
        front_face: Winding::Cw,
        viewport: Viewport { x: 10, y: 20, width: 30, height: 40 },
    };
    ctx.apply_pipeline_state(&caller);
    let clear_color = Vec4::new(0.2, 0.4, 0.6, 1.0);
    ctx.set_clear_color(clear_color);

    let handle = system.add_emitter(&mut ctx, emitter_params(BlendMode::Additive)).unwrap();
    system.burst(handle, 3).unwrap();
    system.render(&mut ctx, window).unwrap();

    assert_eq!(ctx.pipeline_state(), caller);
    assert_eq!(ctx.clear_color(), clear_color, "transparent clear must not leak");
    let contents = ctx.framebuffer_contents(system.framebuffer().unwrap());
    let draw = contents[0];
    assert!(!draw.state.depth_test, "2D particles draw without depth");
    assert_eq!(draw.state.cull, None);
    assert_eq!(draw.state.viewport, Viewport::from_size(UVec2::new(256, 256)));
    system.destroy(&mut ctx);
}

#[test]
fn destroyed_texture_renders_untextured() {
    let (mut ctx, window, mut system) = setup();
    let texture = ctx.create_texture();
    let handle = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap();
    system.set_texture(&ctx, handle, Some(texture)).unwrap();
    system.burst(handle, 2).unwrap();

    system.render(&mut ctx, window).unwrap();
    let first = ctx.draws().last().unwrap();
    assert_eq!(first.uniform("u_has_texture"), Some(UniformValue::Int(1)));
    assert!(matches!(first.uniform("u_texture"), Some(UniformValue::Texture(_))));

    ctx.destroy_texture(texture);
    system.render(&mut ctx, window).expect("stale texture degrades instead of failing");
    let second = ctx.draws().last().unwrap();
    assert_eq!(second.uniform("u_has_texture"), Some(UniformValue::Int(0)));
    assert_eq!(second.instance_count, 2);
    system.destroy(&mut ctx);
}

#[test]
fn texture_binding_checks_existence() {
    let (mut ctx, _window, mut system) = setup();
    let handle = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap();
    let texture = ctx.create_texture();
    ctx.destroy_texture(texture);
    assert_eq!(system.set_texture(&ctx, handle, Some(texture)).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(system.set_texture(&ctx, handle, None).is_ok());
    assert_eq!(system.emitter(handle).unwrap().params().texture, None);
    system.destroy(&mut ctx);
}

#[test]
fn failed_shader_swap_keeps_previous_shader() {
    let (mut ctx, window, mut system) = setup();
    let handle = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap();
    system.burst(handle, 1).unwrap();
    ctx.fail_shader_path("shaders/broken_frag.glsl");

    let err = system
        .set_shader(&mut ctx, handle, Some("shaders/custom_vert.glsl"), Some("shaders/broken_frag.glsl"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailure);
    assert_eq!(ctx.live_shaders(), 1);

    system.render(&mut ctx, window).unwrap();
    let shader = ctx.draws().last().and_then(|draw| draw.shader).expect("emitter still draws");
    assert_eq!(ctx.shader_paths(shader), Some((SHADER_2D_VERTEX, SHADER_2D_FRAGMENT)));

    system
        .set_shader(&mut ctx, handle, Some("shaders/custom_vert.glsl"), Some("shaders/custom_frag.glsl"))
        .unwrap();
    assert_eq!(ctx.live_shaders(), 1, "old shader released after a successful swap");
    system.render(&mut ctx, window).unwrap();
    let shader = ctx.draws().last().and_then(|draw| draw.shader).unwrap();
    assert_eq!(ctx.shader_paths(shader), Some(("shaders/custom_vert.glsl", "shaders/custom_frag.glsl")));

    let err = system.set_shader(&mut ctx, handle, Some("shaders/only_vert.glsl"), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    system.destroy(&mut ctx);
}

#[test]
fn half_specified_shader_paths_are_rejected() {
    let (mut ctx, _window, mut system) = setup();
    let params = EmitterParams::<Space2D> { vertex_shader_path: Some("custom.vert".into()), ..Default::default() };
    assert_eq!(system.add_emitter(&mut ctx, params).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(ctx.live_shaders(), 0);
    system.destroy(&mut ctx);
}

#[test]
fn failed_construction_rolls_back_gpu_objects() {
    let (mut ctx, _window, mut system) = setup();
    ctx.fail_quads(true);
    let err = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert_eq!(ctx.live_shaders(), 0, "shader created before the quad failure is destroyed");
    assert_eq!(ctx.live_quads(), 0);
    assert_eq!(system.emitter_count(), 0);

    ctx.fail_shader_path("shaders/bad_vert.glsl");
    ctx.fail_quads(false);
    let params = EmitterParams::<Space2D> {
        vertex_shader_path: Some("shaders/bad_vert.glsl".into()),
        fragment_shader_path: Some("shaders/bad_frag.glsl".into()),
        ..Default::default()
    };
    assert_eq!(system.add_emitter(&mut ctx, params).unwrap_err().kind(), ErrorKind::BackendFailure);
    assert_eq!(ctx.live_quads(), 0);
    system.destroy(&mut ctx);
}

#[test]
fn uniform_tracks_and_callback_reach_the_shader() {
    let (mut ctx, window, mut system) = setup();
    let handle = system.add_emitter(&mut ctx, emitter_params(BlendMode::Alpha)).unwrap();
    system.add_uniform_key(handle, "u_glow", CurveMode::Linear, 0.0, 0.0_f32).unwrap();
    system.add_uniform_key(handle, "u_glow", CurveMode::Linear, 1.0, 10.0_f32).unwrap();
    let seen_dt = Rc::new(Cell::new(0.0_f32));
    let seen = Rc::clone(&seen_dt);
    system
        .set_uniform_callback(
            handle,
            Some(Box::new(move |_, uniforms: &mut ShaderUniforms<'_>, dt: f32| {
                seen.set(dt);
                uniforms.set_float("u_custom", 4.0);
                uniforms.set_float("u_glow", 99.0);
            })),
        )
        .unwrap();
    system.burst(handle, 1).unwrap();
    system.tick(0.25);
    system.render(&mut ctx, window).unwrap();

    let draw = ctx.draws().last().unwrap();
    assert_eq!(draw.uniform("u_custom"), Some(UniformValue::Float(4.0)));
    assert_eq!(draw.uniform("u_glow"), Some(UniformValue::Float(99.0)), "callback runs after uniform tracks");
    assert!((seen_dt.get() - 0.25).abs() < 1e-6);

    system.set_uniform_callback(handle, None).unwrap();
    system.render(&mut ctx, window).unwrap();
    let draw = ctx.draws().last().unwrap();
    assert_eq!(draw.uniform("u_glow"), Some(UniformValue::Float(2.5)), "track sampled at wrapped uniform time");

    system.clear_uniform_track(handle, "u_glow").unwrap();
    assert_eq!(system.clear_uniform_track(handle, "u_glow").unwrap_err().kind(), ErrorKind::NotFound);
    system.destroy(&mut ctx);
}
