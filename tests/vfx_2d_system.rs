use glam::{UVec2, Vec2};
use kestrel_vfx::renderer::headless::{DrawCall, DrawTarget, HeadlessContext};
use kestrel_vfx::renderer::{BlendState, RenderContext};
use kestrel_vfx::vfx::{BillboardInstance2D, Space2D};
use kestrel_vfx::{EmitterParams, ErrorKind, VfxParams, VfxSystem2D};

fn quiet_params() -> EmitterParams<Space2D> {
    EmitterParams { start_active: false, ..Default::default() }
}

fn setup() -> (HeadlessContext, kestrel_vfx::renderer::WindowId, VfxSystem2D) {
    let mut ctx = HeadlessContext::new();
    let window = ctx.create_window(UVec2::new(320, 240));
    let system = VfxSystem2D::new(VfxParams::default()).expect("default params are valid");
    (ctx, window, system)
}

#[test]
fn burst_raises_alive_diagnostic_exactly() {
    let (mut ctx, _window, mut system) = setup();
    let handle = system
        .add_emitter(&mut ctx, EmitterParams { max_particles: 50, ..quiet_params() })
        .expect("emitter");
    assert_eq!(system.diagnostics().alive_particles, 0);

    let spawned = system.burst(handle, 20).unwrap();
    assert_eq!(spawned, 20);
    let diagnostics = system.diagnostics();
    assert_eq!(diagnostics.alive_particles, 20, "burst of 20 into an empty pool of 50");
    assert_eq!(diagnostics.spawned_particles, 20);
    assert_eq!(diagnostics.emitter_count, 1);
    system.destroy(&mut ctx);
}

#[test]
fn burst_stops_at_capacity_and_zero_uses_configured_count() {
    let (mut ctx, _window, mut system) = setup();
    let handle = system
        .add_emitter(&mut ctx, EmitterParams { max_particles: 10, burst_count: 7, ..quiet_params() })
        .unwrap();
    assert_eq!(system.burst(handle, 0).unwrap(), 7);
    assert_eq!(system.burst(handle, 0).unwrap(), 3, "only three slots remain");
    assert_eq!(system.emitter(handle).unwrap().alive_count(), 10);
    assert_eq!(system.diagnostics().spawned_particles, 10, "failed spawns are not counted");
    system.destroy(&mut ctx);
}

#[test]
fn stopped_emitter_lets_particles_age_out() {
    let (mut ctx, _window, mut system) = setup();
    let handle = system
        .add_emitter(&mut ctx, EmitterParams { lifetime_min: 0.5, lifetime_max: 0.5, ..Default::default() })
        .unwrap();
    system.stop(handle).unwrap();
    system.burst(handle, 3).unwrap();

    system.tick(0.2);
    system.tick(0.2);
    assert_eq!(system.diagnostics().alive_particles, 3, "stop only gates new spawns");
    system.tick(0.2);
    let diagnostics = system.diagnostics();
    assert_eq!(diagnostics.alive_particles, 0);
    assert_eq!(diagnostics.expired_particles, 3);
    assert_eq!(diagnostics.spawned_particles, 3, "a stopped emitter spawns nothing while ticking");
    system.destroy(&mut ctx);
}

#[test]
fn removed_emitter_handles_stay_stale_after_slot_reuse() {
    let (mut ctx, _window, mut system) = setup();
    let first = system.add_emitter(&mut ctx, quiet_params()).unwrap();
    system.remove_emitter(&mut ctx, first).unwrap();
    let second = system.add_emitter(&mut ctx, quiet_params()).unwrap();
    assert_eq!(first.index(), second.index(), "slot is recycled");
    assert_ne!(first, second);

    assert_eq!(system.start(first).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(system.remove_emitter(&mut ctx, first).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(system.start(second).is_ok());
    assert_eq!(ctx.live_shaders(), 1, "removing an emitter frees its shader");
    system.destroy(&mut ctx);
}

#[test]
fn tick_window_uses_the_window_delta() {
    let (mut ctx, window, mut system) = setup();
    let handle = system.add_emitter(&mut ctx, EmitterParams { spawn_rate: 20.0, ..Default::default() }).unwrap();
    ctx.set_window_delta_time(window, 0.1);
    system.tick_window(&ctx, window).unwrap();
    assert_eq!(system.emitter(handle).unwrap().alive_count(), 2);
    assert!((system.emitter(handle).unwrap().last_tick_dt() - 0.1).abs() < 1e-6);

    ctx.destroy_window(window);
    assert_eq!(system.tick_window(&ctx, window).unwrap_err().kind(), ErrorKind::NotFound);
    system.destroy(&mut ctx);
}

#[test]
fn render_twice_replaces_previous_contents() {
    let (mut ctx, window, mut system) = setup();
    let handle = system.add_emitter(&mut ctx, quiet_params()).unwrap();
    system.burst(handle, 5).unwrap();

    system.render(&mut ctx, window).expect("first render");
    system.burst(handle, 2).unwrap();
    system.render(&mut ctx, window).expect("second render without draw");

    let framebuffer = system.framebuffer().unwrap();
    assert_eq!(ctx.framebuffer_clear_count(framebuffer), 2);
    let contents = ctx.framebuffer_contents(framebuffer);
    assert_eq!(contents.len(), 1, "only the second render's draw survives its clear");
    assert_eq!(contents[0].instance_count, 7);
    let instances = contents[0].instances::<BillboardInstance2D>();
    assert_eq!(instances.len(), 7);
    assert!(matches!(contents[0].call, DrawCall::Quad { .. }));
    assert_eq!(ctx.bound_target(), DrawTarget::Window, "render unbinds its framebuffer");
    system.destroy(&mut ctx);
}

#[test]
fn empty_emitters_issue_no_draws() {
    let (mut ctx, window, mut system) = setup();
    system.add_emitter(&mut ctx, quiet_params()).unwrap();
    system.render(&mut ctx, window).unwrap();
    let framebuffer = system.framebuffer().unwrap();
    assert!(ctx.framebuffer_contents(framebuffer).is_empty());
    assert_eq!(ctx.framebuffer_clear_count(framebuffer), 1);
    system.destroy(&mut ctx);
}

#[test]
fn draw_composites_the_rendered_output() {
    let (mut ctx, window, mut system) = setup();
    assert_eq!(system.draw(&mut ctx, window).unwrap_err().kind(), ErrorKind::NotFound, "draw needs a render");
    assert_eq!(system.framebuffer().unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(system.texture_id(&ctx).unwrap_err().kind(), ErrorKind::NotFound);

    let handle = system.add_emitter(&mut ctx, quiet_params()).unwrap();
    system.burst(handle, 1).unwrap();
    system.render(&mut ctx, window).unwrap();
    let before = ctx.pipeline_state();
    system.draw(&mut ctx, window).unwrap();

    let texture = system.texture_id(&ctx).unwrap();
    let composite = ctx.draws().last().expect("composite recorded");
    assert_eq!(composite.call, DrawCall::Composite { window, texture });
    assert_eq!(composite.target, DrawTarget::Window);
    assert_eq!(composite.state.blend, BlendState::ALPHA);
    assert!(!composite.state.depth_test);
    assert_eq!(composite.state.viewport.width, 320);
    assert_eq!(ctx.pipeline_state(), before, "draw restores pipeline state");
    system.destroy(&mut ctx);
}

#[test]
fn composite_failure_is_a_backend_error() {
    let (mut ctx, window, mut system) = setup();
    system.render(&mut ctx, window).unwrap();
    ctx.set_window_can_composite(window, false);
    let before = ctx.pipeline_state();
    assert_eq!(system.draw(&mut ctx, window).unwrap_err().kind(), ErrorKind::BackendFailure);
    assert_eq!(ctx.pipeline_state(), before);
    system.destroy(&mut ctx);
}

#[test]
fn output_follows_window_size() {
    let (mut ctx, window, mut system) = setup();
    system.render(&mut ctx, window).unwrap();
    let framebuffer = system.framebuffer().unwrap();
    assert_eq!(ctx.framebuffer_size(framebuffer), Some(Vec2::new(320.0, 240.0)));

    ctx.set_window_size(window, UVec2::new(640, 480));
    system.render(&mut ctx, window).unwrap();
    assert_eq!(system.framebuffer().unwrap(), framebuffer, "resize keeps the framebuffer");
    assert_eq!(ctx.framebuffer_size(framebuffer), Some(Vec2::new(640.0, 480.0)));

    ctx.set_window_size(window, UVec2::new(0, 480));
    assert_eq!(system.render(&mut ctx, window).unwrap_err().kind(), ErrorKind::BackendFailure);
    system.destroy(&mut ctx);
}

#[test]
fn fixed_render_size_ignores_window() {
    let mut ctx = HeadlessContext::new();
    let window = ctx.create_window(UVec2::new(800, 600));
    let params =
        VfxParams { render_size: Vec2::new(128.0, 64.0), auto_resize_with_window: false, ..Default::default() };
    let mut system = VfxSystem2D::new(params).unwrap();
    system.render(&mut ctx, window).unwrap();
    let framebuffer = system.framebuffer().unwrap();
    assert_eq!(ctx.framebuffer_size(framebuffer), Some(Vec2::new(128.0, 64.0)));
    system.destroy(&mut ctx);
}

#[test]
fn framebuffer_failure_is_reported() {
    let (mut ctx, window, mut system) = setup();
    ctx.fail_framebuffers(true);
    assert_eq!(system.render(&mut ctx, window).unwrap_err().kind(), ErrorKind::BackendFailure);
    assert_eq!(ctx.live_framebuffers(), 0);
    system.destroy(&mut ctx);
}

#[test]
fn destroy_releases_every_gpu_object() {
    let (mut ctx, window, mut system) = setup();
    for _ in 0..3 {
        system.add_emitter(&mut ctx, quiet_params()).unwrap();
    }
    system.render(&mut ctx, window).unwrap();
    assert_eq!(ctx.live_shaders(), 3);
    assert_eq!(ctx.live_quads(), 3);
    assert_eq!(ctx.live_framebuffers(), 1);

    system.destroy(&mut ctx);
    assert_eq!(ctx.live_shaders(), 0);
    assert_eq!(ctx.live_quads(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
}

#[test]
fn emitter_limit_is_capacity_exceeded() {
    let mut ctx = HeadlessContext::new();
    let mut system = VfxSystem2D::new(VfxParams { max_emitters: 2, ..Default::default() }).unwrap();
    system.add_emitter(&mut ctx, quiet_params()).unwrap();
    system.add_emitter(&mut ctx, quiet_params()).unwrap();
    let err = system.add_emitter(&mut ctx, quiet_params()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(ctx.live_shaders(), 2, "a rejected emitter allocates nothing");
    system.destroy(&mut ctx);
}
