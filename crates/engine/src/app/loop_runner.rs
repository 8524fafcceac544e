use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pixels::Error as PixelsError;
use thiserror::Error;
use tracing::{info, warn};
use winit::dpi::LogicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use crate::{resolve_app_paths, StartupError};

use super::input::{ActionStates, InputAction, InputSnapshot};
use super::math::Vec2;
use super::rendering::Renderer;
use super::save::{save_path, write_save};
use super::scene::{Scene, SceneCommand, SceneWorld};
use super::stack::{
    load_stack_library, LoadError, LoadProgressHandle, StackAssetSpec, StackLibrary,
};

const LOAD_PROGRESS_LOG_INTERVAL: Duration = Duration::from_millis(250);
const FRAME_STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Sleeps this many milliseconds at the top of every frame when set; a
/// debugging lever for exercising the tick clamp and backlog warning.
const SLOW_FRAME_ENV_VAR: &str = "STACKVALE_DEBUG_SLOW_FRAME_MS";

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub max_render_fps: Option<u32>,
    pub autosave_interval: Option<Duration>,
    pub stack_assets: Vec<StackAssetSpec>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window_title: "Stackvale".to_string(),
            window_width: 1280,
            window_height: 720,
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            max_render_fps: None,
            autosave_interval: Some(Duration::from_secs(120)),
            stack_assets: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to load stack assets: {0}")]
    AssetLoad(#[from] LoadError),
    #[error("failed to create event loop: {0}")]
    CreateEventLoop(#[source] EventLoopError),
    #[error("failed to create application window: {0}")]
    CreateWindow(#[source] OsError),
    #[error("failed to initialize renderer: {0}")]
    CreateRenderer(#[source] PixelsError),
    #[error("event loop failed: {0}")]
    EventLoopRun(#[source] EventLoopError),
}

pub fn run_app(config: LoopConfig, mut scene: Box<dyn Scene>) -> Result<(), AppError> {
    let app_paths = resolve_app_paths()?;
    info!(
        root = %app_paths.root.display(),
        assets_dir = %app_paths.assets_dir.display(),
        saves_dir = %app_paths.saves_dir.display(),
        "startup"
    );

    let stacks = load_assets_with_progress(
        app_paths.assets_dir.join("stacks"),
        config.stack_assets.clone(),
    )?;

    let event_loop = EventLoop::new().map_err(AppError::CreateEventLoop)?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.window_title.clone())
            .with_inner_size(LogicalSize::new(
                config.window_width as f64,
                config.window_height as f64,
            ))
            .build(&event_loop)
            .map_err(AppError::CreateWindow)?,
    );
    let mut renderer =
        Renderer::new(Arc::clone(&window), stacks).map_err(AppError::CreateRenderer)?;

    event_loop.set_control_flow(ControlFlow::Poll);

    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);
    let fixed_dt_seconds = fixed_dt.as_secs_f32();
    let effective_render_cap = normalize_render_fps_cap(config.max_render_fps);
    let render_frame_target = target_frame_duration(effective_render_cap);
    let autosave_interval = config.autosave_interval.filter(|value| !value.is_zero());
    let saves_dir = app_paths.saves_dir.clone();

    let mut world = SceneWorld::default();
    let mut input_collector = InputCollector::new(config.window_width, config.window_height);
    scene.load(&mut world);
    world.apply_pending();
    info!(entity_count = world.entity_count(), "scene_loaded");

    info!(
        target_tps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        render_fps_cap = %format_render_cap(effective_render_cap),
        autosave_interval_s = autosave_interval.map(|value| value.as_secs()).unwrap_or(0),
        "loop_config"
    );

    let slow_frame_delay = debug_slow_frame_delay();
    if let Some(delay) = slow_frame_delay {
        warn!(
            delay_ms = delay.as_millis() as u64,
            "debug_slow_frame_injection_enabled"
        );
    }

    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut last_present_instant = Instant::now();
    let mut last_autosave_instant = Instant::now();
    let mut stats = FrameStats::default();
    let mut last_stats_instant = Instant::now();
    let mut unloaded = false;

    let window_for_loop = Arc::clone(&window);
    event_loop
        .run(move |event, window_target| match event {
            Event::WindowEvent { window_id, event } if window_id == window_for_loop.id() => {
                match event {
                    WindowEvent::CloseRequested => {
                        input_collector.mark_quit_requested();
                        info!(reason = "window_close", "shutdown_requested");
                        window_target.exit();
                    }
                    WindowEvent::Resized(new_size) => {
                        input_collector.set_window_size(new_size.width, new_size.height);
                        if let Err(error) = renderer.resize(new_size.width, new_size.height) {
                            warn!(error = %error, "renderer_resize_failed");
                            window_target.exit();
                        }
                    }
                    WindowEvent::ScaleFactorChanged { .. } => {
                        let size = window_for_loop.inner_size();
                        input_collector.set_window_size(size.width, size.height);
                        if let Err(error) = renderer.resize(size.width, size.height) {
                            warn!(error = %error, "renderer_resize_failed");
                            window_target.exit();
                        }
                    }
                    WindowEvent::CursorMoved { position, .. } => {
                        input_collector
                            .set_cursor_position_px(position.x as f32, position.y as f32);
                    }
                    WindowEvent::CursorLeft { .. } => {
                        input_collector.clear_cursor_position();
                    }
                    WindowEvent::MouseInput { state, button, .. } => {
                        input_collector.handle_mouse_input(button, state);
                    }
                    WindowEvent::MouseWheel { delta, .. } => {
                        input_collector.handle_mouse_wheel(delta);
                    }
                    WindowEvent::KeyboardInput { event, .. } => {
                        input_collector.handle_keyboard_input(&event);
                        if input_collector.quit_requested {
                            info!(reason = "escape_key", "shutdown_requested");
                            window_target.exit();
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        if let Some(delay) = slow_frame_delay {
                            thread::sleep(delay);
                        }
                        let now = Instant::now();
                        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
                        last_frame_instant = now;

                        let clamped_frame_dt = raw_frame_dt.min(max_frame_delta);
                        accumulator = accumulator.saturating_add(clamped_frame_dt);

                        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
                        for _ in 0..step_plan.ticks_to_run {
                            let input_snapshot = input_collector.snapshot_for_tick();
                            let command = scene.update(fixed_dt_seconds, &input_snapshot, &mut world);
                            world.update_bodies();
                            world.resolve_collisions();
                            world.apply_pending();
                            if command == SceneCommand::Quit {
                                info!(reason = "scene_command", "shutdown_requested");
                                window_target.exit();
                            }
                        }
                        accumulator = step_plan.remaining_accumulator;

                        if step_plan.dropped_backlog > Duration::ZERO {
                            warn!(
                                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                                max_ticks_per_frame, "sim_clamp_triggered"
                            );
                        }

                        if let Some(interval) = autosave_interval {
                            if now.saturating_duration_since(last_autosave_instant) >= interval {
                                last_autosave_instant = now;
                                persist_scene_state(&saves_dir, scene.as_ref(), &world, "autosave");
                            }
                        }

                        // Single sleep point for render pacing.
                        let elapsed_since_last_present =
                            Instant::now().saturating_duration_since(last_present_instant);
                        let cap_sleep =
                            compute_cap_sleep(elapsed_since_last_present, render_frame_target);
                        if cap_sleep > Duration::ZERO {
                            thread::sleep(cap_sleep);
                        }

                        if let Err(error) = renderer.render_world(&world) {
                            warn!(error = %error, "renderer_draw_failed");
                            window_target.exit();
                        }
                        last_present_instant = Instant::now();

                        stats.record(raw_frame_dt, step_plan.ticks_to_run);
                        let stats_elapsed =
                            last_present_instant.saturating_duration_since(last_stats_instant);
                        if stats_elapsed >= FRAME_STATS_LOG_INTERVAL {
                            stats.log_and_reset(stats_elapsed);
                            last_stats_instant = last_present_instant;
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => {
                window_for_loop.request_redraw();
            }
            Event::LoopExiting => {
                if !unloaded {
                    unloaded = true;
                    persist_scene_state(&saves_dir, scene.as_ref(), &world, "shutdown");
                    scene.unload(&mut world);
                    world.apply_pending();
                    info!("shutdown");
                }
            }
            _ => {}
        })
        .map_err(AppError::EventLoopRun)
}

/// Runs the worker-pool asset load on its own thread while this thread
/// logs polled progress, so a long load is visible rather than silent.
fn load_assets_with_progress(
    stacks_dir: PathBuf,
    specs: Vec<StackAssetSpec>,
) -> Result<StackLibrary, LoadError> {
    let progress = LoadProgressHandle::default();
    let mut outcome: Option<Result<StackLibrary, LoadError>> = None;

    thread::scope(|scope| {
        let loader_progress = progress.clone();
        let handle =
            scope.spawn(move || load_stack_library(&stacks_dir, &specs, &loader_progress));

        while !progress.is_finished() {
            thread::sleep(LOAD_PROGRESS_LOG_INTERVAL);
            info!(
                loaded = progress.completed(),
                total = progress.total(),
                "load_progress"
            );
        }
        outcome = Some(handle.join().unwrap_or(Err(LoadError::WorkerPanicked)));
    });

    outcome.unwrap_or(Err(LoadError::WorkerPanicked))
}

fn persist_scene_state(
    saves_dir: &std::path::Path,
    scene: &dyn Scene,
    world: &SceneWorld,
    reason: &'static str,
) {
    let Some(state) = scene.capture_save(world) else {
        return;
    };
    let path = save_path(saves_dir, state.seed);
    match write_save(&path, &state) {
        Ok(()) => info!(reason, path = %path.display(), "save_persisted"),
        Err(error) => warn!(reason, error = %error, "save_persist_failed"),
    }
}

/// Rolling frame/tick counters flushed to the log on an interval.
#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    ticks: u64,
    total_frame_time: Duration,
    worst_frame_time: Duration,
}

impl FrameStats {
    fn record(&mut self, frame_time: Duration, ticks: u32) {
        self.frames += 1;
        self.ticks += u64::from(ticks);
        self.total_frame_time += frame_time;
        self.worst_frame_time = self.worst_frame_time.max(frame_time);
    }

    fn log_and_reset(&mut self, window: Duration) {
        if self.frames > 0 {
            let avg_frame_ms =
                self.total_frame_time.as_secs_f64() * 1000.0 / self.frames as f64;
            let fps = self.frames as f64 / window.as_secs_f64().max(f64::EPSILON);
            info!(
                frames = self.frames,
                ticks = self.ticks,
                fps = format!("{fps:.1}").as_str(),
                avg_frame_ms = format!("{avg_frame_ms:.2}").as_str(),
                worst_frame_ms = self.worst_frame_time.as_millis() as u64,
                "frame_stats"
            );
        }
        *self = Self::default();
    }
}

fn debug_slow_frame_delay() -> Option<Duration> {
    let raw = std::env::var(SLOW_FRAME_ENV_VAR).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!(raw = raw.as_str(), "invalid_slow_frame_env_ignored");
            None
        }
    }
}

/// Edge-triggered key/button tracking: one press edge per physical press,
/// regardless of how many ticks elapse while held.
#[derive(Debug, Clone, Copy, Default)]
struct PressEdge {
    is_down: bool,
    pressed_edge: bool,
}

impl PressEdge {
    fn observe(&mut self, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if !self.is_down {
                    self.pressed_edge = true;
                }
                self.is_down = true;
            }
            ElementState::Released => self.is_down = false,
        }
    }

    fn take(&mut self) -> bool {
        let was_pressed = self.pressed_edge;
        self.pressed_edge = false;
        was_pressed
    }
}

#[derive(Debug, Default)]
struct InputCollector {
    quit_requested: bool,
    action_states: ActionStates,
    cursor_position_px: Option<Vec2>,
    left_click: PressEdge,
    right_click: PressEdge,
    interact: PressEdge,
    save_key: PressEdge,
    load_key: PressEdge,
    zoom_in_key: PressEdge,
    zoom_out_key: PressEdge,
    pending_zoom_steps: i32,
    window_width: u32,
    window_height: u32,
}

impl InputCollector {
    fn new(window_width: u32, window_height: u32) -> Self {
        Self {
            window_width,
            window_height,
            ..Self::default()
        }
    }

    fn mark_quit_requested(&mut self) {
        self.quit_requested = true;
    }

    fn snapshot_for_tick(&mut self) -> InputSnapshot {
        if self.zoom_in_key.take() {
            self.pending_zoom_steps = self.pending_zoom_steps.saturating_add(1);
        }
        if self.zoom_out_key.take() {
            self.pending_zoom_steps = self.pending_zoom_steps.saturating_sub(1);
        }
        let snapshot = InputSnapshot::new(
            self.quit_requested,
            self.action_states,
            self.cursor_position_px,
            self.left_click.take(),
            self.right_click.take(),
            self.interact.take(),
            self.save_key.take(),
            self.load_key.take(),
            self.pending_zoom_steps,
            self.window_width,
            self.window_height,
        );
        self.pending_zoom_steps = 0;
        snapshot
    }

    fn handle_keyboard_input(&mut self, key_event: &winit::event::KeyEvent) {
        let is_pressed = key_event.state == ElementState::Pressed;
        match key_event.physical_key {
            PhysicalKey::Code(KeyCode::KeyW) | PhysicalKey::Code(KeyCode::ArrowUp) => {
                self.action_states.set(InputAction::MoveUp, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyS) | PhysicalKey::Code(KeyCode::ArrowDown) => {
                self.action_states.set(InputAction::MoveDown, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyA) | PhysicalKey::Code(KeyCode::ArrowLeft) => {
                self.action_states.set(InputAction::MoveLeft, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyD) | PhysicalKey::Code(KeyCode::ArrowRight) => {
                self.action_states.set(InputAction::MoveRight, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyQ) => {
                self.action_states
                    .set(InputAction::RotateCameraLeft, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyE) => {
                self.action_states
                    .set(InputAction::RotateCameraRight, is_pressed);
            }
            PhysicalKey::Code(KeyCode::Space) => {
                self.interact.observe(key_event.state);
            }
            PhysicalKey::Code(KeyCode::F5) => {
                self.save_key.observe(key_event.state);
            }
            PhysicalKey::Code(KeyCode::F9) => {
                self.load_key.observe(key_event.state);
            }
            PhysicalKey::Code(KeyCode::Equal) | PhysicalKey::Code(KeyCode::NumpadAdd) => {
                self.zoom_in_key.observe(key_event.state);
            }
            PhysicalKey::Code(KeyCode::Minus) | PhysicalKey::Code(KeyCode::NumpadSubtract) => {
                self.zoom_out_key.observe(key_event.state);
            }
            PhysicalKey::Code(KeyCode::Escape) => {
                self.action_states.set(InputAction::Quit, is_pressed);
                if is_pressed {
                    self.mark_quit_requested();
                }
            }
            _ => {}
        }
    }

    fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_width = width;
        self.window_height = height;
    }

    fn set_cursor_position_px(&mut self, x: f32, y: f32) {
        self.cursor_position_px = Some(Vec2::new(x, y));
    }

    fn clear_cursor_position(&mut self) {
        self.cursor_position_px = None;
    }

    fn handle_mouse_wheel(&mut self, delta: MouseScrollDelta) {
        let steps = zoom_steps_from_scroll_delta(delta);
        self.pending_zoom_steps = self.pending_zoom_steps.saturating_add(steps);
    }

    fn handle_mouse_input(&mut self, button: MouseButton, state: ElementState) {
        match button {
            MouseButton::Left => self.left_click.observe(state),
            MouseButton::Right => self.right_click.observe(state),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn normalize_render_fps_cap(cap: Option<u32>) -> Option<u32> {
    cap.filter(|value| *value > 0)
}

fn target_frame_duration(max_render_fps: Option<u32>) -> Option<Duration> {
    max_render_fps.map(|fps| Duration::from_secs_f64(1.0 / fps as f64))
}

fn compute_cap_sleep(elapsed: Duration, target: Option<Duration>) -> Duration {
    match target {
        Some(frame_target) if elapsed < frame_target => frame_target - elapsed,
        _ => Duration::ZERO,
    }
}

fn format_render_cap(cap: Option<u32>) -> String {
    match cap {
        Some(value) => value.to_string(),
        None => "off".to_string(),
    }
}

fn zoom_steps_from_scroll_delta(delta: MouseScrollDelta) -> i32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y.round() as i32,
        MouseScrollDelta::PixelDelta(position) => {
            if position.y > 0.0 {
                1
            } else if position.y < 0.0 {
                -1
            } else {
                0
            }
        }
    }
}
