use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::{ContentCompileError, StartupError};

use super::metrics::MetricsWindow;
use super::{InputSnapshot, MetricsHandle, Scene, SceneCommand};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
        }
    }
}

impl LoopConfig {
    pub fn fixed_dt(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_tps.max(1) as f64)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to compile content definitions: {0}")]
    Content(#[from] ContentCompileError),
}

/// One presented frame: the wall-clock time since the previous frame and the
/// input sampled for it.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub delta: Duration,
    pub input: InputSnapshot,
}

pub trait FrameSource {
    /// `None` ends the session.
    fn next_frame(&mut self) -> Option<Frame>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub ticks: u64,
    pub dropped_backlog: Duration,
    pub quit_requested: bool,
}

pub fn run_app(
    config: &LoopConfig,
    scene: &mut dyn Scene,
    frames: &mut dyn FrameSource,
) -> LoopSummary {
    let metrics_handle = MetricsHandle::default();
    run_app_with_metrics(config, scene, frames, &metrics_handle)
}

pub fn run_app_with_metrics(
    config: &LoopConfig,
    scene: &mut dyn Scene,
    frames: &mut dyn FrameSource,
    metrics_handle: &MetricsHandle,
) -> LoopSummary {
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(1));
    let fixed_dt = config.fixed_dt();
    let fixed_dt_seconds = fixed_dt.as_secs_f32();

    info!(
        target_tps = config.target_tps.max(1),
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        "loop_config"
    );

    scene.load();

    let mut summary = LoopSummary::default();
    let mut accumulator = Duration::ZERO;
    let mut clock = Duration::ZERO;
    let mut metrics_window = MetricsWindow::new(metrics_log_interval);

    'frames: while let Some(frame) = frames.next_frame() {
        summary.frames = summary.frames.saturating_add(1);
        let clamped_frame_dt = clamp_frame_delta(frame.delta, max_frame_delta);
        accumulator = accumulator.saturating_add(clamped_frame_dt);
        clock = clock.saturating_add(frame.delta);

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for tick_index in 0..step_plan.ticks_to_run {
            let input = if tick_index == 0 {
                frame.input
            } else {
                frame.input.held_only()
            };
            let command = scene.update(fixed_dt_seconds, &input);
            summary.ticks = summary.ticks.saturating_add(1);

            if command == SceneCommand::Quit || input.quit_requested() {
                summary.quit_requested = true;
                info!(reason = "scene_quit", "shutdown_requested");
                break 'frames;
            }
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            summary.dropped_backlog = summary
                .dropped_backlog
                .saturating_add(step_plan.dropped_backlog);
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if let Some(snapshot) = metrics_window.observe(&summary, clock) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                ticks_per_frame = snapshot.ticks_per_frame,
                total_ticks = snapshot.total_ticks,
                dropped_backlog_ms = snapshot.dropped_backlog_ms,
                title = scene.debug_title().unwrap_or_default(),
                "loop_metrics"
            );
        }
    }

    scene.unload();
    info!(
        frames = summary.frames,
        ticks = summary.ticks,
        "shutdown"
    );
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}
