use std::process::ExitCode;
use std::time::Duration;

use engine::{run_app, Frame, FrameSource, InputAction, InputSnapshot};
use tracing::info;

use super::bootstrap::AppWiring;

const HERMIT_TALK_FRAME: u32 = 20;
const HERMIT_ASK_FRAME: u32 = 35;
const HERMIT_FOCUS_FRAME: u32 = 50;
const HERMIT_FAREWELL_FRAME: u32 = 65;
const MINK_FORM_FRAME: u32 = 90;
const WALK_START_FRAME: u32 = 120;
const WALK_END_FRAME: u32 = 300;
const ATTACK_FRAMES: [u32; 3] = [320, 380, 440];
const DEFEND_FRAME: u32 = 500;
const PAUSE_FRAMES: [u32; 2] = [540, 570];

/// Headless stand-in for a window: a fixed frame cadence with a short
/// scripted play session. The walk crosses the meadow's thorn strip and
/// spring, and the session pauses briefly near the end.
pub(crate) struct ScriptedFrames {
    frame_delta: Duration,
    frame: u32,
    total: u32,
}

impl ScriptedFrames {
    pub(crate) fn new(frame_delta: Duration, total: u32) -> Self {
        Self {
            frame_delta,
            frame: 0,
            total,
        }
    }

    fn input_for(frame: u32) -> InputSnapshot {
        let mut input = InputSnapshot::empty();
        if (WALK_START_FRAME..WALK_END_FRAME).contains(&frame) {
            input = input
                .with_action_down(InputAction::MoveRight, true)
                .with_action_down(InputAction::MoveDown, true)
                .with_action_down(InputAction::Run, frame >= WALK_START_FRAME + 60);
        }
        match frame {
            HERMIT_TALK_FRAME | HERMIT_ASK_FRAME | HERMIT_FAREWELL_FRAME => {
                input.with_confirm_pressed(true)
            }
            HERMIT_FOCUS_FRAME => input.with_focus_steps(1),
            MINK_FORM_FRAME => input.with_body_form_key(Some(2)),
            DEFEND_FRAME => input.with_defend_pressed(true),
            frame if PAUSE_FRAMES.contains(&frame) => input.with_pause_pressed(true),
            frame if ATTACK_FRAMES.contains(&frame) => input.with_attack_pressed(true),
            _ => input,
        }
    }
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.frame >= self.total {
            return None;
        }
        let input = Self::input_for(self.frame);
        self.frame += 1;
        Some(Frame {
            delta: self.frame_delta,
            input,
        })
    }
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        mut scene,
        demo_frames,
    } = app;
    let mut frames = ScriptedFrames::new(config.fixed_dt(), demo_frames);
    let summary = run_app(&config, &mut scene, &mut frames);
    info!(
        frames = summary.frames,
        ticks = summary.ticks,
        dropped_backlog_ms = summary.dropped_backlog.as_millis() as u64,
        quit_requested = summary.quit_requested,
        "demo_finished"
    );
    ExitCode::SUCCESS
}
