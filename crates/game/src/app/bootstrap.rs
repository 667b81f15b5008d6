use engine::{compile_def_database, resolve_app_paths, AppError, LoopConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::gameplay::{FeywildScene, SimConfig};

const TICKS_ENV_VAR: &str = "FEYWILD_TICKS";
const DEFAULT_DEMO_FRAMES: u32 = 600;

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) scene: FeywildScene,
    pub(crate) demo_frames: u32,
}

pub(crate) fn build_app() -> Result<AppWiring, AppError> {
    init_tracing();
    info!("=== Feywild Startup ===");

    let paths = resolve_app_paths()?;
    info!(root = %paths.root.display(), "root_resolved");
    let defs = compile_def_database(&paths.base_content_dir)?;
    info!(
        actors = defs.actor_defs().len(),
        body_forms = defs.body_forms().len(),
        "content_ready"
    );

    let scene = FeywildScene::new(defs, paths.dialogue_dir, SimConfig::default());
    Ok(AppWiring {
        config: LoopConfig::default(),
        scene,
        demo_frames: parse_demo_frames(std::env::var(TICKS_ENV_VAR).ok().as_deref()),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_demo_frames(raw: Option<&str>) -> u32 {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return DEFAULT_DEMO_FRAMES;
    };
    match raw.parse::<u32>() {
        Ok(frames) if frames > 0 => frames,
        _ => {
            warn!(
                var = TICKS_ENV_VAR,
                value = raw,
                fallback = DEFAULT_DEMO_FRAMES,
                "invalid_env_value"
            );
            DEFAULT_DEMO_FRAMES
        }
    }
}
