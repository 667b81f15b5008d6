mod bus;
mod combat;
mod dialogue;
mod entity;
mod forms;
mod motion;
mod nav;
mod orchestrator;
mod scene_impl;
mod simulation;
mod status;
mod types;

#[cfg(test)]
mod tests;

pub(crate) use scene_impl::FeywildScene;
pub(crate) use types::SimConfig;
