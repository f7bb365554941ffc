pub mod ai;
pub mod physics;
