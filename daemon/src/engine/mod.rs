//! The wallpaper engine: state, draw policy and the lifecycle that drives
//! the render thread

mod burn_in;
mod driver;
mod fetch;
mod lifecycle;
mod policy;
mod state;

pub use driver::{Driver, EngineHandle};
pub use fetch::LocalFileResolver;
pub use lifecycle::LifecycleEvent;
