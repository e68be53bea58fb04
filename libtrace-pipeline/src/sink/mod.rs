//! Sink drivers: the downstream ends that pull a pipeline.
pub mod export;
pub mod render;

pub use export::{export, export_async, Export};
pub use render::{render, render_async, Render};
