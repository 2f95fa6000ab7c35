pub mod arena;
pub mod camera3d;
pub mod config;
pub mod curve;
pub mod error;
pub mod renderer;
pub mod vfx;

pub use arena::{Arena, Handle};
pub use config::{EmitterPreset, VfxConfig};
pub use curve::{Curve, CurveMode, Keyframe};
pub use error::{ErrorKind, VfxError, VfxResult};
pub use renderer::headless::HeadlessContext;
pub use renderer::RenderContext;
pub use vfx::{EmitterHandle, EmitterParams, VfxParams, VfxSystem, VfxSystem2D, VfxSystem3D};
