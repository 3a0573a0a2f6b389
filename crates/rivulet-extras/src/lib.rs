#![forbid(unsafe_code)]

//! Convenience operators over the rivulet core.
//!
//! Everything here is an external collaborator: pure composition of the
//! public core API (`fold`, `collect`, internal broadcast events, scope
//! workers). Nothing reaches into the engine.

mod debounce;
mod throttle;
mod window;

pub use debounce::debounced;
pub use throttle::throttled;
pub use window::windowed;
