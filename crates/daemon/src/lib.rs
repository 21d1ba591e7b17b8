//! # agentmux daemon
//!
//! The runtime multiplexer: one long-lived daemon owns every agent
//! terminal window, keeps an authoritative screen per window with a
//! built-in VT emulation engine, and synchronizes display clients over a
//! local push channel with a polling fallback.
//!
//! ## Modules
//!
//! - [`vt`]: from-scratch terminal emulation (parser + screen grid)
//! - [`runtime`]: window registry, PTY lifecycle, ring buffers
//! - [`stream`]: push server (frames, patches, coalescing, backpressure)
//! - [`control`]: synchronous JSON control surface
//! - [`config`], [`paths`], [`pidfile`], [`orchestrator`]: daemon plumbing

pub mod config;
pub mod control;
pub mod orchestrator;
pub mod paths;
pub mod pidfile;
pub mod runtime;
pub mod stream;
pub mod vt;

pub use config::Config;
pub use control::{ControlServer, ControlSettings};
pub use orchestrator::Daemon;
pub use runtime::{
    build_runtime, RuntimeBackend, RuntimeError, RuntimeSettings, StartSpec, WindowRegistry,
    WindowRuntime,
};
pub use stream::{StreamServer, StreamSettings};
pub use vt::Emulator;

// Re-export the shared contracts for consumers of this crate.
pub use protocol;
