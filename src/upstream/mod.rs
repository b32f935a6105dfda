//! Upstream model, parsing and rendering.
//!
//! # Data Flow
//! ```text
//! registry blob ("<host> <port>" lines)
//!     → parser.rs (validate, canonicalize)
//!     → RegistrationSet (sorted, deduplicated)
//!     → render.rs (one upstream block per application)
//!     → EffectiveConfiguration (blocks in application order)
//! ```
//!
//! # Design Decisions
//! - Everything here is pure: no network, no filesystem
//! - Canonical ordering makes byte-identical input render byte-identical output
//! - A malformed record rejects the whole blob, never part of it

pub mod endpoint;
pub mod parser;
pub mod render;

pub use endpoint::{Application, BackendEndpoint, RegistrationSet};
pub use parser::{parse, MalformedRecord};
pub use render::{EffectiveConfiguration, Renderer, UpstreamBlock};
