//! # mediastack-renderer
//!
//! The serialization boundary between the stack model and the host: the
//! typed docker compose document, Tera templates for systemd mount units,
//! and the default stack manifest.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mediastack_renderer::{ComposeFile, Renderer};
//! use mediastack_core::ResolvedService;
//!
//! fn render_all(services: &[ResolvedService]) {
//!     let compose = ComposeFile::build("mediastack", services);
//!     if let Ok(yaml) = compose.to_yaml() {
//!         println!("{yaml}");
//!     }
//!     if let Ok(renderer) = Renderer::new() {
//!         let _ = renderer.default_stack(&Default::default());
//!     }
//! }
//! ```

pub mod compose;
pub mod context;
pub mod engine;
pub mod error;

pub use compose::{ComposeFile, ComposeService, HASH_LABEL, PROJECT_LABEL};
pub use context::{unit_name_for, DefaultStackCtx};
pub use engine::{RenderedFile, Renderer, TemplateKind};
pub use error::RenderError;
