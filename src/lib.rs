//! Clayo chat widget engine
//!
//! An embeddable customer-support chat widget: it boots once per host page,
//! creates a backend chat session lazily, streams assistant replies over SSE
//! and paints them into the page incrementally.
//!
//! # Architecture
//!
//! - **Loader/Guard**: merges host config over defaults, validates it, and
//!   installs exactly one widget per page
//! - **Render Engine**: pure HTML templating from config, UI state and messages
//! - **Session Manager**: one lazily created, deduplicated session per page
//! - **Streaming Pipeline**: send, consume the SSE reply, patch the bubble per chunk
//!
//! # Modules
//!
//! - [`loader`]: host page model and the idempotent `load`
//! - [`widget`]: controller and the public [`WidgetHandle`]
//! - [`render`]: widget markup
//! - [`surface`]: the DOM seam ([`Document`], [`TerminalSurface`])
//! - [`session`]: session creation and caching
//! - [`pipeline`]: send/stream status machine
//! - [`sse`]: incremental SSE frame decoder
//! - [`transport`]: the network seam and its HTTP implementation
//! - [`devserver`]: axum reference backend

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_errors_doc)]

pub mod analytics;
pub mod config;
pub mod devserver;
pub mod error;
pub mod loader;
pub mod message;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod sse;
pub mod surface;
pub mod transport;
pub mod widget;

pub use config::{EndpointStyle, Position, WidgetConfig};
pub use error::{ConfigError, Result, WidgetError};
pub use loader::{HostPage, load};
pub use message::{Message, Sender};
pub use pipeline::PipelineStatus;
pub use render::UiState;
pub use surface::{Document, Surface, TerminalSurface};
pub use transport::{ChatTransport, HttpTransport};
pub use widget::WidgetHandle;
