//! # render-browser
//!
//! Drives one Chrome page for capture: launches the browser, turns the
//! protocol's event stream into session state, and keeps an injection
//! script running in the page.
//!
//! - [`session::RenderSession`] owns one run and its lifecycle
//! - [`dispatch::EventDispatcher`] routes parsed [`envelope`]s to
//!   [`capture`], [`inject`] and [`console`]
//! - [`writer::FrameWriter`] persists frames off the dispatch path
//! - [`cdp`] is the WebSocket transport behind the [`transport`] traits

#![deny(unsafe_code)]

pub mod capture;
pub mod cdp;
pub mod chrome;
pub mod clock;
pub mod console;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod inject;
pub mod script;
pub mod session;
pub mod state;
pub mod testing;
pub mod transport;
pub mod types;
pub mod writer;

pub use cdp::CdpLauncher;
pub use error::BrowserError;
pub use session::RenderSession;
pub use transport::{BrowserLauncher, DebugCallback, PageTarget};
pub use types::{DoneReason, Frame, Lifecycle, SessionSpec};
