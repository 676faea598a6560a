//! Livedoc render sessions
//!
//! A diagram renderer is expensive to start, so livedoc keeps one alive per
//! working directory and talks to it over its standard streams:
//!
//! ```text
//! request\n  ──stdin──▶  renderer  ──stdout──▶  <?xml …?><svg>…</svg><?xml …?>…
//! ```
//!
//! Replies carry no length prefix. [`ReplyFraming`] recovers their boundaries
//! from the byte stream however the OS chunks it, and [`RenderSession`] hands
//! each complete reply to the oldest waiting request.
//!
//! When a renderer dies, its partial output and unanswered requests are
//! parked in a [`LeftoverStore`]. The next session for the same directory
//! picks them up before it spawns, so those requests are answered by the
//! new process's first replies. This is best-effort: nothing checks that
//! the new output lines up with the old queue.
//!
//! # Example
//!
//! ```rust,no_run
//! use livedoc_session::{RenderCommand, RenderSessionManager};
//! use std::path::Path;
//!
//! # async fn demo() -> livedoc_session::Result<()> {
//! let manager = RenderSessionManager::new(
//!     RenderCommand::new("java").with_args(["-jar", "plantuml.jar", "-pipe", "-tsvg"]),
//! );
//! let svg = manager.render(Path::new("docs"), "@startuml\nA -> B\n@enduml").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod framing;
pub mod manager;
pub mod session;

pub use error::{Result, SessionError};
pub use framing::ReplyFraming;
pub use manager::RenderSessionManager;
pub use session::{Leftover, LeftoverStore, RenderCommand, RenderSession, SessionState, Ticket};
