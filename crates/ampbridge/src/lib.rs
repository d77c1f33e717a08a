//! Shared-memory buffer bridge to an embedded HTML transformer.
//!
//! The transformer is a black box `transform(url, html) -> html` running
//! inside an embedded VM with its own linear, growable memory. This crate
//! implements the host side of the cross-boundary protocol:
//!
//! - **Framing** ([`codec`]): payloads travel as a 4-byte big-endian
//!   length prefix followed by UTF-8 text, written into fixed buffers.
//! - **Relocatable memory** ([`memory`], [`buffer`]): the module may grow
//!   its memory at any point, relocating it out from under every
//!   outstanding host reference. Views carry a generation tag and are
//!   re-validated on every access; a stale view is released back to the
//!   module and replaced before it is touched again.
//! - **Call synchronization** ([`call`]): the module signals completion
//!   through a callback with no completion token, so calls are strictly
//!   serialized and adapted into a single suspension point per call.
//! - **Sessions** ([`session`]): one module instance plus its three
//!   buffer handles, exposing the sole public operation
//!   [`Session::transform`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ampbridge::{Session, SessionConfig};
//! use ampbridge_test::{FakeMemory, FakeModule, ModuleBehavior};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ampbridge::BridgeError> {
//! let config = SessionConfig::default();
//! let memory = FakeMemory::for_config(&config);
//! let module = Arc::new(FakeModule::new(memory, ModuleBehavior::Echo));
//! let mut session = Session::new(module, config)?;
//!
//! let out = session.transform("https://example.com/", "<html amp></html>").await?;
//! assert_eq!(out, "<html amp></html>");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod buffer;
pub mod call;
pub mod codec;
pub mod error;
pub mod memory;
pub mod module;
pub mod session;

pub use buffer::SharedBuffer;
pub use call::{CallState, CallSynchronizer, Completion};
pub use error::{BridgeError, BridgeResult};
pub use memory::{BufferRole, MemoryView, SharedSegment, ViewSource};
pub use module::TransformModule;
pub use session::{Session, SessionConfig};
