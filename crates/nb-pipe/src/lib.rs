//! nb-pipe: Non-blocking audio pipes
//!
//! Single-writer, single-reader frame pipes for moving PCM between
//! threads without locks. The writer paces itself with short sleeps
//! instead of parking; the reader is wait-free and safe to call from an
//! audio callback.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  write   ┌─────────────┐   read   ┌────────────────┐
//! │ MonoPipe  │─────────▶│ frame ring  │─────────▶│ MonoPipeReader │
//! │           │          │ (power of 2)│          │                │
//! │ negotiate │          │ rear/front  │          │ wait-free      │
//! │ pacing    │◀─────────│ timestamp   │◀─────────│ publishes pos  │
//! └───────────┘  poll    │ mailbox     │  publish └────────────────┘
//!                        └─────────────┘
//! ```

mod mailbox;
mod pipe;
mod providers;
mod reader;
mod ring;
mod traits;

pub use mailbox::*;
pub use pipe::*;
pub use providers::*;
pub use reader::*;
pub use traits::*;
