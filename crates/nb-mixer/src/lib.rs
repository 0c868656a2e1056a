//! nb-mixer: The NBAudio fast mixer
//!
//! A dedicated real-time thread that pulls up to eight tracks, applies
//! per-track gain, and writes the stereo mix to an output sink every
//! cycle. The control thread never shares a lock with it: configuration
//! travels as wholesale state snapshots, diagnostics come back as plain
//! atomics and compact events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐  publish  ┌─────────────┐  poll   ┌────────────┐
//! │ FastMixerController │──────────▶│ state queue │────────▶│ FastMixer  │
//! │  (control thread)   │           │  (3 slots)  │         │ (rt thread)│
//! │                     │◀──────────│ event ring  │◀────────│            │
//! │ drains, snapshots   │           │ dump state  │         │ mix, write │
//! └─────────────────────┘           └─────────────┘         └────────────┘
//! ```

mod dump;
mod events;
mod fast_mixer;
mod mixer_state;
mod state_queue;
mod thread_priority;
mod thread_state;

pub use dump::*;
pub use events::*;
pub use fast_mixer::*;
pub use mixer_state::*;
pub use state_queue::*;
pub use thread_priority::*;
pub use thread_state::*;
