//! # shmlink
//!
//! Typed shared-memory struct channel: a fixed binary layout over a keyed
//! shared segment, with per-field access and a cross-process lock for
//! indivisible multi-field updates.
//!
//! ## Features
//!
//! - **Keyed segments**: producer and consumer agree on an integer key (like a
//!   well-known port); the first process to ask creates the segment, later
//!   ones attach
//! - **Fixed layouts**: fields are laid end to end in declared order, with no
//!   implicit padding, so a C peer declaring the same struct interoperates
//! - **Tear-free fields**: aligned fields use single atomic loads and stores
//! - **Locked updates**: [`SharedStructChannel::write_atomic_update`] and
//!   [`SharedStructChannel::lock`] guard compound changes against guarded
//!   readers in any process
//! - **Two backends**: System V shared memory with a semaphore lock, or a
//!   mapped file with `flock`
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐                                  ┌──────────────┐
//! │  producer    │     ┌──────────────────────┐     │  consumer    │
//! │              │     │ segment (key 454)    │     │              │
//! │ write_atomic ├────►│ x:i32 y:i32 changed  ├────►│ take_update  │
//! │   _update    │     └──────────────────────┘     │ (reset flag) │
//! └──────┬───────┘     ┌──────────────────────┐     └──────┬───────┘
//!        └────────────►│ keyed lock           │◄───────────┘
//!                      │ (semaphore / flock)  │
//!                      └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Producer
//!
//! ```rust,no_run
//! use shmlink::{Layout, PointerUpdate, SharedStructChannel};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = SharedStructChannel::open_or_create(454, Layout::pointer())?;
//! channel.write_record(&PointerUpdate::along_x(55))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Consumer
//!
//! ```rust,no_run
//! use shmlink::{Layout, MouseConfig, MouseSource, SharedStructChannel};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = SharedStructChannel::attach(454, Layout::pointer())?;
//! let mut mouse = MouseSource::new(channel, MouseConfig::default())?;
//! for event in mouse.poll()? {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use shmlink::{Layout, SharedStructChannel, ShmError};
//!
//! match SharedStructChannel::attach(454, Layout::pointer()) {
//!     Ok(channel) => { /* use channel */ }
//!     Err(ShmError::NotFound { key }) => {
//!         eprintln!("No segment for key {key}; start the producer first");
//!     }
//!     Err(ShmError::SegmentSizeMismatch { expected, actual, .. }) => {
//!         eprintln!("Layout drift: segment is {actual} bytes, expected {expected}");
//!     }
//!     Err(e) => eprintln!("Unexpected error: {e}"),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **SharedStructChannel**: `Send + Sync`; locked operations from several
//!   threads are serialized in-process before the OS lock is taken
//! - **ChannelGuard**: tied to the thread that took it
//! - **MouseSource**: single consumer, `&mut self` polling

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod layout;
pub mod mouse;
pub mod platform;
pub mod record;

mod lock;
mod region;

pub use backend::BackendKind;
pub use channel::{ChannelGuard, ChannelState, SharedStructChannel};
pub use config::{ChannelConfig, ShmlinkConfig};
pub use error::{ShmError, ShmResult};
pub use layout::{Field, FieldType, Layout, LayoutBuilder, LayoutSpec, Snapshot};
pub use mouse::{MotionEvent, MouseConfig, MouseEvent, MouseSource};
pub use record::{PointerUpdate, SharedRecord};

/// Initialize tracing from `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicI32, Ordering};

    static NEXT: AtomicI32 = AtomicI32::new(0);

    /// System V key unique to this test process and call.
    pub(crate) fn unique_key() -> i32 {
        let pid = std::process::id() as i32 & 0x000f_ffff;
        let n = NEXT.fetch_add(1, Ordering::Relaxed) & 0xff;
        0x4000_0000 | (pid << 8) | n
    }
}
