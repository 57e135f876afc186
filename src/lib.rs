//! tasksync - inter-instance synchronization for a terminal task manager
//!
//! Several copies of the task manager running on one machine share a
//! Unix domain socket. The first to bind it becomes the primary and relays
//! every change announcement to the others; the rest connect as
//! secondaries and keep reconnecting if the primary goes away.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tasksync::{Coordinator, Notification, NotificationKind, SyncOptions};
//!
//! # async fn demo() -> tasksync::Result<()> {
//! let sync = Coordinator::new(SyncOptions::default(), "/tmp/tasks/tasksync.sock");
//! sync.set_listener(Arc::new(|n: Notification| println!("reload after {}", n)));
//! sync.start().await?;
//! sync.announce(NotificationKind::StatusChanged, 42).await?;
//! sync.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod sync;
pub mod version;

pub use config::SyncConfig;
pub use error::{Error, ErrorCode, Result, TransportErrorKind};
pub use protocol::{Notification, NotificationCodec, NotificationKind};
pub use sync::{
    Coordinator, NotificationListener, RetryPolicy, SharedListener, SyncClient, SyncMode,
    SyncOptions, SyncRole, SyncServer,
};
