//! Process lifecycle kernel and long-running service components.
//!
//! A [`Kernel`] composes independent [`Component`]s, starts them
//! concurrently, exposes aggregated started/failed signals, and stops them
//! all in parallel on shutdown. The built-in components cover the pieces
//! every Tollbooth process needs: HTTP listeners, Prometheus exposition,
//! termination signals, and the backend heartbeat scheduler.
//!
//! ```rust,no_run
//! use tollcore::{Kernel, SignalComponent};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), tollcore::KernelError> {
//! let mut kernel = Kernel::new();
//! kernel.register(SignalComponent);
//!
//! let token = CancellationToken::new();
//! let (started, failed) = kernel.start(token.clone())?;
//! started.wait().await?;
//!
//! if let Some(err) = failed.wait().await {
//!     tracing::error!(error = %err, "shutting down");
//! }
//! kernel.shutdown(std::time::Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod heartbeat;
pub mod http_server;
pub mod kernel;
pub mod metrics_server;
pub mod signals;

pub use error::{ComponentError, KernelError};
pub use heartbeat::{Beatable, BeatError, HeartbeatComponent, HeartbeatOptions, Target};
pub use http_server::HttpServerComponent;
pub use kernel::{Component, Failed, Kernel, Ready, Started};
pub use metrics_server::MetricsServerComponent;
pub use signals::SignalComponent;
