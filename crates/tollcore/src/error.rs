use thiserror::Error;

/// Failure surfaced by a single component, while running or while stopping.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A termination signal arrived; the kernel treats this as the first
    /// error and begins orderly shutdown.
    #[error("{0} signal received")]
    SignalReceived(&'static str),

    #[error("binding {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("serving: {0}")]
    Serve(#[source] std::io::Error),

    /// A component was asked to run twice; its consumable state is gone.
    #[error("component already consumed its startup state")]
    AlreadyRan,

    #[error("stop handler panicked: {0}")]
    StopPanicked(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ComponentError {
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ComponentError::Other(err.into())
    }
}

/// Kernel-level failures.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("no components registered")]
    NoComponents,

    #[error("kernel already started")]
    AlreadyStarted,

    #[error("component {name}: {source}")]
    Component {
        name: &'static str,
        #[source]
        source: ComponentError,
    },

    /// A component failed before every component signalled ready, so the
    /// all-started condition can never be met.
    #[error("startup aborted")]
    StartAborted,
}

impl KernelError {
    /// True when the underlying cause is a delivered process signal.
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            KernelError::Component {
                source: ComponentError::SignalReceived(_),
                ..
            }
        )
    }
}
