//! Informational events emitted while populating the cache.
//!
//! Events never influence control flow: a sink without a receiver, or one
//! whose receiver has gone away, silently drops them.

use std::fmt;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info};

use crate::model::Dependency;
use crate::observability::FETCH_LOG_TARGET;

/// Something observable happened while fetching binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A download of prebuilt binaries started.
    DownloadingBinaries {
        /// Dependency being downloaded.
        dependency: Dependency,
        /// Version label shown to the user.
        version: String,
    },
    /// A download was skipped; the caller will build from source.
    SkippedDownloadingBinaries {
        /// Dependency whose download was skipped.
        dependency: Dependency,
        /// Human-readable explanation.
        reason: String,
    },
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DownloadingBinaries {
                dependency,
                version,
            } => write!(f, "Downloading {} binary at \"{version}\"", dependency.name()),
            Self::SkippedDownloadingBinaries { dependency, reason } => {
                write!(f, "Skipped downloading {} binary: {reason}", dependency.name())
            }
        }
    }
}

/// Optional observer channel for [`CacheEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<CacheEvent>>,
}

impl EventSink {
    /// A sink that only logs.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { sender: None }
    }

    /// Creates a sink and the receiver that observes it.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<CacheEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Logs and forwards an event.
    pub fn emit(&self, event: CacheEvent) {
        match &event {
            CacheEvent::DownloadingBinaries { dependency, version } => info!(
                target: FETCH_LOG_TARGET,
                dependency = dependency.name(),
                version = %version,
                "downloading binaries"
            ),
            CacheEvent::SkippedDownloadingBinaries { dependency, reason } => debug!(
                target: FETCH_LOG_TARGET,
                dependency = dependency.name(),
                reason = %reason,
                "skipped downloading binaries"
            ),
        }
        if let Some(sender) = &self.sender {
            // A closed receiver means nobody is listening any more.
            drop(sender.send(event));
        }
    }

    /// Emits [`CacheEvent::DownloadingBinaries`].
    pub fn downloading(&self, dependency: &Dependency, version: impl Into<String>) {
        self.emit(CacheEvent::DownloadingBinaries {
            dependency: dependency.clone(),
            version: version.into(),
        });
    }

    /// Emits [`CacheEvent::SkippedDownloadingBinaries`].
    pub fn skipped(&self, dependency: &Dependency, reason: impl Into<String>) {
        self.emit(CacheEvent::SkippedDownloadingBinaries {
            dependency: dependency.clone(),
            reason: reason.into(),
        });
    }
}
