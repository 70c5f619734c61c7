//! Ambient logging setup shared by every Upspin server binary: a
//! `tracing_subscriber` registry with an `EnvFilter` (`RUST_LOG` wins over
//! the configured default level) and a compact stderr writer.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// A handle to the installed subscriber. Upspin has no background exporter
/// to flush on shutdown, so this is a thin marker kept for API symmetry
/// with other `TracingBuilder::build()` callers.
#[derive(Clone)]
pub struct TracingHandle;

pub struct TracingBuilder {
    level: Level,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder { level: Level::INFO }
    }
}

impl TracingBuilder {
    /// Sets the default log level for the stderr layer. `RUST_LOG` still
    /// takes priority over this value when set.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Installs a `tracing_subscriber::registry` with an `EnvFilter` and a
    /// compact stderr writer as the global default subscriber.
    pub fn build(self) -> Result<TracingHandle, Error> {
        let subscriber = tracing_subscriber::registry().with(
            EnvFilter::builder()
                .with_default_directive(self.level.into())
                .from_env()
                .expect("invalid RUST_LOG"),
        );
        subscriber.with(tracing_subscriber::fmt::Layer::new().compact()).try_init()?;
        Ok(TracingHandle)
    }
}
