//! Structured logging.
//!
//! `RUST_LOG` takes precedence over the configured level. The filter is
//! reloadable so logging can start before the configuration is read.

use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber.
///
/// Returns a handle for [`set_level`], or `None` when `RUST_LOG` pins the
/// filter or a subscriber is already installed.
pub fn init(level: &str) -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let (filter, handle) = reload::Layer::new(from_env.unwrap_or_else(|| filter_for(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .ok()?;
    (!pinned).then_some(handle)
}

pub fn set_level(handle: &FilterHandle, level: &str) {
    if let Err(e) = handle.reload(filter_for(level)) {
        tracing::warn!(level, error = %e, "Could not change log level");
    }
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::new(format!("oppy={level},tower_http={level}"))
}
