//! Regvault - versioned regulation artifacts
//!
//! Forms, business processes and data-model files live in a git
//! repository. The head branch is the published version; every pending
//! Gerrit change is a candidate version with its own working copy. This
//! crate reconciles the committed tree, the checkout and the change's
//! file diff into one listing, and keeps the caches the HTTP layer uses
//! for optimistic concurrency.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
mod test_utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::AppConfig;
pub use error::{RegvaultError, Result};
pub use state::AppState;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; calling it again is a no-op.
pub fn init_tracing() {
    let initialized = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regvault=debug,git2=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("Starting Regvault");
    }
}
