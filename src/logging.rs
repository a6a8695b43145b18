//=============================================
// chainbridge/src/logging.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Tracing setup for bridge hosts
// Objective: Install one compact subscriber per process
//=============================================

use std::sync::OnceLock;

use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing. `RUST_LOG` wins over `default_filter` when set.
pub fn init(default_filter: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        // Another subscriber may already be installed by the embedding process.
        let _ = SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(true)
            .compact()
            .try_init();
    });
    tracing::debug!(default_filter, "tracing initialised");
}
