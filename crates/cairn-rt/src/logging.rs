//! Structured logging for the runtime.
//!
//! Events are emitted with `tracing` under the `cairn::*` targets:
//!
//! - `cairn::resolve`: dispatch map construction and lookups
//! - `cairn::update`: function-table growth
//! - `cairn::owner`: slot-owner scans (cache misses only)
//! - `cairn::loader`: module loading
//! - `cairn::fault`: unrecoverable faults
//!
//! No subscriber is installed unless the configuration carries a filter
//! (`CAIRN_LOG`), so an embedder's own subscriber always wins.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::{LogStyle, RuntimeConfig};

static INITIALISED: OnceLock<bool> = OnceLock::new();

/// Install a stderr subscriber for `config`, at most once per process.
///
/// Returns whether a subscriber from this call or an earlier one is active.
pub fn init_logging(config: &RuntimeConfig) -> bool {
    *INITIALISED.get_or_init(|| {
        let Some(directive) = config.log_filter.as_deref() else {
            return false;
        };
        let filter = match EnvFilter::try_new(directive) {
            Ok(filter) => filter,
            Err(err) => {
                eprintln!("[cairn-rt] invalid log filter {directive:?}: {err}");
                return false;
            }
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);
        let installed = match config.log_style {
            LogStyle::Full => builder.with_thread_ids(true).try_init(),
            LogStyle::Compact => builder.without_time().compact().try_init(),
        };
        if installed.is_ok() {
            tracing::debug!(target: "cairn::loader", "tracing initialized");
        }
        installed.is_ok()
    })
}
