//! Process-wide daemon handle.
//!
//! The client is built lazily on first use and shared afterwards.
//! [`reset`] drops it so the next caller reconnects from scratch, which
//! keeps a retry path open after socket-level failures.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use clamgate_core::Config;

use crate::{ClamdClient, ClamdError};

static CLIENT: LazyLock<Mutex<Option<Arc<ClamdClient>>>> = LazyLock::new(|| Mutex::new(None));

fn slot() -> MutexGuard<'static, Option<Arc<ClamdClient>>> {
    CLIENT
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shared client for the configured socket, constructed on first use.
#[must_use]
pub fn get(config: &Config) -> Arc<ClamdClient> {
    let mut slot = slot();
    if let Some(client) = slot.as_ref() {
        return Arc::clone(client);
    }
    let client = Arc::new(ClamdClient::new(&config.socket));
    *slot = Some(Arc::clone(&client));
    client
}

/// Ping the daemon through the shared client.
///
/// # Errors
///
/// Returns an error if the daemon cannot be reached or misbehaves.
pub async fn ping(config: &Config) -> Result<(), ClamdError> {
    get(config).ping().await
}

/// Drop the shared client so the next call reconnects.
pub fn reset() {
    slot().take();
}
