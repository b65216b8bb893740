//! Process-lifetime cache of the resolved remote configuration and the
//! live Swift client built from it.
//!
//! Mirrors `swift.py::SwiftConnection`'s module-level `cache` dict: the
//! container name, path prefix, and chunk size are read from host config
//! once; the Swift client is rebuilt only when the (endpoint, token) pair
//! actually changes, so repeated commands reuse one HTTP connection pool
//! instead of re-authenticating on every operation.

use tokio::sync::Mutex;

use crate::config::RemoteConfig;
use crate::error::Result;
use crate::host::RemoteHost;
use crate::swift::SwiftClient;

struct Cached {
    client: SwiftClient,
    last_creds: (String, String),
}

/// Holds the parsed [`RemoteConfig`] plus a lazily-(re)built [`SwiftClient`].
pub struct RemoteState {
    pub config: RemoteConfig,
    cached: Mutex<Option<Cached>>,
}

impl RemoteState {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    /// Return a Swift client bound to the host's current credentials,
    /// rebuilding it only if the (endpoint, token) pair has changed since
    /// the last call.
    pub async fn swift_client(&self, host: &dyn RemoteHost) -> Result<SwiftClient> {
        let creds = host.get_swift_credentials().await?;
        let mut guard = self.cached.lock().await;
        let needs_rebuild = match &*guard {
            Some(cached) => cached.last_creds != creds,
            None => true,
        };
        if needs_rebuild {
            let (endpoint, token) = creds.clone();
            *guard = Some(Cached {
                client: SwiftClient::new(endpoint, token, self.config.response_chunk_size),
                last_creds: creds,
            });
        }
        Ok(guard.as_ref().expect("just populated").client.clone())
    }

    /// Force-rebuild the cached Swift client from a freshly-refreshed
    /// credential pair, used after a 401 response.
    pub async fn force_rebuild_swift_client(&self, host: &dyn RemoteHost) -> Result<SwiftClient> {
        let creds = host.refresh_swift_credentials().await?;
        let mut guard = self.cached.lock().await;
        let (endpoint, token) = creds.clone();
        *guard = Some(Cached {
            client: SwiftClient::new(endpoint, token, self.config.response_chunk_size),
            last_creds: creds,
        });
        Ok(guard.as_ref().expect("just populated").client.clone())
    }
}
