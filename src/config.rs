//! Per-remote configuration: container, path prefix, chunk size, and the
//! `embedcreds` toggle. Read from the host's config store once per process
//! (the process-lifetime cache in [`crate::cache::RemoteState`] holds the
//! parsed result so later operations don't re-issue `GETCONFIG`).

use crate::error::{RemoteError, Result};
use crate::host::HostIo;
use crate::swift::DEFAULT_RESPONSE_CHUNK_SIZE;

pub const DEFAULT_CONTAINER: &str = "default";
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 30; // 1 GiB

pub const HUBIC_CLIENT_ID_ENV: &str = "HUBIC_CLIENT_ID";
pub const HUBIC_CLIENT_SECRET_ENV: &str = "HUBIC_CLIENT_SECRET";
pub const HUBIC_AUTH_FILE_ENV: &str = "GIT_ANNEX_HUBIC_AUTH_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub container: String,
    pub path: String,
    pub chunk_size: u64,
    pub response_chunk_size: usize,
}

impl RemoteConfig {
    /// Load the transfer-engine configuration from the host, applying
    /// defaults for unset keys.
    pub fn load(host: &dyn HostIo) -> Result<Self> {
        let container = host
            .get_config("hubic_container")
            .unwrap_or_else(|| DEFAULT_CONTAINER.to_string());
        let path = host.get_config("hubic_path").unwrap_or_default();
        let chunk_size = match host.get_config("hubic_chunk_size") {
            Some(raw) => parse_chunk_size(&raw)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let response_chunk_size = match host.get_config("hubic_response_chunk_size") {
            Some(raw) => parse_response_chunk_size(&raw)?,
            None => DEFAULT_RESPONSE_CHUNK_SIZE,
        };
        Ok(Self {
            container,
            path,
            chunk_size,
            response_chunk_size,
        })
    }
}

fn parse_chunk_size(raw: &str) -> Result<u64> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| RemoteError::Configuration(format!("invalid hubic_chunk_size: {raw}")))?;
    if value == 0 {
        return Err(RemoteError::Configuration(
            "hubic_chunk_size must be a positive integer".to_string(),
        ));
    }
    Ok(value)
}

fn parse_response_chunk_size(raw: &str) -> Result<usize> {
    let value: usize = raw.trim().parse().map_err(|_| {
        RemoteError::Configuration(format!("invalid hubic_response_chunk_size: {raw}"))
    })?;
    if value == 0 {
        return Err(RemoteError::Configuration(
            "hubic_response_chunk_size must be a positive integer".to_string(),
        ));
    }
    Ok(value)
}

/// Whether `embedcreds` is set to a truthy value (`yes`/`true`/`1`, any case).
pub fn embedcreds_enabled_io(host: &dyn HostIo) -> bool {
    match host.get_config("embedcreds") {
        Some(raw) => matches!(raw.to_lowercase().as_str(), "yes" | "true" | "1"),
        None => false,
    }
}
