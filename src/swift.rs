//! Minimal OpenStack Swift object-storage client.
//!
//! Five primitives used by the transfer engine: `put_container`,
//! `put_directory_marker`, `put_object`, `get_object` (streaming),
//! `head_object`, `delete_object`. Swift authenticates requests with a
//! plain `X-Auth-Token` header against a per-account storage URL — both
//! obtained from the credential manager, not from a generic OAuth bearer
//! exchange.

use reqwest::{Client, StatusCode};
use url::Url;

use crate::config::HUBIC_AUTH_FILE_ENV;
use crate::error::{RemoteError, Result};

pub const ANNEX_CHUNKS_HEADER: &str = "x-object-meta-annex-chunks";
pub const ANNEX_GLOBAL_MD5_HEADER: &str = "x-object-meta-annex-global-md5";
pub const ANNEX_NEXT_CHUNK_HEADER: &str = "x-object-meta-annex-next-chunk";
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";
pub const DEFAULT_RESPONSE_CHUNK_SIZE: usize = 65536;

/// Headers relevant to chunk-chain walking, extracted from a HEAD or GET
/// response.
#[derive(Debug, Clone, Default)]
pub struct ObjectHeaders {
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub annex_chunks: Option<u32>,
    pub annex_global_md5: Option<String>,
    pub annex_next_chunk: Option<String>,
}

impl ObjectHeaders {
    fn from_response(resp: &reqwest::Response) -> Self {
        let headers = resp.headers();
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Self {
            content_type: header_str("content-type"),
            etag: header_str("etag").map(|s| s.trim_matches('"').to_string()),
            annex_chunks: header_str(ANNEX_CHUNKS_HEADER).and_then(|s| s.parse().ok()),
            annex_global_md5: header_str(ANNEX_GLOBAL_MD5_HEADER),
            annex_next_chunk: header_str(ANNEX_NEXT_CHUNK_HEADER),
        }
    }
}

#[derive(Clone)]
pub struct SwiftClient {
    http: Client,
    endpoint: String,
    token: String,
    response_chunk_size: usize,
}

impl SwiftClient {
    /// Build a client bound to a fresh (endpoint, token) pair. If
    /// `GIT_ANNEX_HUBIC_AUTH_FILE` is set, dump the pair to that path as a
    /// shell-sourceable file for out-of-band debugging with `swift`/`curl`.
    pub fn new(endpoint: String, token: String, response_chunk_size: usize) -> Self {
        if let Ok(path) = std::env::var(HUBIC_AUTH_FILE_ENV) {
            let contents = format!("export OS_AUTH_TOKEN={token}\nexport OS_STORAGE_URL={endpoint}\n");
            let _ = std::fs::write(&path, contents);
        }
        Self {
            http: Client::new(),
            endpoint,
            token,
            response_chunk_size,
        }
    }

    /// The read granularity `get_object`'s caller should buffer incoming
    /// response bytes to before hashing/writing/reporting progress.
    pub fn response_chunk_size(&self) -> usize {
        self.response_chunk_size
    }

    fn container_url(&self, container: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RemoteError::Transport(format!("invalid Swift endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport("Swift endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(container);
        Ok(url)
    }

    fn object_url(&self, container: &str, path: &str) -> Result<Url> {
        let mut url = self.container_url(container)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Transport("Swift endpoint cannot be a base URL".to_string()))?;
            for part in path.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }

    async fn status_result(resp: reqwest::Response) -> Result<reqwest::Response> {
        match resp.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            StatusCode::UNAUTHORIZED => Err(RemoteError::Auth("Swift token rejected".to_string())),
            status if status.is_success() => Ok(resp),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(RemoteError::Transport(format!("Swift returned {status}: {body}")))
            }
        }
    }

    pub async fn put_container(&self, container: &str) -> Result<()> {
        let url = self.container_url(container)?;
        let resp = self
            .http
            .put(url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?;
        Self::status_result(resp).await?;
        Ok(())
    }

    pub async fn put_directory_marker(&self, container: &str, path: &str) -> Result<()> {
        let url = self.object_url(container, path)?;
        let resp = self
            .http
            .put(url)
            .header("X-Auth-Token", &self.token)
            .header("Content-Type", DIRECTORY_CONTENT_TYPE)
            .header("Content-Length", "0")
            .send()
            .await?;
        Self::status_result(resp).await?;
        Ok(())
    }

    /// Upload `body` to `container`/`path`. `body` is a streamed source
    /// (the caller re-creates it fresh on each retry attempt rather than
    /// buffering the whole chunk), so `content_length` is passed explicitly
    /// since reqwest cannot infer it from an arbitrary stream. `etag_hex` is
    /// the object's MD5, enforced by Swift so a corrupted upload is rejected
    /// server-side. `extra_headers` carries the `x-object-meta-annex-*`
    /// chunk metadata.
    pub async fn put_object(
        &self,
        container: &str,
        path: &str,
        body: reqwest::Body,
        content_length: u64,
        etag_hex: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<()> {
        let url = self.object_url(container, path)?;
        let mut req = self
            .http
            .put(url)
            .header("X-Auth-Token", &self.token)
            .header("ETag", etag_hex)
            .header("Content-Length", content_length.to_string())
            .body(body);
        for (name, value) in extra_headers {
            req = req.header(*name, value.as_str());
        }
        let resp = req.send().await?;
        Self::status_result(resp).await?;
        Ok(())
    }

    pub async fn head_object(&self, container: &str, path: &str) -> Result<ObjectHeaders> {
        let url = self.object_url(container, path)?;
        let resp = self
            .http
            .head(url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?;
        let resp = Self::status_result(resp).await?;
        Ok(ObjectHeaders::from_response(&resp))
    }

    /// GET `container`/`path`, returning its chunk headers and the response
    /// for the caller to stream via `bytes_stream()`.
    pub async fn get_object(
        &self,
        container: &str,
        path: &str,
    ) -> Result<(ObjectHeaders, reqwest::Response)> {
        let url = self.object_url(container, path)?;
        let resp = self
            .http
            .get(url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?;
        let resp = Self::status_result(resp).await?;
        let headers = ObjectHeaders::from_response(&resp);
        Ok((headers, resp))
    }

    pub async fn delete_object(&self, container: &str, path: &str) -> Result<()> {
        let url = self.object_url(container, path)?;
        let resp = self
            .http
            .delete(url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?;
        match Self::status_result(resp).await {
            Ok(_) | Err(RemoteError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// The next-chunk object path, i.e. `<head>/chunk%04d`.
pub fn chunk_path(head_path: &str, index: u32) -> String {
    format!("{head_path}/chunk{index:04}")
}
