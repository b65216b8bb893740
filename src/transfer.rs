//! The chunked transfer engine: store, retrieve, check, remove.
//!
//! Generalizes `swift.py`'s single-object store/retrieve/check/remove into
//! a linked list of fixed-size chunks, since large files need splitting
//! across multiple Swift objects. The linked-list layout (head carries
//! `annex-chunks`/`annex-global-md5`, each non-terminal chunk carries
//! `annex-next-chunk`) lets retrieval and presence-checking walk the chain
//! without a separate manifest object, and lets removal proceed in reverse
//! order so an interrupted removal still leaves a walkable (shorter) chain.

use std::path::Path;

use futures::{Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::cache::RemoteState;
use crate::error::{RemoteError, Result};
use crate::host::RemoteHost;
use crate::pathresolve;
use crate::swift::{self, ObjectHeaders, SwiftClient};

const PROGRESS_BUFFER_SIZE: usize = 65536;
const MAX_CHUNK_ATTEMPTS: u32 = 3;

struct ChunkDescriptor {
    index: u32,
    offset: u64,
    size: u64,
}

fn compute_chunks(total_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    if total_size == 0 {
        return vec![ChunkDescriptor {
            index: 0,
            offset: 0,
            size: 0,
        }];
    }
    let count = total_size.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            let size = chunk_size.min(total_size - offset);
            ChunkDescriptor {
                index: i as u32,
                offset,
                size,
            }
        })
        .collect()
}

fn chunk_object_path(head_path: &str, index: u32) -> String {
    if index == 0 {
        head_path.to_string()
    } else {
        swift::chunk_path(head_path, index)
    }
}

/// Stream a chunk's body straight from `file` (already seeked to the chunk's
/// offset) in `PROGRESS_BUFFER_SIZE` reads, reporting each read's length on
/// `progress` as it goes. Owns the file handle so it can be wrapped in a
/// `reqwest::Body` without borrowing anything from the caller — a fresh one
/// is built per retry attempt, which is what gives retries their seek-back.
fn chunk_body_stream(
    file: tokio::fs::File,
    remaining: u64,
    progress: mpsc::UnboundedSender<usize>,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + Sync + 'static {
    futures::stream::try_unfold((file, remaining, progress), |(mut file, remaining, progress)| async move {
        if remaining == 0 {
            return Ok(None);
        }
        let to_read = remaining.min(PROGRESS_BUFFER_SIZE as u64) as usize;
        let mut buf = vec![0u8; to_read];
        file.read_exact(&mut buf).await?;
        let _ = progress.send(to_read);
        Ok(Some((buf, (file, remaining - to_read as u64, progress))))
    })
}

/// Run `op` against the current Swift client, forcing a credential refresh
/// and retrying once more if it fails with an auth error while the cached
/// token believes itself expired. Gives up after [`MAX_CHUNK_ATTEMPTS`].
async fn with_retry<T, F, Fut>(
    state: &RemoteState,
    host: &dyn RemoteHost,
    mut client: SwiftClient,
    mut op: F,
) -> Result<T>
where
    F: FnMut(SwiftClient) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..MAX_CHUNK_ATTEMPTS {
        match op(client.clone()).await {
            Ok(value) => return Ok(value),
            Err(RemoteError::Auth(msg)) if host.swift_token_expired() && attempt + 1 < MAX_CHUNK_ATTEMPTS => {
                tracing::warn!("Swift token expired ({msg}), refreshing and retrying (attempt {attempt})");
                host.debug(&format!("Swift token expired ({msg}), refreshing and retrying"));
                client = state.force_rebuild_swift_client(host).await?;
                last_err = Some(RemoteError::Auth(msg));
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or(RemoteError::Auth("exhausted retry attempts".to_string())))
}

async fn store_inner(
    state: &RemoteState,
    host: &dyn RemoteHost,
    key: &str,
    filename: &Path,
) -> Result<()> {
    let config = &state.config;
    let head_path = pathresolve::resolve(host, &config.container, &config.path, key);

    let metadata = tokio::fs::metadata(filename).await?;
    let total_size = metadata.len();
    let descriptors = compute_chunks(total_size, config.chunk_size);

    // Pass 1: compute every chunk's MD5 and the file's overall MD5 without
    // uploading anything, so each chunk's headers can be written correctly
    // on the first (and only) upload pass.
    let mut chunk_digests = Vec::with_capacity(descriptors.len());
    {
        let mut file = tokio::fs::File::open(filename).await?;
        let mut global_hasher = Md5::new();
        for desc in &descriptors {
            let mut chunk_hasher = Md5::new();
            let mut remaining = desc.size;
            let mut buf = vec![0u8; PROGRESS_BUFFER_SIZE];
            while remaining > 0 {
                let to_read = remaining.min(PROGRESS_BUFFER_SIZE as u64) as usize;
                file.read_exact(&mut buf[..to_read]).await?;
                chunk_hasher.update(&buf[..to_read]);
                global_hasher.update(&buf[..to_read]);
                remaining -= to_read as u64;
            }
            chunk_digests.push(hex::encode(chunk_hasher.finalize()));
        }
        let global_hex = hex::encode(global_hasher.finalize());
        chunk_digests.push(global_hex);
    }
    let global_hex = chunk_digests.pop().expect("pushed above");

    let dir = pathresolve::parent_of(&head_path);
    let client = state.swift_client(host).await?;
    pathresolve::ensure_directory_exists(host, &client, &config.container, dir).await?;

    let n = descriptors.len() as u32;
    let mut bytes_sent: u64 = 0;

    for desc in &descriptors {
        let object_path = chunk_object_path(&head_path, desc.index);
        tracing::debug!(
            "uploading chunk {} of {n} for key ({} bytes at offset {})",
            desc.index,
            desc.size,
            desc.offset
        );
        let etag = chunk_digests[desc.index as usize].clone();
        let mut extra_headers = vec![
            (swift::ANNEX_CHUNKS_HEADER, n.to_string()),
            (swift::ANNEX_GLOBAL_MD5_HEADER, global_hex.clone()),
        ];
        if desc.index + 1 < n {
            extra_headers.push((
                swift::ANNEX_NEXT_CHUNK_HEADER,
                chunk_object_path(&head_path, desc.index + 1),
            ));
        }

        let container = config.container.clone();
        let etag_for_retry = etag;
        let path_for_retry = object_path;
        let headers_for_retry = extra_headers;
        let offset = desc.offset;
        let size = desc.size;
        let chunk_base = bytes_sent;

        let sent = with_retry(state, host, client.clone(), move |c| {
            let container = container.clone();
            let etag = etag_for_retry.clone();
            let path = path_for_retry.clone();
            let headers = headers_for_retry.clone();
            async move {
                let mut file = tokio::fs::File::open(filename).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
                let body = reqwest::Body::wrap_stream(chunk_body_stream(file, size, tx));
                let header_refs: Vec<(&str, String)> =
                    headers.iter().map(|(k, v)| (*k, v.clone())).collect();

                let upload = c.put_object(&container, &path, body, size, &etag, &header_refs);
                let progress = async {
                    let mut sent: u64 = 0;
                    while let Some(read) = rx.recv().await {
                        sent += read as u64;
                        host.send(&format!("PROGRESS {}", chunk_base + sent));
                    }
                    sent
                };
                let (result, sent) = futures::join!(upload, progress);
                result?;
                Ok(sent)
            }
        })
        .await?;
        bytes_sent += sent;
    }

    Ok(())
}

pub async fn store(state: &RemoteState, host: &dyn RemoteHost, key: &str, filename: &Path) {
    match store_inner(state, host, key, filename).await {
        Ok(()) => host.send(&format!("TRANSFER-SUCCESS STORE {key}")),
        Err(e) => host.send(&format!("TRANSFER-FAILURE STORE {key} {}", e.reply_text())),
    }
}

async fn retrieve_inner(
    state: &RemoteState,
    host: &dyn RemoteHost,
    key: &str,
    filename: &Path,
) -> Result<()> {
    let config = &state.config;
    let head_path = pathresolve::resolve(host, &config.container, &config.path, key);
    let client = state.swift_client(host).await?;

    let mut dest = tokio::fs::File::create(filename).await?;
    let mut global_hasher = Md5::new();
    let mut declared_n: Option<u32> = None;
    let mut declared_global: Option<String> = None;
    let mut current_path = head_path;
    let mut bytes_received: u64 = 0;

    loop {
        tracing::debug!("fetching chunk at path {current_path}");
        let path = current_path.clone();
        let container = config.container.clone();
        let (headers, response): (ObjectHeaders, reqwest::Response) =
            with_retry(state, host, client.clone(), move |c| {
                let path = path.clone();
                let container = container.clone();
                async move { c.get_object(&container, &path).await }
            })
            .await?;

        match (declared_n, &headers.annex_chunks) {
            (None, Some(n)) => declared_n = Some(*n),
            (Some(n), Some(seen)) if n != *seen => {
                return Err(RemoteError::Transport(format!(
                    "inconsistent annex-chunks across chain: {n} vs {seen}"
                )));
            }
            _ => {}
        }
        match (&declared_global, &headers.annex_global_md5) {
            (None, Some(g)) => declared_global = Some(g.clone()),
            (Some(g), Some(seen)) if g != seen => {
                return Err(RemoteError::Transport(
                    "inconsistent annex-global-md5 across chain".to_string(),
                ));
            }
            _ => {}
        }

        let mut chunk_hasher = Md5::new();
        let mut stream = response.bytes_stream();
        let buffer_size = client.response_chunk_size();
        let mut buffered = Vec::with_capacity(buffer_size);
        while let Some(next) = stream.next().await {
            let bytes = next?;
            buffered.extend_from_slice(&bytes);
            if buffered.len() >= buffer_size {
                chunk_hasher.update(&buffered);
                global_hasher.update(&buffered);
                dest.write_all(&buffered).await?;
                bytes_received += buffered.len() as u64;
                host.send(&format!("PROGRESS {bytes_received}"));
                buffered.clear();
            }
        }
        if !buffered.is_empty() {
            chunk_hasher.update(&buffered);
            global_hasher.update(&buffered);
            dest.write_all(&buffered).await?;
            bytes_received += buffered.len() as u64;
            host.send(&format!("PROGRESS {bytes_received}"));
        }

        let chunk_hex = hex::encode(chunk_hasher.finalize());
        if let Some(expected_etag) = &headers.etag {
            if expected_etag != &chunk_hex {
                return Err(RemoteError::Checksum);
            }
        }

        match headers.annex_next_chunk {
            Some(next) => current_path = next,
            None => break,
        }
    }

    dest.flush().await?;

    if let Some(expected) = declared_global {
        let actual = hex::encode(global_hasher.finalize());
        if actual != expected {
            return Err(RemoteError::Checksum);
        }
    }

    Ok(())
}

pub async fn retrieve(state: &RemoteState, host: &dyn RemoteHost, key: &str, filename: &Path) {
    match retrieve_inner(state, host, key, filename).await {
        Ok(()) => host.send(&format!("TRANSFER-SUCCESS RETRIEVE {key}")),
        Err(e) => {
            let _ = tokio::fs::remove_file(filename).await;
            host.send(&format!(
                "TRANSFER-FAILURE RETRIEVE {key} {}",
                e.reply_text()
            ));
        }
    }
}

async fn check_inner(state: &RemoteState, host: &dyn RemoteHost, key: &str) -> Result<bool> {
    let config = &state.config;
    let head_path = pathresolve::resolve(host, &config.container, &config.path, key);
    let client = state.swift_client(host).await?;

    let mut current_path = Some(head_path);
    let mut declared_n: Option<u32> = None;
    let mut visited: u32 = 0;

    while let Some(path) = current_path.take() {
        let headers = client.head_object(&config.container, &path).await?;
        visited += 1;
        if declared_n.is_none() {
            declared_n = headers.annex_chunks;
        }
        current_path = headers.annex_next_chunk;
    }

    Ok(Some(visited) == declared_n)
}

pub async fn check(state: &RemoteState, host: &dyn RemoteHost, key: &str) {
    match check_inner(state, host, key).await {
        Ok(true) => host.send(&format!("CHECKPRESENT-SUCCESS {key}")),
        Ok(false) => host.send(&format!("CHECKPRESENT-FAILURE {key}")),
        Err(RemoteError::NotFound) => host.send(&format!("CHECKPRESENT-FAILURE {key}")),
        Err(e) => host.send(&format!(
            "CHECKPRESENT-UNKNOWN {key} {}",
            e.reply_text()
        )),
    }
}

async fn remove_inner(state: &RemoteState, host: &dyn RemoteHost, key: &str) -> Result<()> {
    let config = &state.config;
    let head_path = pathresolve::resolve(host, &config.container, &config.path, key);
    let client = state.swift_client(host).await?;

    let mut chain = Vec::new();
    let mut current_path = Some(head_path);
    while let Some(path) = current_path.take() {
        match client.head_object(&config.container, &path).await {
            Ok(headers) => {
                current_path = headers.annex_next_chunk.clone();
                chain.push(path);
            }
            Err(RemoteError::NotFound) => break,
            Err(e) => return Err(e),
        }
    }

    for path in chain.into_iter().rev() {
        match client.delete_object(&config.container, &path).await {
            Ok(()) => {}
            Err(RemoteError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

pub async fn remove(state: &RemoteState, host: &dyn RemoteHost, key: &str) {
    match remove_inner(state, host, key).await {
        Ok(()) => host.send(&format!("REMOVE-SUCCESS {key}")),
        Err(e) => host.send(&format!("REMOVE-FAILURE {key} {}", e.reply_text())),
    }
}
