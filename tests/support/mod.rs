//! Shared test doubles: an in-memory `RemoteHost` and a hand-rolled mock
//! Swift object server. No mock-HTTP-server crate is used — the mock speaks
//! just enough HTTP/1.1 to exercise `SwiftClient`, mirroring how the
//! original Python test suite stubbed the object store with a plain
//! `BaseHTTPServer` handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use git_annex_remote_hubic::error::Result;
use git_annex_remote_hubic::host::{BoxFuture, HostIo, RemoteHost};

/// An in-memory stand-in for git-annex itself: config/credentials live in
/// `HashMap`s, `DIRHASH` is a fixed two-level fragment (real git-annex hashes
/// the key; tests only need *some* stable fragment), and every line sent to
/// the host is captured for assertions.
pub struct FakeHost {
    config: Mutex<HashMap<String, String>>,
    creds: Mutex<HashMap<String, (String, String)>>,
    pub sent: Mutex<Vec<String>>,
    swift_endpoint: String,
    swift_token: Mutex<String>,
    token_expired: Mutex<bool>,
}

impl FakeHost {
    pub fn new(swift_endpoint: String) -> Self {
        Self {
            config: Mutex::new(HashMap::new()),
            creds: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            swift_endpoint,
            swift_token: Mutex::new("valid-token".to_string()),
            token_expired: Mutex::new(false),
        }
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.config
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Simulate the object store rejecting the current token (e.g. after an
    /// operator revokes a session): the next `get_swift_credentials` still
    /// returns a token the mock rejects, `swift_token_expired` reports true,
    /// and only `refresh_swift_credentials` hands back a working one.
    pub fn expire_token(&self) {
        *self.swift_token.lock().unwrap() = "stale-token".to_string();
        *self.token_expired.lock().unwrap() = true;
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl HostIo for FakeHost {
    fn send(&self, msg: &str) {
        self.sent.lock().unwrap().push(msg.to_string());
    }

    fn get_config(&self, name: &str) -> Option<String> {
        self.config.lock().unwrap().get(name).cloned()
    }

    fn set_config(&self, name: &str, value: &str) {
        self.config
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    fn get_credentials(&self, name: &str) -> Option<(String, String)> {
        self.creds.lock().unwrap().get(name).cloned()
    }

    fn set_credentials(&self, name: &str, user: &str, password: &str) {
        self.creds
            .lock()
            .unwrap()
            .insert(name.to_string(), (user.to_string(), password.to_string()));
    }

    fn dirhash(&self, key: &str) -> String {
        let _ = key;
        "aa/bb".to_string()
    }
}

impl RemoteHost for FakeHost {
    fn get_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>> {
        Box::pin(async move {
            let token = self.swift_token.lock().unwrap().clone();
            Ok((self.swift_endpoint.clone(), token))
        })
    }

    fn swift_token_expired(&self) -> bool {
        *self.token_expired.lock().unwrap()
    }

    fn refresh_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>> {
        Box::pin(async move {
            *self.swift_token.lock().unwrap() = "refreshed-token".to_string();
            *self.token_expired.lock().unwrap() = false;
            let token = self.swift_token.lock().unwrap().clone();
            Ok((self.swift_endpoint.clone(), token))
        })
    }
}

#[derive(Clone, Default)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
    etag: Option<String>,
    meta: HashMap<String, String>,
}

/// A minimal Swift object store: container creation is a no-op (any PUT to
/// a bare container path succeeds), objects are addressed by their full
/// path under the fixed "account" segment baked into `endpoint()`.
pub struct MockSwift {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    addr: std::net::SocketAddr,
}

impl MockSwift {
    pub async fn start() -> Arc<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mock = Arc::new(Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            addr,
        });
        let objects = mock.objects.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let objects = objects.clone();
                tokio::spawn(handle_connection(stream, objects));
            }
        });
        mock
    }

    /// The Swift account endpoint `SwiftClient::new` should be pointed at.
    pub fn endpoint(&self) -> String {
        format!("http://{}/v1/AUTH_test", self.addr)
    }

    pub fn object_exists(&self, container: &str, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&object_key(container, path))
    }
}

fn object_key(container: &str, path: &str) -> String {
    format!("{container}/{path}")
}

type BoxConnFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn handle_connection(
    stream: tokio::net::TcpStream,
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
) -> BoxConnFuture {
    Box::pin(async move {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut content_length: usize = 0;
        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                let name = name.trim().to_lowercase();
                let value = value.trim().to_string();
                if name == "content-length" {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.insert(name, value);
            }
        }

        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            let _ = reader.read_exact(&mut body).await;
        }

        // target looks like /v1/AUTH_test/<container>/<path...>
        let path_only = target.split('?').next().unwrap_or(&target);
        let mut segments = path_only.trim_start_matches('/').split('/');
        segments.next(); // "v1"
        segments.next(); // "AUTH_test"
        let container = segments.next().unwrap_or_default().to_string();
        let object_path = segments.collect::<Vec<_>>().join("/");
        let key = object_key(&container, &object_path);

        let stale_token = headers
            .get("x-auth-token")
            .map(|t| t == "stale-token")
            .unwrap_or(false);

        let response = if stale_token && !object_path.is_empty() {
            // Simulate an expired Swift token: object-level operations are
            // rejected, but container creation (and anything presenting a
            // fresh token) still succeeds, matching what the retry path in
            // `transfer::with_retry` needs to recover from.
            plain_response(401, &[], b"")
        } else {
            match method.as_str() {
            "PUT" if object_path.is_empty() => {
                // container creation
                plain_response(201, &[], b"")
            }
            "PUT" => {
                let content_type = headers.get("content-type").cloned();
                let etag = headers.get("etag").cloned();
                let mut meta = HashMap::new();
                for (name, value) in &headers {
                    if let Some(suffix) = name.strip_prefix("x-object-meta-") {
                        meta.insert(suffix.to_string(), value.clone());
                    }
                }
                objects.lock().unwrap().insert(
                    key,
                    StoredObject {
                        body,
                        content_type,
                        etag,
                        meta,
                    },
                );
                plain_response(201, &[], b"")
            }
            "HEAD" => match objects.lock().unwrap().get(&key).cloned() {
                Some(obj) => plain_response(200, &object_headers(&obj), b""),
                None => plain_response(404, &[], b""),
            },
            "GET" => match objects.lock().unwrap().get(&key).cloned() {
                Some(obj) => {
                    let extra = object_headers(&obj);
                    plain_response(200, &extra, &obj.body)
                }
                None => plain_response(404, &[], b""),
            },
            "DELETE" => {
                let existed = objects.lock().unwrap().remove(&key).is_some();
                if existed {
                    plain_response(204, &[], b"")
                } else {
                    plain_response(404, &[], b"")
                }
            }
            _ => plain_response(400, &[], b""),
            }
        };

        let _ = writer.write_all(&response).await;
        let _ = writer.flush().await;
    })
}

fn object_headers(obj: &StoredObject) -> Vec<(String, String)> {
    let mut extra = Vec::new();
    if let Some(ct) = &obj.content_type {
        extra.push(("Content-Type".to_string(), ct.clone()));
    }
    if let Some(etag) = &obj.etag {
        extra.push(("ETag".to_string(), etag.clone()));
    }
    for (name, value) in &obj.meta {
        extra.push((format!("x-object-meta-{name}"), value.clone()));
    }
    extra
}

fn plain_response(status: u16, extra_headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        401 => "Unauthorized",
        _ => "Bad Request",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in extra_headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}
