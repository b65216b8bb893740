//! The capability seam between the core and the outside world.
//!
//! `HostIo` is the raw line-protocol half (send/debug/fatal/config/creds/
//! dirhash); `RemoteHost` adds the two Swift-credential accessors the
//! transfer engine needs. The split exists so `CredentialManager` can take
//! `&dyn HostIo` as a plain parameter instead of holding a reference back to
//! the adapter that owns it. The production implementation (`Adapter`) backs
//! both with the real line protocol over stdin/stdout plus a live
//! `credentials::CredentialManager`; tests back them with an in-memory fake.
//! This mirrors the "Dynamic dispatch over the host" design note: a
//! migration utility could satisfy the same traits with stubs without
//! touching the transfer engine at all.

use std::future::Future;
use std::io::{self, BufRead, IsTerminal, Write};
use std::pin::Pin;
use std::sync::Mutex;

use crate::credentials::CredentialManager;
use crate::error::Result;

/// A boxed future, used for the `RemoteHost` methods that must perform
/// network I/O (credential refresh) rather than pure line I/O.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The raw host line protocol: everything that is pure request/response I/O.
pub trait HostIo: Send + Sync {
    /// Write `msg` followed by a newline to the host, flushing immediately.
    /// Exits the process on a broken pipe (the host has gone away).
    fn send(&self, msg: &str);

    /// Send a `DEBUG <msg>` line. No reply is expected.
    fn debug(&self, msg: &str) {
        self.send(&format!("DEBUG {msg}"));
    }

    /// Send an `ERROR <msg>` line and terminate the process.
    fn fatal(&self, msg: &str) -> ! {
        self.send(&format!("ERROR {msg}"));
        std::process::exit(1);
    }

    /// `GETCONFIG <name>` → the value, or `None` if unset.
    fn get_config(&self, name: &str) -> Option<String>;

    /// `SETCONFIG <name> <value>`.
    fn set_config(&self, name: &str, value: &str);

    /// `GETCREDS <name>` → `(user, password)`, or `None` if unset.
    fn get_credentials(&self, name: &str) -> Option<(String, String)>;

    /// `SETCREDS <name> <user> <password>`.
    fn set_credentials(&self, name: &str, user: &str, password: &str);

    /// `DIRHASH <key>` → the two-level directory fragment for `key`.
    fn dirhash(&self, key: &str) -> String;
}

/// The capability set the transfer engine and path resolver depend on: raw
/// host I/O plus ready-to-use Swift credentials.
pub trait RemoteHost: HostIo {
    /// Return a valid (endpoint, token) pair, refreshing if necessary.
    fn get_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>>;

    /// Whether the cached Swift token is currently expired.
    fn swift_token_expired(&self) -> bool;

    /// Force a Swift (and, if needed, OAuth access token) credential refresh.
    fn refresh_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>>;
}

/// Production I/O: the real stdin/stdout line protocol.
pub struct StdioIo {
    stdin: Mutex<io::BufReader<io::Stdin>>,
    stdout: Mutex<io::Stdout>,
}

impl Default for StdioIo {
    fn default() -> Self {
        Self {
            stdin: Mutex::new(io::BufReader::new(io::stdin())),
            stdout: Mutex::new(io::stdout()),
        }
    }
}

impl StdioIo {
    /// Refuse to run interactively; git-annex always pipes both ends.
    pub fn refuse_if_tty(&self) -> bool {
        io::stdin().is_terminal() || io::stdout().is_terminal()
    }

    /// Block for the next protocol line, stripped of its line terminator.
    /// Returns `None` on EOF (the host closed the pipe).
    pub fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        let mut stdin = self.stdin.lock().expect("stdin mutex poisoned");
        match stdin.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
            Err(_) => None,
        }
    }

    fn request(&self, msg: &str) -> Option<String> {
        self.send(msg);
        self.read_line()
    }
}

impl HostIo for StdioIo {
    fn send(&self, msg: &str) {
        let mut stdout = self.stdout.lock().expect("stdout mutex poisoned");
        let line = format!("{msg}\n");
        if stdout.write_all(line.as_bytes()).is_err() || stdout.flush().is_err() {
            eprintln!("[git-annex-remote-hubic] git-annex has stopped, exiting.");
            std::process::exit(1);
        }
    }

    fn get_config(&self, name: &str) -> Option<String> {
        let reply = self.request(&format!("GETCONFIG {name}"))?;
        let mut parts = reply.splitn(2, ' ');
        match parts.next()? {
            "VALUE" => parts.next().map(|s| s.to_string()).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    fn set_config(&self, name: &str, value: &str) {
        self.send(&format!("SETCONFIG {name} {value}"));
    }

    fn get_credentials(&self, name: &str) -> Option<(String, String)> {
        let reply = self.request(&format!("GETCREDS {name}"))?;
        let mut parts = reply.splitn(3, ' ');
        match parts.next()? {
            "CREDS" => {
                let user = parts.next()?.to_string();
                let pass = parts.next()?.to_string();
                Some((user, pass))
            }
            _ => None,
        }
    }

    fn set_credentials(&self, name: &str, user: &str, password: &str) {
        self.send(&format!("SETCREDS {name} {user} {password}"));
    }

    fn dirhash(&self, key: &str) -> String {
        let reply = self
            .request(&format!("DIRHASH {key}"))
            .unwrap_or_else(|| self.fatal("Unexpected reply format for DIRHASH"));
        let mut parts = reply.splitn(2, ' ');
        match (parts.next(), parts.next()) {
            (Some("VALUE"), Some(hash)) => hash.to_string(),
            _ => self.fatal("Unexpected reply format for DIRHASH"),
        }
    }
}

/// The production adapter: real line protocol I/O plus a live credential
/// manager. Implements both [`HostIo`] and [`RemoteHost`].
pub struct Adapter {
    pub io: StdioIo,
    pub credentials: CredentialManager,
}

impl Adapter {
    pub fn new(io: StdioIo, credentials: CredentialManager) -> Self {
        Self { io, credentials }
    }
}

impl HostIo for Adapter {
    fn send(&self, msg: &str) {
        self.io.send(msg);
    }
    fn get_config(&self, name: &str) -> Option<String> {
        self.io.get_config(name)
    }
    fn set_config(&self, name: &str, value: &str) {
        self.io.set_config(name, value);
    }
    fn get_credentials(&self, name: &str) -> Option<(String, String)> {
        self.io.get_credentials(name)
    }
    fn set_credentials(&self, name: &str, user: &str, password: &str) {
        self.io.set_credentials(name, user, password);
    }
    fn dirhash(&self, key: &str) -> String {
        self.io.dirhash(key)
    }
}

impl RemoteHost for Adapter {
    fn get_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>> {
        Box::pin(async move { self.credentials.get_swift_credentials(&self.io).await })
    }

    fn swift_token_expired(&self) -> bool {
        self.credentials.swift_token_expired()
    }

    fn refresh_swift_credentials(&self) -> BoxFuture<'_, Result<(String, String)>> {
        Box::pin(async move { self.credentials.force_refresh_swift(&self.io).await })
    }
}
