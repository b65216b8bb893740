//! The command dispatch loop: reads one line at a time from the host,
//! routes it, and never interleaves replies for different commands.
//!
//! Grounded in `remote.py::Remote._run_forever`'s `if/elif` command
//! table, generalized to async command handling and explicit per-command
//! interrupt handling (a `tokio::select!` race against `ctrl_c()`, since
//! the original relies on Python's synchronous `KeyboardInterrupt`).

use std::path::Path;

use crate::cache::RemoteState;
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::host::{Adapter, HostIo, StdioIo};
use crate::transfer;

const REMOTE_COST: u32 = 175;

/// Run the protocol loop to completion: returns when the host closes its
/// end of the pipe (clean EOF).
pub async fn run(adapter: &Adapter) {
    adapter.io.send("VERSION 1");

    let mut state: Option<RemoteState> = None;

    loop {
        let Some(line) = adapter.io.read_line() else {
            return;
        };
        if line.is_empty() {
            return;
        }

        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        match command {
            "GETCOST" => adapter.io.send(&format!("COST {REMOTE_COST}")),
            "GETAVAILABILITY" => adapter.io.send("AVAILABILITY GLOBAL"),
            "INITREMOTE" => handle_initremote(adapter).await,
            "PREPARE" => {
                state = handle_prepare(adapter).await;
            }
            "TRANSFER" => handle_transfer(adapter, state.as_ref(), rest).await,
            "CHECKPRESENT" => handle_checkpresent(adapter, state.as_ref(), rest).await,
            "REMOVE" => handle_remove(adapter, state.as_ref(), rest).await,
            _ => adapter.io.send("UNSUPPORTED-REQUEST"),
        }
    }
}

async fn run_interruptible<F>(adapter: &Adapter, on_interrupt: &str, fut: F)
where
    F: std::future::Future<Output = ()>,
{
    tokio::select! {
        () = fut => {}
        _ = tokio::signal::ctrl_c() => {
            adapter.io.send(on_interrupt);
            std::process::exit(1);
        }
    }
}

/// A missing OAuth client-application credential is not a per-command
/// failure the host can retry around — there is no way to INITREMOTE or
/// PREPARE without it — so it is reported as a fatal `ERROR` line and the
/// process exits, rather than as `INITREMOTE-FAILURE`/`PREPARE-FAILURE`.
fn fatal_on_configuration_error(io: &dyn HostIo, e: RemoteError) -> RemoteError {
    if let RemoteError::Configuration(msg) = e {
        io.fatal(&msg);
    }
    e
}

async fn handle_initremote(adapter: &Adapter) {
    run_interruptible(adapter, "INITREMOTE-FAILURE Interrupted by user", async {
        match adapter.credentials.initialize(&adapter.io).await {
            Ok(()) => adapter.io.send("INITREMOTE-SUCCESS"),
            Err(e) => {
                let e = fatal_on_configuration_error(&adapter.io, e);
                adapter
                    .io
                    .send(&format!("INITREMOTE-FAILURE {}", e.reply_text()));
            }
        }
    })
    .await;
}

async fn handle_prepare(adapter: &Adapter) -> Option<RemoteState> {
    let mut result = None;
    run_interruptible(adapter, "PREPARE-FAILURE Interrupted by user", async {
        match adapter.credentials.prepare(&adapter.io).await {
            Ok(()) => match RemoteConfig::load(&adapter.io) {
                Ok(config) => {
                    adapter.io.send("PREPARE-SUCCESS");
                    result = Some(RemoteState::new(config));
                }
                Err(e) => adapter
                    .io
                    .send(&format!("PREPARE-FAILURE {}", e.reply_text())),
            },
            Err(e) => {
                let e = fatal_on_configuration_error(&adapter.io, e);
                adapter
                    .io
                    .send(&format!("PREPARE-FAILURE {}", e.reply_text()));
            }
        }
    })
    .await;
    result
}

async fn handle_transfer(adapter: &Adapter, state: Option<&RemoteState>, rest: &str) {
    let mut fields = rest.splitn(3, ' ');
    let (Some(subcommand), Some(key), Some(filename)) =
        (fields.next(), fields.next(), fields.next())
    else {
        adapter.io.send("UNSUPPORTED-REQUEST");
        return;
    };

    let Some(state) = state else {
        adapter
            .io
            .send(&format!("TRANSFER-FAILURE {subcommand} {key} remote not prepared"));
        return;
    };

    let path = Path::new(filename);
    match subcommand {
        "STORE" => {
            run_interruptible(
                adapter,
                &format!("TRANSFER-FAILURE STORE {key} Interrupted by user"),
                transfer::store(state, adapter, key, path),
            )
            .await;
        }
        "RETRIEVE" => {
            run_interruptible(
                adapter,
                &format!("TRANSFER-FAILURE RETRIEVE {key} Interrupted by user"),
                transfer::retrieve(state, adapter, key, path),
            )
            .await;
        }
        _ => adapter.io.send("UNSUPPORTED-REQUEST"),
    }
}

async fn handle_checkpresent(adapter: &Adapter, state: Option<&RemoteState>, key: &str) {
    let Some(state) = state else {
        adapter
            .io
            .send(&format!("CHECKPRESENT-UNKNOWN {key} remote not prepared"));
        return;
    };
    run_interruptible(
        adapter,
        &format!("CHECKPRESENT-UNKNOWN {key} Interrupted by user"),
        transfer::check(state, adapter, key),
    )
    .await;
}

async fn handle_remove(adapter: &Adapter, state: Option<&RemoteState>, key: &str) {
    let Some(state) = state else {
        adapter
            .io
            .send(&format!("REMOVE-FAILURE {key} remote not prepared"));
        return;
    };
    run_interruptible(
        adapter,
        &format!("REMOVE-FAILURE {key} Interrupted by user"),
        transfer::remove(state, adapter, key),
    )
    .await;
}

/// Refuse to start if either end of our I/O is a terminal, matching the
/// protocol's "never run interactively" contract.
pub fn refuse_if_tty(io: &StdioIo) -> bool {
    io.refuse_if_tty()
}
