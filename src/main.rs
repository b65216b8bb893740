use eyre::Result;
use git_annex_remote_hubic::{credentials, host, protocol};
use host::{Adapter, StdioIo};
use tracing_subscriber::EnvFilter;

/// Top-level orchestration only: set up logging, refuse to run interactively,
/// build the credential manager, then hand off to the protocol loop. Command
/// handling itself never bubbles an error up this far — the dispatch loop
/// maps every `RemoteError` to a `*-FAILURE` reply line instead.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let io = StdioIo::default();
    if protocol::refuse_if_tty(&io) {
        eprintln!(
            "Don't run this by yourself! Use git annex initremote type=external externaltype=hubic"
        );
        std::process::exit(1);
    }

    let adapter = Adapter::new(io, credentials::CredentialManager::new());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(protocol::run(&adapter));
    Ok(())
}
