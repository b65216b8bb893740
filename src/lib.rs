//! `git-annex-remote-hubic`: a git-annex external special remote backed
//! by hubiC (OpenStack Swift). Speaks the external special remote line
//! protocol over stdin/stdout; everything else — OAuth2, Swift, chunked
//! transfer — exists to answer that protocol's commands.

pub mod cache;
pub mod callback;
pub mod config;
pub mod credentials;
pub mod error;
pub mod host;
pub mod pathresolve;
pub mod protocol;
pub mod swift;
pub mod transfer;
