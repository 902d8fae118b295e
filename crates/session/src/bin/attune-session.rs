//! Session core executable.
//!
//! Launched by a tuning front-end with stdin/stdout bound to a connected
//! socket; it must not be started by hand. All logging goes to stderr,
//! since stdout carries the protocol.

use std::os::fd::AsFd;
use std::os::unix::fs::FileTypeExt;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use attune_core::ConfigStore;
use attune_session::{serve, PluginRegistry};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ATTUNE_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stdin_fd = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("could not duplicate the stdin descriptor")?;

    let probe = std::fs::File::from(
        stdin_fd
            .try_clone()
            .context("could not duplicate the stdin descriptor")?,
    );
    if !probe
        .metadata()
        .context("could not inspect stdin")?
        .file_type()
        .is_socket()
    {
        bail!("attune-session is launched by a tuning front-end with a socket on stdin; do not run it by hand");
    }

    let std_stream = std::os::unix::net::UnixStream::from(stdin_fd);
    std_stream
        .set_nonblocking(true)
        .context("could not switch the session socket to non-blocking mode")?;
    let stream = tokio::net::UnixStream::from_std(std_stream)
        .context("could not register the session socket with the runtime")?;

    let mut cfg = ConfigStore::new();
    cfg.load_env();

    let registry = PluginRegistry::builtin();
    serve(stream, cfg, &registry)
        .await
        .context("session terminated with an error")
}
