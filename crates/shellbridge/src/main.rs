//! # shellbridge
//!
//! Drives one instrumented shell from stdin.
//!
//! Each input line is executed as a command (or handled as a `!` directive)
//! and answered with one JSON line on stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use shellbridge::{dispatch, reply_schema, CancelSlot, CliArgs, Directive};
use shellbridge_session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    if args.schema {
        println!("{}", serde_json::to_string_pretty(&reply_schema())?);
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.session_config()?;
    let options = args.session_options()?;
    let timeout = args.timeout;

    tracing::info!(
        "shellbridge v{} starting in {}",
        env!("CARGO_PKG_VERSION"),
        options.work_dir.display()
    );

    let session = Arc::new(Session::new(options, config).context("failed to create session")?);
    {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.initialize())
            .await?
            .context("failed to start shell")?;
    }
    tracing::info!(
        "Session {} ready on the {} backend",
        session.id(),
        session.backend_kind()
    );

    let slot = CancelSlot::default();
    tokio::spawn(forward_interrupts(session.clone(), slot.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let Some(directive) = Directive::parse(&line) else {
            continue;
        };
        let reply = {
            let session = session.clone();
            let token = slot.arm();
            tokio::task::spawn_blocking(move || dispatch(&session, directive, timeout, &token))
                .await?
        };
        stdout.write_all(reply.to_json_line().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("End of input, closing session {}", session.id());
    tokio::task::spawn_blocking(move || session.close()).await??;

    Ok(())
}

/// On each Ctrl-C, stop waiting for the current command and interrupt it.
async fn forward_interrupts(session: Arc<Session>, slot: CancelSlot) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Ctrl-C received");
        slot.cancel();

        let session = session.clone();
        match tokio::task::spawn_blocking(move || session.interrupt()).await {
            Ok(Ok(delivered)) => tracing::info!("Interrupt delivered: {}", delivered),
            Ok(Err(e)) => tracing::debug!("Nothing to interrupt: {}", e),
            Err(e) => tracing::warn!("Interrupt task failed: {}", e),
        }
    }
}
