pub mod activity;
pub mod api;
pub mod config;
pub mod events;
pub mod inactivity;
pub mod liveness;
pub mod session;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use palaver_shared::{Handle, MessageBody};

use crate::activity::SharedActivityBoard;
use crate::api::HttpChatApi;
use crate::config::ClientConfig;
use crate::events::LogView;
use crate::inactivity::Interaction;
use crate::session::ClientSession;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("palaver_client=debug,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log in and run a headless session until logout, inactivity or Ctrl-C.
///
/// Each line read from stdin counts as an interaction and is sent to the
/// open private conversation, or to the room when none is open.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let handle = config.handle.clone().context("PALAVER_USER is not set")?;
    let password = config
        .password
        .clone()
        .context("PALAVER_PASSWORD is not set")?;

    let api = Arc::new(HttpChatApi::new(config.server_url.clone())?);
    let grant = api
        .login(&handle, &password)
        .await
        .context("login failed")?;
    info!(
        handle = %grant.handle,
        role = grant.role.as_str(),
        server = %config.server_url,
        "Logged in"
    );

    let session = ClientSession::start(
        grant.handle.clone(),
        api,
        Arc::new(LogView),
        Arc::new(SharedActivityBoard::new()),
        &config,
    );
    if let Some(peer) = &config.peer {
        session.open_private(Handle::parse(peer)?).await;
    }

    let private = config.peer.is_some();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                session.logout().await;
                break;
            }
            reason = session.wait() => {
                info!(reason = %reason, "Session ended");
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                session.interaction(Interaction::Input);
                if line.trim().is_empty() {
                    continue;
                }
                let body = MessageBody::text(line);
                let sent = if private {
                    session.send_private(body).await
                } else {
                    session.send_room(body).await
                };
                if let Err(e) = sent {
                    warn!(error = %e, "Send failed");
                }
            }
        }
    }

    let reason = session.wait().await;
    info!(reason = %reason, "Session ended");
    Ok(())
}
