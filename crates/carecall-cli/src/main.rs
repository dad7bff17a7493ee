//! # carecall
//!
//! Headless call client. Places or answers appointment calls over a real
//! relay, with simulated capture devices standing in for the microphone and
//! camera. Useful for exercising a relay deployment end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use carecall_core::sim::{SimDevices, SimPeerFactory};
use carecall_core::{
    CallClient, CallHandle, CallOutcome, CallSettings, CallStatus, IncomingEvent, MediaBackend,
    MediaKind, MemoryChatStore, Notice, OutgoingCall,
};
use carecall_signaling::{Credentials, WsTransport};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "carecall", version, about = "Headless CareCall client")]
struct Cli {
    /// Config file. Defaults to ./carecall.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call the other party of an appointment.
    Call {
        /// Appointment the call belongs to
        #[arg(long)]
        appointment: String,

        /// User id of the party to call
        #[arg(long)]
        to: String,

        /// Request a video call
        #[arg(long)]
        video: bool,

        /// Hang up this many seconds after the call connects
        #[arg(long)]
        hangup_after: Option<u64>,
    },
    /// Wait for incoming calls.
    Listen {
        /// Answer every incoming call instead of declining it
        #[arg(long)]
        auto_answer: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = carecall_common::config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carecall=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting carecall v{}", env!("CARGO_PKG_VERSION"));

    let token = config
        .signaling
        .token
        .clone()
        .context("no relay token configured; set CARECALL__SIGNALING__TOKEN")?;

    let client = CallClient::new(
        Arc::new(WsTransport::from_config(&config.signaling)),
        MediaBackend::new(
            Arc::new(SimDevices::new()),
            Arc::new(SimPeerFactory::auto_connect()),
        ),
        Arc::new(MemoryChatStore::new()),
        CallSettings::from(&config),
    );

    let ready = client
        .connect(&Credentials::bearer(token))
        .await
        .with_context(|| format!("connecting to {}", config.signaling.url))?;
    info!(session = %ready.session_id, relay = %config.signaling.url, "Connected to relay");
    let settings = client.settings();
    info!(
        ring_timeout_secs = settings.ring_timeout_secs,
        ice_servers = settings.ice_servers.len(),
        busy_policy = ?settings.busy_policy,
        "Call settings"
    );

    let result = match cli.command {
        Command::Call {
            appointment,
            to,
            video,
            hangup_after,
        } => {
            place_call(
                &client,
                OutgoingCall {
                    appointment_id: appointment,
                    remote_party_id: to,
                    media_kind: MediaKind::from_video(video),
                },
                hangup_after.map(Duration::from_secs),
            )
            .await
        }
        Command::Listen { auto_answer } => listen(&client, auto_answer).await,
    };

    client.shutdown().await;
    result
}

async fn place_call(
    client: &CallClient,
    request: OutgoingCall,
    hangup_after: Option<Duration>,
) -> anyhow::Result<()> {
    info!(appointment = %request.appointment_id, to = %request.remote_party_id, "Placing call");
    let call = client.start_outgoing(request).await?;
    let outcome = follow(call, hangup_after).await;
    report(&outcome);
    if outcome.is_failure() {
        anyhow::bail!(outcome.user_message());
    }
    Ok(())
}

async fn listen(client: &CallClient, auto_answer: bool) -> anyhow::Result<()> {
    let mut listener = client.incoming_calls();
    info!(auto_answer, "Waiting for incoming calls");

    loop {
        let event = tokio::select! {
            event = listener.next() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };

        match event {
            Some(IncomingEvent::Incoming(call)) if auto_answer => {
                let handle = client.accept_incoming(call).await?;
                // Followed on its own task so the listener keeps applying the
                // busy policy meanwhile.
                tokio::spawn(async move {
                    let outcome = follow(handle, None).await;
                    report(&outcome);
                });
            }
            Some(IncomingEvent::Incoming(call)) => {
                info!(caller = %call.caller, "Declining call (run with --auto-answer to accept)");
                client.reject_incoming(&call).await?;
            }
            Some(IncomingEvent::Withdrawn { call_id, reason }) => {
                info!(call = ?call_id, reason = ?reason, "Incoming call withdrawn");
            }
            Some(IncomingEvent::LinkLost { reason }) => {
                anyhow::bail!("signaling link lost: {reason}");
            }
            None => anyhow::bail!("signaling link closed"),
        }
    }
}

/// Log the call's progress until it terminates. Ctrl-C hangs up.
async fn follow(call: CallHandle, hangup_after: Option<Duration>) -> CallOutcome {
    let mut snapshots = call.watch();
    let mut notices = call.notices();
    let mut last = call.status();
    let mut hangup_armed = hangup_after.is_some();
    info!(status = %last, "Following call");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = snapshots.borrow_and_update().clone();
                if session.status != last {
                    info!(
                        from = %last,
                        to = %session.status,
                        call = ?session.session_id,
                        ring_remaining_secs = ?session.timer.ring_remaining_secs,
                        "Call status"
                    );
                    last = session.status;
                }
                if session.status == CallStatus::Connected && hangup_armed {
                    hangup_armed = false;
                    if let Some(after) = hangup_after {
                        let call = call.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(after).await;
                            info!("Hanging up");
                            call.end_call();
                        });
                    }
                }
                if session.status.is_terminal() {
                    break;
                }
            }
            notice = notices.recv() => match notice {
                Ok(Notice::Terminated { .. }) => {}
                Ok(notice) => info!(?notice, "Call notice"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Missed call notices"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; hanging up");
                call.end_call();
            }
        }
    }

    call.wait_terminated().await
}

fn report(outcome: &CallOutcome) {
    match outcome {
        CallOutcome::Ended(reason) => {
            info!(reason = reason.code(), "{}", reason.user_message());
        }
        CallOutcome::Failed(err) => {
            error!(code = err.error_code(), error = %err, "{}", err.user_message());
        }
    }
}
