//! CLI subcommand handlers.

use ragchat_core::backend::{fetch_model_listing, HttpBackend, ModelListing, RagBackend};
use ragchat_core::gateway::{run_gateway, GatewayServer};
use ragchat_core::{dispatch, ChatSession, DispatchCallback, DispatchOutcome, RagChatConfig};
use ragchat_core::SubmissionState;
use std::io::{self, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prints streamed fragments to stdout as they arrive.
struct StdoutCallback;

#[async_trait::async_trait]
impl DispatchCallback for StdoutCallback {
    async fn on_user_turn(&self, _text: &str) {}

    async fn on_state_change(&self, state: SubmissionState) {
        debug!(%state, "Submission state");
    }

    async fn on_fragment(&self, delta: &str, _text: &str) {
        print!("{}", delta);
        let _ = io::stdout().flush();
    }

    async fn on_finished(&self, outcome: &DispatchOutcome) {
        if !outcome.text().is_empty() {
            println!();
        }
    }
}

/// Run the chat gateway until Ctrl-C or SIGTERM.
pub async fn serve(config: RagChatConfig) -> anyhow::Result<()> {
    let backend: Arc<dyn RagBackend> = Arc::new(HttpBackend::new(config.backend)?);
    info!(
        backend = %backend.describe(),
        title = %config.server.title,
        "Starting chat gateway"
    );

    // The page fetches its own list on connect; this only surfaces a bad
    // backend early in the logs.
    if let ModelListing::Unavailable { reason } = fetch_model_listing(backend.as_ref()).await {
        warn!(%reason, "Backend models unavailable at startup; serving anyway");
    }

    println!("RagChat on http://{}", config.server.bind_addr());
    let gw = GatewayServer::new(config.server, backend).shared();
    run_gateway(gw, shutdown_signal()).await?;
    Ok(())
}

/// Print the backend's models, or why they could not be listed.
pub async fn models(config: RagChatConfig) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend)?;
    let listing = fetch_model_listing(&backend).await;
    match &listing {
        ModelListing::Available(_) => {
            print!("{}", format_listing(&listing));
            Ok(())
        }
        ModelListing::Unavailable { reason } => anyhow::bail!("{}", reason),
    }
}

/// Ask one question and stream the answer to stdout.
pub async fn ask(
    config: RagChatConfig,
    question: &str,
    model: Option<String>,
) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend)?;
    let mut session = ChatSession::new();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let outcome = dispatch(
        &mut session,
        &backend,
        model,
        question,
        &cancel,
        &StdoutCallback,
    )
    .await?;

    match outcome {
        DispatchOutcome::Completed { .. } => Ok(()),
        DispatchOutcome::Failed { error, .. } => anyhow::bail!("Answer failed: {}", error),
        DispatchOutcome::Cancelled { .. } => anyhow::bail!("Cancelled"),
    }
}

/// One line per model, the default marked with `*`.
fn format_listing(listing: &ModelListing) -> String {
    let default = listing.default_model();
    listing
        .options()
        .iter()
        .map(|opt| {
            let marker = if Some(opt.value.as_str()) == default {
                "*"
            } else {
                " "
            };
            format!("{} {}\n", marker, opt.label)
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
