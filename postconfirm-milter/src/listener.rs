use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::{build_callbacks, AppContext};

/// Binds the milter listener and drives every accepted connection
/// through `indymilter`'s own accept loop; each connection becomes an
/// independent cooperative task, matching §5's scheduling model. A
/// SIGTERM or SIGINT stops the accept loop and issues a graceful SMTP
/// QUIT on the re-mailer before returning.
pub async fn serve(listener: TcpListener, app: Arc<AppContext>) -> anyhow::Result<()> {
    info!(port = app.config.milter_port, "listening for milter connections");
    let callbacks = build_callbacks(Arc::clone(&app));

    tokio::select! {
        result = indymilter::run(listener, indymilter::Config::default(), callbacks) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, no longer accepting connections");
        }
    }

    app.remailer.close().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
