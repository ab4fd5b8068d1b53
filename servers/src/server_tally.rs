use anyhow::Result;
use lib_tally::core::PhaseMonitor;
use lib_tally::election::ProjectionPolicy;
use lib_tally::ingestors::{HttpResultsSource, SourcePoller};
use std::sync::Arc;
use tokio::signal;

mod tally_logic;
use tally_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let settings = config::load_config().resolve();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!(
        "polls open {} / close {}, feed {}",
        settings.calendar.poll_open,
        settings.calendar.poll_close,
        settings.feed_url
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(settings.calendar, settings.api_doc_path.clone());

    let policy = ProjectionPolicy::new(&settings.calendar, settings.stable_wait_minutes);
    let source = HttpResultsSource::new(&settings.feed_url, settings.fetch_retries)?;
    let poller = Arc::new(SourcePoller::new(source, app_state.store.clone(), settings.calendar, policy));
    poller.start().await;

    let monitor = Arc::new(PhaseMonitor::new(
        settings.calendar,
        Arc::clone(&app_state.registry),
        app_state.store.clone(),
    ));
    let monitor_handle = tokio::spawn(monitor.run(settings.phase_tick, shutdown_tx.subscribe()));

    let downstream_handle = tokio::spawn(downstream::run(
        settings.port,
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("SIGTERM handler unavailable: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Stop polling, then signal the remaining components
    poller.stop();
    let _ = shutdown_tx.send(());

    let ((), downstream_result) = tokio::try_join!(monitor_handle, downstream_handle)?;
    downstream_result?;

    log::info!("Shutdown complete.");
    Ok(())
}
