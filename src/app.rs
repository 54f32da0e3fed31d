use crate::classifier::Classifier;
use crate::config::Config;
use crate::labels::ClassLabels;
use crate::ort_classifier::OrtClassifier;
use crate::server::HttpServer;
use crate::spool::TempSpool;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let labels = ClassLabels::new(config.model.labels.clone())?;

    let classifier: Arc<dyn Classifier> = match OrtClassifier::new(&config.model, labels) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return Err(e);
        }
    };

    let spool = match TempSpool::new(config.upload.temp_dir.clone()) {
        Ok(spool) => Arc::new(spool),
        Err(e) => {
            tracing::error!("Failed to prepare upload spool: {}", e);
            return Err(Box::new(e));
        }
    };

    let index_html = std::fs::read_to_string(config.assets.get_index_path()).map_err(|e| {
        tracing::error!("Failed to read index template: {}", e);
        e
    })?;

    let server = HttpServer::new(classifier, spool, index_html, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
