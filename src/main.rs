use anyhow::Context;
use docpipe::{
    api, config,
    config::Config,
    logging,
    metrics::PipelineMetrics,
    notify::{NotificationDispatcher, QuickShareDispatcher, transport_from_config},
    ocr::HttpOcrClient,
    processing::{DocumentProcessor, HierarchicalSummarizer, ProcessingSupervisor},
    service::PipelineService,
    storage::{InMemoryObjectStorage, ObjectStorage, RestObjectStorage},
    store::{DocumentStore, InMemoryStore, NotificationStore, QuickShareStore, RestStore},
    summarization::HttpSummarizationClient,
    upload::UploadCoordinator,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

struct Backends {
    documents: Arc<dyn DocumentStore>,
    notifications: Arc<dyn NotificationStore>,
    quick_shares: Arc<dyn QuickShareStore>,
    storage: Arc<dyn ObjectStorage>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let metrics = Arc::new(PipelineMetrics::new());
    let Backends {
        documents,
        notifications,
        quick_shares,
        storage,
    } = build_backends(config)?;
    let ocr = Arc::new(HttpOcrClient::from_config(config)?);

    let summarizer = HierarchicalSummarizer::new(
        Arc::new(HttpSummarizationClient::from_config(config)?),
        config.chunk_max_words,
        config.chunk_overlap_words,
    )?
    .with_call_timeout(config.summarizer_timeout);
    let processor = DocumentProcessor::new(
        documents.clone(),
        notifications.clone(),
        storage.clone(),
        config.storage_bucket.clone(),
        ocr.clone(),
        summarizer,
    )
    .with_metrics(metrics.clone())
    .with_ocr_timeout(config.ocr_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (supervisor, worker) = ProcessingSupervisor::start(
        Arc::new(processor),
        config.worker_concurrency,
        config.worker_queue_capacity,
        shutdown_rx.clone(),
    );

    let transport = transport_from_config(config)?;
    let dispatcher = NotificationDispatcher::new(
        documents.clone(),
        notifications,
        transport.clone(),
        config.notify_interval,
    )
    .with_metrics(metrics.clone());
    let dispatch = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    let quick_share_dispatcher = QuickShareDispatcher::new(
        documents.clone(),
        quick_shares,
        transport,
        config.quick_share_interval,
    )
    .with_metrics(metrics.clone());
    let quick_share_dispatch = tokio::spawn(quick_share_dispatcher.run(shutdown_rx.clone()));

    if let Some(interval) = config.recovery_interval {
        tracing::info!(interval_secs = interval.as_secs(), "Recovery sweep enabled");
        tokio::spawn(
            supervisor
                .clone()
                .run_recovery(documents.clone(), interval, shutdown_rx),
        );
    }

    let uploads = UploadCoordinator::new(
        documents.clone(),
        storage,
        config.storage_bucket.clone(),
        supervisor.clone(),
        metrics.clone(),
    );
    let app = api::create_router(Arc::new(PipelineService::new(
        documents, uploads, supervisor, ocr, metrics,
    )));

    let (listener, port) = bind_listener().await.context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(worker, dispatch, quick_share_dispatch);
    Ok(())
}

fn build_backends(config: &Config) -> anyhow::Result<Backends> {
    match &config.store_url {
        Some(url) => {
            tracing::info!(store = %url, "Using REST store and object storage");
            let store = Arc::new(RestStore::new(
                url,
                config.store_api_key.clone(),
                config.http_timeout,
            )?);
            Ok(Backends {
                documents: store.clone(),
                notifications: store.clone(),
                quick_shares: store,
                storage: Arc::new(RestObjectStorage::new(
                    url,
                    config.store_api_key.clone(),
                    config.http_timeout,
                )?),
            })
        }
        None => {
            tracing::warn!("STORE_URL not set; documents are kept in memory only");
            let store = Arc::new(InMemoryStore::new());
            Ok(Backends {
                documents: store.clone(),
                notifications: store.clone(),
                quick_shares: store,
                storage: Arc::new(InMemoryObjectStorage::new()),
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
