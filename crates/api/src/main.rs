use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foldserve_api::config::ServerConfig;
use foldserve_api::services::{InferenceService, MsaService, TrainingService};
use foldserve_api::state::AppState;
use foldserve_engine::{JobExecutor, ProcessBackend, ProcessBackendConfig};
use foldserve_events::EventBus;
use foldserve_proto::v1::inference_service_server::InferenceServiceServer;
use foldserve_proto::v1::msa_service_server::MsaServiceServer;
use foldserve_proto::v1::training_service_server::TrainingServiceServer;
use foldserve_proto::v1::FILE_DESCRIPTOR_SET;
use foldserve_registry::JobRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foldserve=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        inference_port = config.inference_port,
        training_port = config.training_port,
        msa_port = config.msa_port,
        "Loaded server configuration",
    );

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .expect("Failed to create cache directory");

    // --- Registry and event bus ---
    let registry = Arc::new(JobRegistry::new());
    let event_bus = Arc::new(EventBus::default());

    // Mirror job lifecycle events into the structured log.
    let mirror_handle = tokio::spawn(foldserve_events::run_log_mirror(event_bus.subscribe()));

    // --- Execution backend and executor ---
    let backend = Arc::new(ProcessBackend::new(ProcessBackendConfig {
        cache_dir: config.cache_dir.clone(),
        predict_command: config.predict_command.clone(),
        msa_command: config.msa_command.clone(),
        train_command: config.train_command.clone(),
        sequence_db_path: config.sequence_db_path.clone(),
    }));

    let executor = JobExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&event_bus),
        backend,
        config.max_concurrent_jobs,
    );
    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Job executor started",
    );

    // --- App state ---
    let state = AppState {
        registry: Arc::clone(&registry),
        executor: Arc::clone(&executor),
        event_bus: Arc::clone(&event_bus),
        config: Arc::new(config.clone()),
    };

    // --- Servers (one per service, operator port convention) ---
    let host: std::net::IpAddr = config.host.parse().expect("Invalid FOLDSERVE_HOST address");
    let shutdown = CancellationToken::new();
    let mut server_handles = Vec::new();
    // Health reporters stay alive for the lifetime of the servers.
    let mut health_reporters = Vec::new();

    // Inference service.
    {
        let addr = SocketAddr::new(host, config.inference_port);
        let service = InferenceServiceServer::new(InferenceService::new(state.clone()));

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<InferenceServiceServer<InferenceService>>()
            .await;
        health_reporters.push(health_reporter);

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let shutdown = shutdown.clone();
        tracing::info!(%addr, "Starting inference service");
        server_handles.push(tokio::spawn(async move {
            let result = Server::builder()
                .layer(TraceLayer::new_for_grpc())
                .add_service(health_service)
                .add_service(reflection)
                .add_service(service)
                .serve_with_shutdown(addr, shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Inference server exited with error");
            }
        }));
    }

    // Training service.
    {
        let addr = SocketAddr::new(host, config.training_port);
        let service = TrainingServiceServer::new(TrainingService::new(state.clone()));

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<TrainingServiceServer<TrainingService>>()
            .await;
        health_reporters.push(health_reporter);

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let shutdown = shutdown.clone();
        tracing::info!(%addr, "Starting training service");
        server_handles.push(tokio::spawn(async move {
            let result = Server::builder()
                .layer(TraceLayer::new_for_grpc())
                .add_service(health_service)
                .add_service(reflection)
                .add_service(service)
                .serve_with_shutdown(addr, shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Training server exited with error");
            }
        }));
    }

    // MSA service.
    {
        let addr = SocketAddr::new(host, config.msa_port);
        let service = MsaServiceServer::new(MsaService::new(state.clone()));

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<MsaServiceServer<MsaService>>()
            .await;
        health_reporters.push(health_reporter);

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let shutdown = shutdown.clone();
        tracing::info!(%addr, "Starting MSA service");
        server_handles.push(tokio::spawn(async move {
            let result = Server::builder()
                .layer(TraceLayer::new_for_grpc())
                .add_service(health_service)
                .add_service(reflection)
                .add_service(service)
                .serve_with_shutdown(addr, shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "MSA server exited with error");
            }
        }));
    }

    // --- Wait for termination ---
    shutdown_signal().await;

    // --- Graceful shutdown ---
    tracing::info!("Stopping gRPC servers");
    shutdown.cancel();
    for handle in server_handles {
        let _ = handle.await;
    }

    // Request cancellation of in-flight jobs and wait for the drain window.
    executor
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    // Drop the event bus senders to close the broadcast channel. This
    // signals the log mirror to shut down.
    drop(state);
    drop(executor);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), mirror_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
