use clap::Parser;
use std::process::ExitCode;
use tasker_core::store::TaskStore;
use tasker_server::server::config::{CliArgs, ServerConfig};
use tasker_server::server::service::handler::TaskService;
use tasker_server::server::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if tracing::dispatcher::has_been_set() {
                tracing::error!("{err:#}");
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(&config.telemetry)?;
    let span = config.telemetry.metadata.span();

    async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()).in_current_span());

        let mut server = config.http.build()?;
        let store = TaskStore::open(&config.database).await?;
        let service = TaskService::new(store.clone());
        server.register_service(service.clone())?;
        log_startup_info(&config);

        let result = server.run(shutdown).await;

        service.close();
        store.close().await;
        result?;

        tracing::info!("Service shut down successfully");
        Ok::<_, anyhow::Error>(())
    }
    .instrument(span)
    .await
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting task service with full config: {:#?}", config);
    } else {
        tracing::info!(
            network = %config.http.network,
            address = %config.http.address,
            grace_period = ?config.http.grace_period,
            database = %config.database.filename,
            "Starting task service"
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{SignalKind, signal};

        let (mut term, mut quit) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) {
            (Ok(term), Ok(quit)) => (term, quit),
            (Err(err), _) | (_, Err(err)) => {
                tracing::error!("failed to install signal handler: {err}");
                return core::future::pending::<&str>().await;
            }
        };
        tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<&str>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
            core::future::pending::<()>().await;
        }
    };

    let received = tokio::select! {
        () = ctrl_c => "SIGINT",
        name = terminate => name,
    };

    tracing::info!("Received {received} signal, terminating gracefully...");
    shutdown.cancel();
}
