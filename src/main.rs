use std::process::ExitCode;
use std::sync::Arc;

use docflow::api::{start_api_server, ApiContext};
use docflow::config::{self, PipelineSettings};
use docflow::db::Database;
use docflow::pipeline::executor::{ExecutorSettings, RunExecutor};
use docflow::pipeline::llm::openrouter::OpenRouterClient;
use docflow::pipeline::llm::LanguageModel;
use docflow::pipeline::loader::pdf::{PdfEngine, PdfiumEngine, UnavailablePdfEngine};
use docflow::pipeline::loader::DocumentLoader;
use docflow::pipeline::scheduler::Scheduler;
use docflow::pipeline::service::{recover_in_flight_runs, RunDefaults};
use docflow::storage::{FileStorage, LocalFileStorage};

fn main() -> ExitCode {
    docflow::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match run(PipelineSettings::from_env()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "docflow exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: PipelineSettings) -> Result<(), String> {
    if let Some(parent) = settings.database_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Cannot create {}: {e}", parent.display()))?;
    }
    let db = Arc::new(Database::open(&settings.database_path).map_err(|e| e.to_string())?);
    tracing::info!(path = %settings.database_path.display(), "Database opened");

    let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(&settings.storage_root));

    let pdf: Arc<dyn PdfEngine> = match PdfiumEngine::new() {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::warn!(error = %e, "PDFium unavailable; PDF runs will fail until it is installed");
            Arc::new(UnavailablePdfEngine::new(e.to_string()))
        }
    };
    let loader = Arc::new(DocumentLoader::new(pdf, settings.loader));

    // reqwest's blocking client must be built and dropped outside the runtime.
    let client = Arc::new(
        OpenRouterClient::new(settings.openrouter.clone()).map_err(|e| e.to_string())?,
    );
    if !client.has_api_key() {
        tracing::warn!("OPENROUTER_API_KEY is not set; runs will fail until it is configured");
    }
    let model: Arc<dyn LanguageModel> = client.clone();

    let executor = Arc::new(RunExecutor::new(
        db.clone(),
        storage,
        loader,
        model,
        ExecutorSettings {
            default_token_limit: settings.max_tokens_per_run,
            default_model: settings.openrouter.default_model.clone(),
            default_temperature: settings.openrouter.default_temperature,
        },
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Cannot start async runtime: {e}"))?;
    let result = runtime.block_on(serve(&settings, db, executor));
    drop(runtime);
    drop(client);
    result
}

async fn serve(
    settings: &PipelineSettings,
    db: Arc<Database>,
    executor: Arc<RunExecutor>,
) -> Result<(), String> {
    let scheduler = Arc::new(Scheduler::start(settings.scheduler, executor));

    match recover_in_flight_runs(&db, &scheduler) {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "Re-queued runs from a previous session"),
        Err(e) => tracing::warn!(error = %e, "Could not recover in-flight runs"),
    }

    let ctx = ApiContext::new(
        db,
        scheduler.clone(),
        RunDefaults {
            model: settings.openrouter.default_model.clone(),
            temperature: settings.openrouter.default_temperature,
        },
    );
    let server = start_api_server(ctx, &settings.bind_addr).await?;
    tracing::info!(addr = %server.addr, "docflow ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");

    server.shutdown().await;
    scheduler.shutdown().await;
    Ok(())
}
