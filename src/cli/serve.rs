use anyhow::{Result, anyhow};
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::ServeArgs;
use crate::core::agents::AgentRegistry;
use crate::core::bus::NotificationBus;
use crate::core::config::{self, Config};
use crate::core::gateway::{GenerationGateway, GenericProvider};
use crate::core::interview::InterviewScheduler;
use crate::core::jobs::handlers::{HandlerDeps, builtin_handlers};
use crate::core::jobs::{JobQueue, recurring};
use crate::core::lifecycle::LifecycleManager;
use crate::core::prompts::{self, PromptStore};
use crate::core::router::Router;
use crate::core::store::Storage;
use crate::core::terminal::{self, print_status};
use crate::interfaces::items::{ItemSource, MemoryItemSource};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::BroadcastMakeWriter;

/// Boots the whole engine in one process: storage, gateway, agents, job
/// queue, recurring schedule, and the API server. Runs until Ctrl+C.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let workspace = args
        .workspace
        .clone()
        .unwrap_or_else(config::default_workspace);
    std::fs::create_dir_all(&workspace)?;

    let mut config = Config::load(&workspace)?;
    if let Some(host) = args.api_host {
        config.api_host = host;
    }
    if let Some(port) = args.api_port {
        config.api_port = port;
    }
    config.validate()?;

    let (log_tx, _keepalive) = tokio::sync::broadcast::channel::<String>(512);
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(BroadcastMakeWriter {
            sender: log_tx.clone(),
        })
        .with_ansi(false)
        .init();

    terminal::print_banner();

    // Agents and their templates are verified before anything serves.
    let registry = AgentRegistry::bootstrap();
    registry.verify_complete()?;
    let prompts_dir = config.prompts_dir();
    prompts::seed_default_templates(&prompts_dir)?;
    let prompt_store = Arc::new(PromptStore::open(&prompts_dir)?);
    prompt_store.preload(&registry.template_ids())?;

    let store = Storage::open(workspace.join("adjutant.db")).await?;
    let bus = NotificationBus::new();

    let api_key = config
        .provider
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("provider credential vanished after validation"))?;
    let provider = Arc::new(GenericProvider::new(config.provider.clone(), api_key));
    let gateway = GenerationGateway::new(
        provider,
        config.provider.model.clone(),
        config.gateway.clone(),
    );

    let interviews = Arc::new(InterviewScheduler::new(store.clone()));
    let items: Arc<dyn ItemSource> = Arc::new(MemoryItemSource::new());
    let handlers = builtin_handlers(HandlerDeps {
        gateway: gateway.clone(),
        prompts: prompt_store.clone(),
        interviews: interviews.clone(),
        items,
        bus: bus.clone(),
    });
    let queue = JobQueue::new(store, bus.clone(), handlers, config.queue.clone());
    let events = Arc::new(Router::new(
        registry,
        gateway.clone(),
        prompt_store,
        queue.clone(),
        interviews.clone(),
        config.router.clone(),
    ));

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(gateway.clone())));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        events,
        queue: queue.clone(),
        bus,
        interviews,
        gateway,
        log_tx,
        api_host: config.api_host.clone(),
        api_port: config.api_port,
    }))));

    queue.start().await?;
    recurring::register_recurring(&lifecycle.scheduler, queue.clone()).await?;
    lifecycle.start().await?;

    print_status("Workspace", &workspace.display().to_string());
    print_status(
        "API",
        &format!(
            "{}",
            style(format!("http://{}:{}", config.api_host, config.api_port)).cyan()
        ),
    );
    print_status("Model", &config.provider.model);
    println!(
        "\n  Press {} to stop.\n",
        style("Ctrl+C").bold().yellow()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    queue.stop();
    lifecycle.shutdown().await?;
    Ok(())
}
