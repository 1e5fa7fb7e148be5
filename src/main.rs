use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use rscan_dispatch::{
    cli::{Cli, Commands, RequestType},
    config::Config,
    display::DisplayManager,
    extract::extract_display_target,
    model::DispatchContext,
    query::{MatchMode, SearchEngine},
    queue::{MemoryTaskQueue, RedisTaskQueue, TaskId, TaskSubmitter},
    resolve::DnsResolver,
    store::{DomainRecordStore, KeywordRuleStore, MemoryStore, OrganizationStore, PgStore},
    suffix::SuffixList,
    target::{classify, split_target_lines},
    Dispatcher,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process;
use std::time::Instant;
use uuid::Uuid;

/// Rule, organization and record storage picked at startup
enum Stores {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl Stores {
    async fn open(config: &Config, snapshot: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = snapshot {
            return Ok(Stores::Memory(MemoryStore::load_from_file(path)?));
        }
        match &config.store.postgres_url {
            Some(url) => Ok(Stores::Postgres(PgStore::connect(url).await?)),
            None => Ok(Stores::Memory(MemoryStore::new())),
        }
    }

    fn rules(&self) -> &dyn KeywordRuleStore {
        match self {
            Stores::Memory(store) => store,
            Stores::Postgres(store) => store,
        }
    }

    fn organizations(&self) -> &dyn OrganizationStore {
        match self {
            Stores::Memory(store) => store,
            Stores::Postgres(store) => store,
        }
    }

    fn records(&self) -> &dyn DomainRecordStore {
        match self {
            Stores::Memory(store) => store,
            Stores::Postgres(store) => store,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);

    let config = match &cli.config {
        Some(config_path) => match Config::load_from_file(&config_path.to_string_lossy()) {
            Ok(config) => {
                display.print_success(&format!(
                    "Loaded configuration from {}",
                    config_path.display()
                ));
                config
            }
            Err(e) => {
                display.print_warning(&format!(
                    "Failed to load configuration: {}, using defaults",
                    e
                ));
                Config::default()
            }
        },
        None => Config::default(),
    };

    let start_time = Instant::now();

    let result = match &cli.command {
        Commands::Dispatch {
            request,
            request_file,
            main_task_id,
            workspace,
            dry_run,
            rules,
        } => {
            display.print_banner("RSCAN DISPATCH", Some("Authorized Testing Only"));
            let main_task_id = main_task_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            let ctx = DispatchContext::new(main_task_id, *workspace);
            execute_dispatch(
                &config,
                &display,
                *request,
                request_file,
                &ctx,
                *dry_run,
                rules.as_deref(),
            )
            .await
        }
        Commands::Compile {
            engine,
            keyword,
            exclude,
            mode,
        } => execute_compile(engine, keyword, exclude, mode),
        Commands::Classify { file } => execute_classify(&display, file),
        Commands::ShowTarget { kind, file } => execute_show_target(&config, kind, file).await,
        Commands::InitConfig { output } => execute_init_config(&display, output),
    };

    match result {
        Ok(()) => {
            log::debug!("Finished in {:.2}s", start_time.elapsed().as_secs_f64());
        }
        Err(e) => {
            display.print_error(&format!("{:#}", e));
            process::exit(1);
        }
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid request body in {}", path.display()))
}

async fn execute_dispatch(
    config: &Config,
    display: &DisplayManager,
    request: RequestType,
    request_file: &Path,
    ctx: &DispatchContext,
    dry_run: bool,
    rules: Option<&Path>,
) -> anyhow::Result<()> {
    display.print_section_header(&format!("DISPATCH {}", request.to_string().to_uppercase()));

    let owned_suffixes;
    let suffixes = match &config.domainscan.suffix_list {
        Some(path) => {
            owned_suffixes = SuffixList::from_file(path)?;
            &owned_suffixes
        }
        None => SuffixList::bundled(),
    };

    let stores = Stores::open(config, rules).await?;
    let resolver = DnsResolver::new();

    let memory_queue = MemoryTaskQueue::new();
    let redis_queue = if dry_run {
        None
    } else {
        Some(RedisTaskQueue::connect(&config.queue.redis_url, &config.queue.queue_key).await?)
    };
    let submitter: &dyn TaskSubmitter = match &redis_queue {
        Some(queue) => queue,
        None => &memory_queue,
    };

    let dispatcher = Dispatcher::new(
        config,
        submitter,
        stores.rules(),
        stores.records(),
        &resolver,
        suffixes,
    );

    let file = request_file;
    let tasks: Vec<TaskId> = match request {
        RequestType::Portscan => dispatcher.start_port_scan(&read_request(file)?, ctx).await?,
        RequestType::Batchscan => dispatcher.start_batch_scan(&read_request(file)?, ctx).await?,
        RequestType::Domainscan => dispatcher.start_domain_scan(&read_request(file)?, ctx).await?,
        RequestType::Pocscan => dispatcher.start_poc_scan(&read_request(file)?, ctx).await?,
        RequestType::Xkeyword => {
            dispatcher
                .start_xonline_keyword(&read_request(file)?, ctx)
                .await?
        }
        RequestType::XkeywordRules => {
            dispatcher
                .start_xonline_keyword_rules(&read_request(file)?, ctx)
                .await?
        }
        RequestType::Xdomain => dispatcher.start_xdomain_scan(&read_request(file)?, ctx).await?,
        RequestType::Xport => dispatcher.start_xport_scan(&read_request(file)?, ctx).await?,
        RequestType::Xorg => dispatcher.start_xorg_scan(&read_request(file)?, ctx).await?,
    };

    if dry_run {
        display.print_task_list(&memory_queue.submitted());
    }
    if tasks.is_empty() {
        display.print_warning("Request produced no sub-tasks");
    } else {
        display.print_success(&format!(
            "Started {} sub-tasks under {}",
            tasks.len(),
            ctx.main_task_id
        ));
    }
    Ok(())
}

fn execute_compile(engine: &str, keyword: &str, exclude: &str, mode: &str) -> anyhow::Result<()> {
    let engine: SearchEngine = engine.parse()?;
    println!("{}", engine.compile(MatchMode::parse(mode), keyword, exclude));
    Ok(())
}

fn execute_classify(display: &DisplayManager, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read targets {}", file.display()))?;
    for line in split_target_lines(&content) {
        display.print_classified(&line, classify(&line));
    }
    Ok(())
}

async fn execute_show_target(config: &Config, kind: &str, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read task config {}", file.display()))?;
    let stores = Stores::open(config, None).await?;
    println!("{}", extract_display_target(kind, content.trim(), stores.organizations()).await);
    Ok(())
}

fn execute_init_config(display: &DisplayManager, output: &Path) -> anyhow::Result<()> {
    Config::default().save_to_file(&output.to_string_lossy())?;
    display.print_success(&format!("Wrote default configuration to {}", output.display()));
    Ok(())
}
