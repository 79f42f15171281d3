use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};

use crate::cli::{Args, Commands, DatabaseCommands};
use crate::config::Config;
use crate::job::Repository;
use crate::protocol::StratumSessionFactory;
use crate::server::Server;
use crate::services::database::DatabaseService;
use crate::services::kafka::{JobConsumer, KafkaShareSink};
use crate::user::Registry;

pub async fn execute(args: Args) -> Result<()> {
    setup_logging(&args)?;

    match args.command {
        Commands::Start {
            bind,
            server_id,
            brokers,
        } => {
            let mut config = match &args.config {
                Some(path) => Config::load_from_file(path)?,
                None => Config::default(),
            };
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(server_id) = server_id {
                config.server.id = server_id;
            }
            if let Some(brokers) = brokers {
                config.kafka.brokers = brokers;
            }
            config.validate()?;

            start_server(Arc::new(config)).await
        }
        Commands::Config { file, show } => {
            let config = Config::load_from_file(&file)?;
            config.validate()?;
            info!("configuration {} is valid", file.display());
            if show {
                println!("{config:#?}");
            }
            Ok(())
        }
        Commands::Database { command, url } => database_command(command, url).await,
    }
}

async fn start_server(config: Arc<Config>) -> Result<()> {
    info!("starting pool server (id {})", config.server.id);

    let database = Arc::new(DatabaseService::new(&config.database.url).await?);
    database.migrate().await?;

    let registry = Arc::new(Registry::new(&config, database.clone()));
    let registry_tasks = registry.clone().start();

    let repository = Arc::new(Repository::new(&config));
    let consumer = JobConsumer::new(
        &config.kafka.brokers,
        &config.kafka.job_topic,
        &format!("stratum-server-{}", config.server.id),
    )?;
    let repository_tasks = repository.clone().start(consumer);

    let sink = Arc::new(KafkaShareSink::new(&config.kafka)?);
    let server = Arc::new(Server::new(
        config.clone(),
        repository.clone(),
        registry.clone(),
        sink,
    ));
    let factory = Arc::new(StratumSessionFactory::new(server.clone()));

    let listener = server.bind().await?;
    let server_task = tokio::spawn({
        let server = server.clone();
        async move {
            server.run(listener, factory).await;
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = server_task => {
            result?;
        }
    }

    info!("stopping server");
    server.stop();
    for task in repository_tasks.into_iter().chain(registry_tasks) {
        task.abort();
    }
    info!("server stopped");

    Ok(())
}

async fn database_command(command: DatabaseCommands, url: String) -> Result<()> {
    let database = DatabaseService::new(&url).await?;

    match command {
        DatabaseCommands::Migrate => {
            database.migrate().await?;
            info!("migrations complete");
        }
        DatabaseCommands::Status => match database.health_check().await {
            Ok(()) => info!("database connection ok: {}", database.url()),
            Err(e) => {
                error!("database connection failed: {}", e);
                anyhow::bail!("database unreachable");
            }
        },
    }

    Ok(())
}

fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_level = match args.verbose {
        0 => args.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).compact())
            .init();
    }

    Ok(())
}
