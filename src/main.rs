use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ingest_pipeline::bus::{KafkaPublisher, KafkaSource};
use ingest_pipeline::config::{
    CommonArgs, FileArgs, HttpArgs, ProduceArgs, StorageArgs, StorageBackend, StreamArgs,
};
use ingest_pipeline::drivers::file::{self, FileDriver, FileOutcome, FileRequest};
use ingest_pipeline::drivers::{HttpPollDriver, StreamDriver};
use ingest_pipeline::error::IngestError;
use ingest_pipeline::http_client::ReqwestHttp;
use ingest_pipeline::schema::SchemaRegistry;
use ingest_pipeline::store::{FsRawStore, RawStore, S3RawStore};
use ingest_pipeline::{logging, metrics, producer};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ingest-pipeline")]
#[command(about = "Lands files, HTTP responses and stream messages in the raw store and publishes ingest events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one local file and exit
    File {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        args: FileArgs,
    },
    /// Poll an HTTP endpoint once or on an interval
    Http {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        args: HttpArgs,
    },
    /// Relay the source topic into the raw store and the ingest topic
    Stream {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        args: StreamArgs,
    },
    /// Produce synthetic posts on the source topic
    Produce(ProduceArgs),
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (log_dir, log_file) = match &cli.command {
        Commands::File { common, .. } => (common.log_dir.clone(), "ingest-file.log"),
        Commands::Http { common, .. } => (common.log_dir.clone(), "ingest-http.log"),
        Commands::Stream { common, .. } => (common.log_dir.clone(), "ingest-stream.log"),
        Commands::Produce(args) => (args.log_dir.clone(), "produce.log"),
    };
    let guard = logging::init_logging(&log_dir, log_file);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Ingest failed");
            exit_code_for(&e)
        }
    };
    // process::exit skips destructors; flush the file appender first.
    drop(guard);
    std::process::exit(code)
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::File { common, args } => {
            metrics::init(common.metrics_addr);
            run_file(common, args).await
        }
        Commands::Http { common, args } => {
            metrics::init(common.metrics_addr);
            run_http(common, args).await
        }
        Commands::Stream { common, args } => {
            metrics::init(common.metrics_addr);
            run_stream(common, args).await
        }
        Commands::Produce(args) => {
            let settings = args.settings()?;
            let publisher = KafkaPublisher::new(&args.bus.settings("source-producer")?)?;
            producer::run(&publisher, &settings, shutdown_signal()).await?;
            Ok(0)
        }
    }
}

async fn run_file(common: CommonArgs, args: FileArgs) -> Result<i32> {
    let settings = args.settings(&common)?;
    let registry = Arc::new(load_schemas(&common.schema_dir)?);
    let request = FileRequest {
        path: args.input.clone(),
        dt: args.dt.unwrap_or_else(|| Utc::now().date_naive()),
        record_count: args.record_count,
    };

    if args.dry_run {
        let plan = file::preview(&settings, &registry, &request)?;
        info!(raw_key = %plan.key, "Dry run: no raw write, publish or move");
        println!("{}", serde_json::to_string_pretty(&plan.event)?);
        return Ok(0);
    }

    let store = build_store(&common.storage)?;
    let publisher = Arc::new(KafkaPublisher::new(&common.bus.settings("ingestor-file")?)?);
    let driver = FileDriver::new(settings, registry, store, publisher);
    match driver.ingest(&request).await? {
        FileOutcome::Processed { .. } => Ok(0),
        FileOutcome::Quarantined { error, .. } => Ok(error.exit_code()),
    }
}

async fn run_http(common: CommonArgs, args: HttpArgs) -> Result<i32> {
    let settings = args.settings(&common)?;
    let registry = Arc::new(load_schemas(&common.schema_dir)?);
    let store = build_store(&common.storage)?;
    let publisher = Arc::new(KafkaPublisher::new(&common.bus.settings("ingestor-http")?)?);
    let http = Arc::new(ReqwestHttp::new(args.timeout())?);

    let mut driver = HttpPollDriver::new(settings, registry, http, store, publisher);
    driver.run(shutdown_signal()).await?;
    Ok(0)
}

async fn run_stream(common: CommonArgs, args: StreamArgs) -> Result<i32> {
    let settings = args.settings(&common)?;
    let registry = Arc::new(load_schemas(&common.schema_dir)?);
    let store = build_store(&common.storage)?;
    let bus = common.bus.settings("ingestor-stream")?;
    let publisher = Arc::new(KafkaPublisher::new(&bus)?);
    let source = KafkaSource::new(&bus, &args.consumer_settings()?)?;

    let mut driver = StreamDriver::new(settings, registry, store, publisher, source);
    driver.run(shutdown_signal()).await?;
    Ok(0)
}

fn load_schemas(dir: &Path) -> Result<SchemaRegistry> {
    let registry = SchemaRegistry::load_dir(dir).with_context(|| format!("loading schemas from {}", dir.display()))?;
    info!(dir = %dir.display(), "Schemas loaded");
    Ok(registry)
}

fn build_store(storage: &StorageArgs) -> Result<Arc<dyn RawStore>> {
    let settings = storage.settings()?;
    let store: Arc<dyn RawStore> = match settings.backend {
        StorageBackend::S3(s3) => {
            info!(endpoint = %s3.endpoint, bucket = %settings.bucket, "Using S3 raw store");
            Arc::new(S3RawStore::new(&s3)?)
        }
        StorageBackend::Filesystem { root } => {
            info!(root = %root.display(), bucket = %settings.bucket, "Using filesystem raw store");
            Arc::new(FsRawStore::new(root))
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler: never resolve, rely on external termination.
        std::future::pending::<()>().await;
    }
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<IngestError>())
        .map(IngestError::exit_code)
        .unwrap_or(1)
}
