//! Thin command-line front end for `snapshot_engine` (spec §6 "CLI
//! surface"). Owns option parsing and the real MongoDB client construction;
//! everything else is delegated straight to the library.

mod json;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::Parser;
use snapshot_engine::{
    client::CollectionClient,
    config::{Compression, Format, ReadConcern, ReadPreference, SnapshotOptions},
};

#[derive(Parser, Debug)]
#[command(name = "snapshot-cli", version, about = "Snapshot a MongoDB-compatible collection to local files")]
struct Cli {
    #[arg(long)]
    uri: String,
    #[arg(long)]
    db: String,
    #[arg(long)]
    collection: String,
    #[arg(long)]
    output: PathBuf,
    #[arg(long, default_value = "jsonl")]
    format: String,
    #[arg(long, default_value = "zstd")]
    compression: String,
    #[arg(long = "compression-level")]
    compression_level: Option<i32>,
    #[arg(long, default_value_t = 4)]
    partitions: usize,
    #[arg(long = "batch-size", default_value_t = 1000)]
    batch_size: usize,
    #[arg(long = "queue-mb", default_value_t = 64)]
    queue_mb: u64,
    #[arg(long = "rotate-mb")]
    rotate_mb: Option<u64>,
    #[arg(long = "by-size")]
    by_size: Option<u64>,
    #[arg(long = "single-file", default_value_t = false)]
    single_file: bool,
    #[arg(long, default_value = "snapshot")]
    prefix: String,
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    projection: Option<String>,
    #[arg(long = "read-preference", default_value = "primary")]
    read_preference: String,
    #[arg(long = "read-tags")]
    read_tags: Option<String>,
    #[arg(long = "read-concern", default_value = "local")]
    read_concern: String,
    #[arg(long = "no-cursor-timeout", default_value_t = false)]
    no_cursor_timeout: bool,
    #[arg(long = "parquet-row-group", default_value_t = 10_000)]
    parquet_row_group: usize,
    #[arg(long = "write-chunk-mb", default_value_t = 8)]
    write_chunk_mb: usize,
    #[arg(long = "writer-threads", default_value_t = 1)]
    writer_threads: usize,
    #[arg(long, default_value = "on")]
    telemetry: String,
    #[arg(long = "resume-overwrite-incompatible", default_value_t = false)]
    resume_overwrite_incompatible: bool,
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,
}

fn parse_format(s: &str) -> anyhow::Result<Format> {
    match s {
        "jsonl" => Ok(Format::Jsonl),
        "csv" => Ok(Format::Csv),
        "parquet" => Ok(Format::Parquet),
        other => bail!("unknown --format {other:?} (expected jsonl|csv|parquet)"),
    }
}

fn parse_compression(s: &str) -> anyhow::Result<Compression> {
    match s {
        "zstd" => Ok(Compression::Zstd),
        "gzip" => Ok(Compression::Gzip),
        "none" => Ok(Compression::None),
        other => bail!("unknown --compression {other:?} (expected zstd|gzip|none)"),
    }
}

fn parse_read_preference(s: &str) -> anyhow::Result<ReadPreference> {
    match s {
        "primary" => Ok(ReadPreference::Primary),
        "primary_preferred" => Ok(ReadPreference::PrimaryPreferred),
        "secondary" => Ok(ReadPreference::Secondary),
        "secondary_preferred" => Ok(ReadPreference::SecondaryPreferred),
        "nearest" => Ok(ReadPreference::Nearest),
        other => bail!("unknown --read-preference {other:?}"),
    }
}

fn parse_read_concern(s: &str) -> anyhow::Result<ReadConcern> {
    match s {
        "majority" => Ok(ReadConcern::Majority),
        "local" => Ok(ReadConcern::Local),
        "linearizable" => Ok(ReadConcern::Linearizable),
        "available" => Ok(ReadConcern::Available),
        "snapshot" => Ok(ReadConcern::Snapshot),
        other => bail!("unknown --read-concern {other:?}"),
    }
}

fn parse_read_tags(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn build_options(cli: &Cli) -> anyhow::Result<SnapshotOptions> {
    let mut options = SnapshotOptions::new(cli.collection.clone(), cli.output.clone()).apply_env_defaults();

    options.prefix = cli.prefix.clone();
    options.format = parse_format(&cli.format)?;
    options.compression = parse_compression(&cli.compression)?;
    if cli.compression_level.is_some() {
        options.compression_level = cli.compression_level;
    }
    options.partitions = cli.partitions;
    options.batch_size = cli.batch_size;
    options.queue_bytes = cli.queue_mb * 1024 * 1024;
    options.rotate_bytes = cli
        .by_size
        .or_else(|| cli.rotate_mb.map(|mb| mb * 1024 * 1024));
    options.single_file = cli.single_file;
    options.write_chunk_bytes = cli.write_chunk_mb * 1024 * 1024;
    options.parquet_row_group = cli.parquet_row_group;
    options.writer_threads = cli.writer_threads;
    options.read_preference = parse_read_preference(&cli.read_preference)?;
    options.read_concern = parse_read_concern(&cli.read_concern)?;
    options.read_tags = cli.read_tags.as_deref().map(parse_read_tags).unwrap_or_default();
    options.no_cursor_timeout = cli.no_cursor_timeout;
    options.telemetry = cli.telemetry != "off";
    options.resume_overwrite_incompatible = cli.resume_overwrite_incompatible;
    options.dry_run = cli.dry_run;

    if let Some(query) = &cli.query {
        let value: serde_json::Value = serde_json::from_str(query).context("--query is not valid JSON")?;
        options.query = json::json_to_document(value).context("--query did not decode to a document")?;
    }
    if let Some(projection) = &cli.projection {
        let value: serde_json::Value =
            serde_json::from_str(projection).context("--projection is not valid JSON")?;
        options.projection = Some(json::json_to_document(value).context("--projection did not decode to a document")?);
    }

    Ok(options)
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(UsageOrRuntime::Usage(err)) => {
            eprintln!("error: {err:#}");
            1
        }
        Err(UsageOrRuntime::Runtime(err)) => {
            eprintln!("error: {err:#}");
            2
        }
    };
    std::process::exit(exit_code);
}

enum UsageOrRuntime {
    Usage(anyhow::Error),
    Runtime(anyhow::Error),
}

fn run() -> Result<(), UsageOrRuntime> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let options = build_options(&cli).map_err(UsageOrRuntime::Usage)?;

    let collection: Arc<dyn CollectionClient> = connect(&cli).map_err(UsageOrRuntime::Runtime)?;

    let outcome = snapshot_engine::run(&options, collection).map_err(|e| UsageOrRuntime::Runtime(anyhow::anyhow!(e)))?;

    match outcome.manifest {
        Some(manifest) => {
            println!(
                "wrote {} part(s), manifest at {}",
                manifest.parts.len(),
                options.manifest_path().display()
            );
        }
        None => println!("dry run: no files written"),
    }
    Ok(())
}

#[cfg(feature = "mongo_client")]
fn connect(cli: &Cli) -> anyhow::Result<Arc<dyn CollectionClient>> {
    use snapshot_engine::client::MongoCollectionClient;

    let client = mongodb::sync::Client::with_uri_str(&cli.uri).context("failed to connect to MongoDB")?;
    let collection = client.database(&cli.db).collection::<bson::Document>(&cli.collection);
    Ok(Arc::new(MongoCollectionClient::new(collection)))
}

#[cfg(not(feature = "mongo_client"))]
fn connect(_cli: &Cli) -> anyhow::Result<Arc<dyn CollectionClient>> {
    bail!("this build was compiled without the `mongo_client` feature")
}
