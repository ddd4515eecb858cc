use anyhow::{anyhow, Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use log::info;
use oxigraph::store::Store;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wdsync::bitmap::{compute_bitmap, BitmapAccess, DiskBitmap, SortedTripleIndex, TripleIndex};
use wdsync::changes::{ChangeWalker, WikiApiFeed};
use wdsync::config::{FetchConfig, UpdaterConfig};
use wdsync::consts::DEFAULT_ENTITY_IRI_PREFIX;
use wdsync::cursor::{Cursor, CursorStore, DEFAULT_CURSOR_FILE};
use wdsync::fetch::HttpPageSource;
use wdsync::options::{LowVolumePolicy, RdfFlavor};
use wdsync::progress::{ConsoleProgress, LogProgress, ProgressObserver};
use wdsync::snapshot::{deleted_subjects, write_snapshot};
use wdsync::store::{GraphStore, OxigraphStore, SparqlStore};
use wdsync::updater::Updater;

const FEED_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "wdsync")]
#[command(about = "Keeps a SPARQL store in sync with Wikidata's recent changes")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the log level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the log level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Do not draw progress bars; progress is logged instead
    #[clap(long, action, default_value = "false", global = true)]
    no_progress: bool,
}

/// Options shared by the commands that walk the change feed.
#[derive(Debug, clap::Args)]
struct FeedArgs {
    /// Start of the window (RFC 3339, `YYYY-MM-DDThh:mm:ss` in UTC, or `YYYY-MM-DD`)
    #[clap(long)]
    date: Option<String>,
    /// MediaWiki API serving the recent changes
    #[clap(long)]
    change_api: Option<String>,
    /// Prefix of entity document URLs
    #[clap(long)]
    server: Option<String>,
    /// Feed entries per page
    #[clap(long)]
    page_size: Option<usize>,
    /// Download attempts per document, 0 to retry forever
    #[clap(long)]
    max_attempts: Option<u32>,
    /// Delay between two download attempts, in milliseconds
    #[clap(long)]
    backoff_ms: Option<u64>,
    /// Concurrent downloads, 0 for one per core
    #[clap(long)]
    concurrency: Option<usize>,
}

impl FeedArgs {
    fn apply_fetch(&self, fetch: &mut FetchConfig) {
        if let Some(server) = &self.server {
            fetch.server = server.clone();
        }
        if let Some(n) = self.max_attempts {
            fetch.max_attempts = n;
        }
        if let Some(ms) = self.backoff_ms {
            fetch.backoff_ms = ms;
        }
        if let Some(n) = self.concurrency {
            fetch.concurrency = n;
        }
    }

    fn date(&self) -> Result<Option<DateTime<Utc>>> {
        self.date.as_deref().map(parse_date).transpose()
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints the version of the wdsync binary
    Version,
    /// Keep a SPARQL store in sync with the recent changes
    Update {
        #[command(flatten)]
        feed: FeedArgs,
        /// JSON configuration file; command line options override it
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// Cursor file holding the last watermark
        #[clap(long, default_value = DEFAULT_CURSOR_FILE)]
        cursor: PathBuf,
        /// SPARQL query endpoint
        #[clap(long)]
        sparql: Option<String>,
        /// SPARQL update endpoint, defaults to the query endpoint
        #[clap(long)]
        update_endpoint: Option<String>,
        /// Update an embedded Oxigraph store at this path instead of an endpoint
        #[clap(long, conflicts_with_all = ["sparql", "update_endpoint"])]
        store: Option<PathBuf>,
        /// Rounds with fewer changes apply nothing
        #[clap(long)]
        min_changes: Option<usize>,
        /// What to do with the watermark below the minimum
        #[clap(long, value_enum)]
        low_volume: Option<LowVolumePolicy>,
        /// Statements per transaction
        #[clap(long)]
        max_statements: Option<usize>,
        /// Delay between two rounds, in milliseconds
        #[clap(long)]
        interval_ms: Option<u64>,
        /// Serialize every store request
        #[clap(long, action)]
        sync_requests: bool,
        /// Retry a failed round after the interval instead of exiting
        #[clap(long, action)]
        retry_failed_rounds: bool,
        /// Tolerance when comparing numeric literals
        #[clap(long)]
        epsilon: Option<f64>,
        /// Timeout of store requests in seconds, unlimited by default
        #[clap(long)]
        query_timeout: Option<u64>,
        /// Stop after this many rounds
        #[clap(long)]
        rounds: Option<u64>,
    },
    /// Download every entity changed since a date into a delta file
    Snapshot {
        #[command(flatten)]
        feed: FeedArgs,
        /// Delta file to write, defaults to `deltafiles/<now>.df`
        #[clap(long, short)]
        output: Option<PathBuf>,
        /// Flavor of the downloaded documents
        #[clap(long, value_enum, default_value = "full")]
        flavor: RdfFlavor,
    },
    /// Verify a delta file
    Check {
        /// The delta file to check
        file: PathBuf,
    },
    /// List the entities a delta file records as deleted
    Deleted {
        /// The delta file to read
        file: PathBuf,
        /// IRI prefix of entities
        #[clap(long, default_value = DEFAULT_ENTITY_IRI_PREFIX)]
        prefix: String,
    },
    /// Mark the triples of an embedded store superseded by a delta file
    Bitmap {
        /// The delta file to read
        file: PathBuf,
        /// Embedded Oxigraph store holding the dataset
        #[clap(long)]
        store: PathBuf,
        /// Bitmap file to write
        #[clap(long, short)]
        output: PathBuf,
        /// IRI prefix of entities
        #[clap(long, default_value = DEFAULT_ENTITY_IRI_PREFIX)]
        prefix: String,
    },
    /// Print the current time in the formats accepted by --date
    Today,
    /// List the RDF flavors of entity documents
    Flavors,
    /// Write the default configuration to a file, or print it
    Config {
        /// The file to write, prints to stdout when omitted
        output: Option<PathBuf>,
    },
}

/// Parses the accepted `--date` forms; naive dates and times are UTC.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(anyhow!(
        "Can't parse date {:?}; use RFC 3339, YYYY-MM-DDThh:mm:ss or YYYY-MM-DD",
        value
    ))
}

pub fn run() -> Result<()> {
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn observer(no_progress: bool) -> Box<dyn ProgressObserver> {
    if no_progress {
        Box::new(LogProgress::default())
    } else {
        Box::new(ConsoleProgress::new(true))
    }
}

fn execute(cmd: Cli) -> Result<()> {
    // CLI flags take precedence over WDSYNC_LOG and RUST_LOG.
    let level = if cmd.debug {
        Some("debug")
    } else if cmd.verbose {
        Some("info")
    } else {
        None
    };
    wdsync::init_logging(level);

    match cmd.command {
        Commands::Version => {
            println!("wdsync {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Update {
            feed,
            config,
            cursor,
            sparql,
            update_endpoint,
            store,
            min_changes,
            low_volume,
            max_statements,
            interval_ms,
            sync_requests,
            retry_failed_rounds,
            epsilon,
            query_timeout,
            rounds,
        } => {
            let mut config = match config {
                Some(path) => UpdaterConfig::from_file(&path)?,
                None => UpdaterConfig::default(),
            };
            feed.apply_fetch(&mut config.fetch);
            if let Some(api) = &feed.change_api {
                config.change_api = api.clone();
            }
            if let Some(n) = feed.page_size {
                config.page_size = n;
            }
            if let Some(url) = sparql {
                config.sparql_endpoint = url;
            }
            if update_endpoint.is_some() {
                config.update_endpoint = update_endpoint;
            }
            if let Some(n) = min_changes {
                config.min_changes = n;
            }
            if let Some(policy) = low_volume {
                config.low_volume = policy;
            }
            if let Some(n) = max_statements {
                config.max_statements_per_tx = n;
            }
            if let Some(ms) = interval_ms {
                config.round_interval_ms = ms;
            }
            if sync_requests {
                config.serialize_requests = true;
            }
            if retry_failed_rounds {
                config.retry_failed_rounds = true;
            }
            if let Some(e) = epsilon {
                config.epsilon = e;
            }
            if query_timeout.is_some() {
                config.query_timeout_secs = query_timeout;
            }
            config.validate()?;
            if cmd.verbose || cmd.debug {
                config.print();
            }

            let cursors = CursorStore::new(cursor);
            let _lock = cursors.lock()?;
            let start = cursors.load(feed.date()?)?;

            let graph: Box<dyn GraphStore> = match store {
                Some(path) => Box::new(OxigraphStore::open(&path, &config.entity_iri_prefix)?),
                None => Box::new(SparqlStore::new(
                    &config.sparql_endpoint,
                    config.update_endpoint.clone(),
                    &config.entity_iri_prefix,
                    config.query_timeout(),
                )?),
            };
            let changes = WikiApiFeed::new(&config.change_api, FEED_TIMEOUT)?;
            let source = HttpPageSource::new(config.fetch.timeout())?;
            let progress = observer(cmd.no_progress);
            let updater = Updater::new(
                &config,
                &changes,
                &source,
                graph.as_ref(),
                &cursors,
                progress.as_ref(),
            )?;
            let last = updater.run(start, rounds)?;
            info!("Stopped at watermark {}", last.watermark.to_rfc3339());
        }
        Commands::Snapshot {
            feed,
            output,
            flavor,
        } => {
            let watermark = feed
                .date()?
                .ok_or_else(|| anyhow!("snapshot needs --date"))?;
            let mut fetch = FetchConfig::snapshot_defaults();
            fetch.flavor = flavor;
            feed.apply_fetch(&mut fetch);
            fetch.header_map()?;
            let change_api = feed
                .change_api
                .clone()
                .unwrap_or_else(|| UpdaterConfig::default().change_api);
            let page_size = feed
                .page_size
                .unwrap_or_else(|| UpdaterConfig::default().page_size);

            let changes = WikiApiFeed::new(change_api, FEED_TIMEOUT)?;
            let source = HttpPageSource::new(fetch.timeout())?;
            let progress = observer(cmd.no_progress);
            let discovery = ChangeWalker::new(&changes, progress.as_ref())
                .discover(&Cursor::new(watermark), page_size)?;
            let output = output.unwrap_or_else(|| {
                PathBuf::from("deltafiles").join(format!(
                    "{}.df",
                    discovery.cursor.watermark.format("%Y%m%d%H%M%S")
                ))
            });
            let report = write_snapshot(
                &output,
                &discovery,
                watermark,
                &fetch,
                &source,
                progress.as_ref(),
            )?;
            println!(
                "{}: {} record(s), {} deleted",
                report.path.display(),
                report.records,
                report.deleted
            );
        }
        Commands::Check { file } => {
            let summary = deltafile::check_file(&file)?;
            println!("{}: OK", file.display());
            println!("  records: {}", summary.header.url_count);
            println!("  deleted: {}", summary.empty_records);
            println!("  flavor: {}", summary.header.flavor.name());
            println!(
                "  range: {} -> {}",
                format_micros(summary.header.range_end),
                format_micros(summary.header.range_start)
            );
            println!("  size: {} bytes", summary.bytes);
        }
        Commands::Deleted { file, prefix } => {
            for subject in deleted_subjects(&file, &prefix)? {
                println!("{}", subject);
            }
        }
        Commands::Bitmap {
            file,
            store,
            output,
            prefix,
        } => {
            let store = Store::open(&store)?;
            let index = SortedTripleIndex::from_store(&store)?;
            let mut bitmap = DiskBitmap::create(&output, index.len())?;
            let marked = compute_bitmap(&file, &prefix, &index, &mut bitmap)?;
            bitmap.close()?;
            println!(
                "{}: {} of {} triple(s) marked",
                output.display(),
                marked,
                bitmap.len()
            );
        }
        Commands::Today => {
            let now = Utc::now();
            println!("{}", now.to_rfc3339());
            println!("{}", now.format("%Y-%m-%dT%H:%M:%S"));
        }
        Commands::Flavors => {
            for flavor in RdfFlavor::ALL {
                println!("{} - {}", flavor.title(), flavor.description());
            }
        }
        Commands::Config { output } => {
            let config = UpdaterConfig::default();
            match output {
                Some(path) => write_config(&config, &path)?,
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }

    Ok(())
}

fn write_config(config: &UpdaterConfig, path: &Path) -> Result<()> {
    config.save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn format_micros(micros: u64) -> String {
    let secs = (micros / 1_000_000) as i64;
    let nanos = ((micros % 1_000_000) * 1000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("{}us", micros))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_date("2024-05-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01T12:30:00").unwrap(), expected);
        assert_eq!(
            parse_date("2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn args_parse() {
        let cli = Cli::try_parse_from([
            "wdsync",
            "update",
            "--date",
            "2024-05-01",
            "--min-changes",
            "5",
            "--low-volume",
            "skip",
            "--rounds",
            "1",
        ])
        .unwrap();
        match cli.command {
            Commands::Update {
                feed,
                min_changes,
                low_volume,
                rounds,
                ..
            } => {
                assert_eq!(feed.date.as_deref(), Some("2024-05-01"));
                assert_eq!(min_changes, Some(5));
                assert_eq!(low_volume, Some(LowVolumePolicy::Skip));
                assert_eq!(rounds, Some(1));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(
            Cli::try_parse_from(["wdsync", "update", "--store", "x", "--sparql", "y"]).is_err()
        );
    }
}
