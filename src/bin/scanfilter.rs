//! scanfilter: filter scan dumps, enrich stored hosts, expand domains via CT.

use clap::{Parser, Subcommand};
use scanfilter::analyze::{ensure_definitions, AppMatch, WAPPALYZER_URL};
use scanfilter::sink::SinkConfig;
use scanfilter::source::{Decoder, LineSource};
use scanfilter::{
    AnalyzeConfig, BatchSink, CtClient, Enricher, Filter, InputFormat, JsonSink, OutputFormat,
    Pipeline, PipelineConfig, Result, RuleSet, Scheduler, Sink, SqliteStore, StoreConfig,
    Wappalyzer,
};
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scanfilter")]
#[command(version = "0.1.0")]
#[command(about = "Filter internet-wide scan dumps and enrich the hosts found", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a scan dump into JSON lines or the host store
    Parse {
        /// Input format (rapid7-http|rapid7-fdns)
        #[arg(short = 't', long = "type", default_value = "rapid7-http")]
        format: String,

        /// Dump to read, gzip allowed
        #[arg(short, long)]
        file: PathBuf,

        /// Rule file of domains and ranges to keep
        #[arg(long)]
        domains: Option<PathBuf>,

        /// Rule file of domains to drop
        #[arg(long)]
        bdomains: Option<PathBuf>,

        /// Output format (json|sqlite)
        #[arg(short, long, default_value = "json")]
        output: String,

        /// Database location, defaults to the DB environment variable
        #[arg(long)]
        db: Option<String>,

        /// Filter worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Records per transaction
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },

    /// Fingerprint stored hosts and save detected technologies
    Analyze {
        /// Concurrent fingerprinting jobs
        #[arg(short, long, default_value_t = 10)]
        worker: usize,

        /// Definitions file, downloaded if missing
        #[arg(short, long, default_value = "./apps.json")]
        appsfile: PathBuf,

        /// Database location, defaults to the DB environment variable
        #[arg(long)]
        db: Option<String>,

        /// Rule file of hosts to skip
        #[arg(long)]
        bdomains: Option<PathBuf>,

        /// Analyze the responses of a rapid7-http dump instead of the store
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List certificate names below each domain of a rule file
    Ct {
        /// Rule file of domains to look up
        #[arg(long)]
        domains: PathBuf,

        /// Rule file of names to drop
        #[arg(long)]
        bdomains: Option<PathBuf>,

        /// CT search endpoint
        #[arg(long, default_value = scanfilter::ct::DEFAULT_ENDPOINT)]
        endpoint: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse {
            format,
            file,
            domains,
            bdomains,
            output,
            db,
            workers,
            batch_size,
        } => parse(
            &format, &file, domains, bdomains, &output, db, workers, batch_size,
        ),
        Commands::Analyze {
            worker,
            appsfile,
            db,
            bdomains,
            file,
        } => {
            let config = AnalyzeConfig::default()
                .with_workers(worker)
                .with_appsfile(appsfile);
            match file {
                Some(file) => analyze_dump(config, &file, bdomains),
                None => analyze(config, db, bdomains),
            }
        }
        Commands::Ct {
            domains,
            bdomains,
            endpoint,
        } => ct(&domains, bdomains, &endpoint),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_rules(path: Option<PathBuf>) -> Result<Option<RuleSet>> {
    path.map(RuleSet::from_file).transpose()
}

fn store_config(db: Option<String>) -> Result<StoreConfig> {
    match db {
        Some(uri) => StoreConfig::parse(&uri),
        None => StoreConfig::from_env(),
    }
}

#[allow(clippy::too_many_arguments)]
fn parse(
    format: &str,
    file: &Path,
    domains: Option<PathBuf>,
    bdomains: Option<PathBuf>,
    output: &str,
    db: Option<String>,
    workers: Option<usize>,
    batch_size: usize,
) -> Result<()> {
    let format: InputFormat = format.parse()?;
    let output: OutputFormat = output.parse()?;

    let allow = load_rules(domains)?;
    let deny = load_rules(bdomains)?;
    if let Some(allow) = &allow {
        log::info!("Limiting to {} parsed rules", allow.len());
    }
    if let Some(deny) = &deny {
        log::info!("Dropping {} blacklist rules", deny.len());
    }
    let filter = Filter::from_rulesets(allow, deny);

    let mut config = PipelineConfig::default()
        .with_format(format)
        .with_sink(SinkConfig::default().with_batch_size(batch_size));
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let sink = match output {
        OutputFormat::Json => Sink::Json(JsonSink::stdout(config.sink.channel_capacity)?),
        OutputFormat::Sqlite => {
            let store = SqliteStore::open(&store_config(db)?)?;
            store.ensure_schema()?;
            Sink::Batch(BatchSink::spawn(store, config.sink)?)
        }
    };

    log::info!("Parsing {} records from {:?} into {}", format, file, output);
    let pipeline = Pipeline::new(config, Arc::new(filter), sink);
    pipeline.run(file)?;
    Ok(())
}

fn analyze(config: AnalyzeConfig, db: Option<String>, bdomains: Option<PathBuf>) -> Result<()> {
    log::info!("Loading apps from {:?}", config.appsfile);
    ensure_definitions(&config.appsfile, WAPPALYZER_URL)?;
    let wappalyzer = Wappalyzer::from_file(&config.appsfile)?;

    let store_config = store_config(db)?;
    let mut writer = SqliteStore::open(&store_config)?;
    writer.ensure_schema()?;
    let reader = SqliteStore::open(&store_config)?;

    let filter = Filter::from_rulesets(None, load_rules(bdomains)?);
    let scheduler = Scheduler::new(Arc::new(wappalyzer), config.workers)?;

    Enricher::new()
        .with_filter(Arc::new(filter))
        .with_progress_step(config.progress_step)
        .run(reader, &mut writer, scheduler)?;
    Ok(())
}

#[derive(Serialize)]
struct DumpApps<'a> {
    host: &'a str,
    apps: &'a [AppMatch],
}

fn analyze_dump(config: AnalyzeConfig, file: &Path, bdomains: Option<PathBuf>) -> Result<()> {
    log::info!("Loading apps from {:?}", config.appsfile);
    ensure_definitions(&config.appsfile, WAPPALYZER_URL)?;
    let wappalyzer = Wappalyzer::from_file(&config.appsfile)?;

    let records = Decoder::new(LineSource::open(file)?, InputFormat::Rapid7Http);
    let filter = Filter::from_rulesets(None, load_rules(bdomains)?);
    let scheduler = Scheduler::new(Arc::new(wappalyzer), config.workers)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    Enricher::new()
        .with_filter(Arc::new(filter))
        .with_progress_step(config.progress_step)
        .run_offline(records, scheduler, &mut |outcome| {
            let apps = DumpApps {
                host: &outcome.host,
                apps: &outcome.matches,
            };
            serde_json::to_writer(&mut out, &apps)?;
            out.write_all(b"\n")?;
            Ok(())
        })?;

    out.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct CtName<'a> {
    domain: &'a str,
    name: &'a str,
}

fn ct(domains: &Path, bdomains: Option<PathBuf>, endpoint: &str) -> Result<()> {
    let rules = RuleSet::from_file(domains)?;
    let filter = Filter::from_rulesets(None, load_rules(bdomains)?);
    let client = CtClient::new(endpoint)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for suffix in rules.domains().suffixes() {
        let domain = suffix.trim_start_matches('.');
        let names = match client.names(domain) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("CT lookup for {} failed: {}", domain, e);
                continue;
            }
        };

        let mut kept = 0;
        for name in names.iter().filter(|n| filter.accepts_domain(n)) {
            serde_json::to_writer(&mut out, &CtName { domain, name })?;
            out.write_all(b"\n")?;
            kept += 1;
        }
        log::info!("{}: {} of {} names", domain, kept, names.len());
    }

    out.flush()?;
    Ok(())
}
