//! trackerblock CLI
//!
//! CLI tool for compiling rule lists, inspecting identifiers and cached lists.

mod source;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::debug;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use tb_compiler::{EncodingCompiler, RuleListCompiler, RuleListStore};
use tb_core::cache::{header_flags, CachedRuleList};
use tb_core::identifier::{Component, RulesIdentifier};
use tb_rules::{
    ContentBlockingUpdater, DefaultArtifactBuilder, PipelineConfig, RulesManager, SharedSettings,
};

use crate::source::{load_dataset, load_list, parse_domain_lines, read_text, FileRulesSource};

const COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "tb-cli")]
#[command(about = "trackerblock rule list compiler and tools")]
struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a tracker dataset and exception lists into a rule list
    Compile(CompileArgs),

    /// Parse a rule list identifier, optionally comparing it with another
    Identifier {
        value: String,

        /// Identifier to compare against
        #[arg(long)]
        against: Option<String>,
    },

    /// Dump cached rule list info
    Info {
        /// Cache file to inspect
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct CompileArgs {
    /// Rule list name
    #[arg(long, default_value = "TrackerDataSet")]
    name: String,

    /// Downloaded tracker dataset
    #[arg(long)]
    tds: Option<PathBuf>,

    /// Version of the downloaded dataset (defaults to a content digest)
    #[arg(long)]
    tds_etag: Option<String>,

    /// Bundled fallback dataset
    #[arg(long)]
    embedded: PathBuf,

    #[arg(long)]
    embedded_etag: Option<String>,

    /// Temporarily unprotected domains, one per line
    #[arg(long)]
    temp_list: Option<PathBuf>,

    #[arg(long)]
    temp_list_etag: Option<String>,

    /// Exception (allow list) domains, one per line
    #[arg(long)]
    allow_list: Option<PathBuf>,

    #[arg(long)]
    allow_list_etag: Option<String>,

    /// User unprotected sites, one per line
    #[arg(long)]
    unprotected: Option<PathBuf>,

    /// Write the compiled rule list JSON here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write generated page script configuration here
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Compiled rule list cache directory (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl CompileArgs {
    fn source(&self) -> Result<FileRulesSource, String> {
        Ok(FileRulesSource {
            name: self.name.clone(),
            tracker_data: self
                .tds
                .as_deref()
                .map(|path| load_dataset(path, self.tds_etag.clone()))
                .transpose()?,
            embedded: load_dataset(&self.embedded, self.embedded_etag.clone())?,
            temp_list: load_list(self.temp_list.as_deref(), self.temp_list_etag.clone())?,
            allow_list: load_list(self.allow_list.as_deref(), self.allow_list_etag.clone())?,
            unprotected_sites: match &self.unprotected {
                Some(path) => parse_domain_lines(&read_text(path)?),
                None => Vec::new(),
            },
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile(args) => cmd_compile(cli.config.as_deref(), args).await,
        Commands::Identifier { value, against } => cmd_identifier(&value, against.as_deref()),
        Commands::Info { input } => cmd_info(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    match path {
        Some(path) => {
            let config = PipelineConfig::load(path).map_err(|e| e.to_string())?;
            debug!("Loaded pipeline config from {}: {:?}", path.display(), config);
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

async fn cmd_compile(config_path: Option<&Path>, args: CompileArgs) -> Result<(), String> {
    let config = load_config(config_path)?;
    let source = args.source()?;
    let start = Instant::now();

    let compiler: Arc<dyn RuleListCompiler> = match args.cache_dir.clone().or(config.cache_dir.clone()) {
        Some(dir) => {
            let store = RuleListStore::new(dir);
            if args.verbose {
                println!("Rule list cache: {}", store.dir().display());
            }
            Arc::new(EncodingCompiler::with_store(store))
        }
        None => Arc::new(EncodingCompiler::new()),
    };
    let manager = RulesManager::new(compiler, config.manager.clone());
    let updater = ContentBlockingUpdater::spawn(
        &manager,
        Arc::new(SharedSettings::new(config.settings.clone())),
        Arc::new(DefaultArtifactBuilder),
        config.updater.clone(),
    );

    let mut updates = manager.subscribe();
    let mut errors = manager.errors();
    let mut bundles = updater.subscribe();

    let outcomes = manager.schedule_compilation(&source, Some("tb-cli".to_string()));
    if args.verbose {
        for (name, outcome) in &outcomes {
            println!("  [{}] {:?}", name, outcome);
        }
    }

    let wait = async {
        tokio::select! {
            update = updates.recv() => update.map_err(|e| format!("Update stream failed: {e}")),
            error = errors.recv() => Err(match error {
                Ok(e) => e.to_string(),
                Err(e) => format!("Error stream failed: {e}"),
            }),
        }
    };
    let event = timeout(COMPILE_TIMEOUT, wait)
        .await
        .map_err(|_| "Timed out waiting for compilation".to_string())??;

    let name = &source.name;
    let snapshot = event
        .rules_named(name)
        .ok_or_else(|| format!("No rules published for '{name}'"))?;

    println!("Compiled rule list '{}'", name);
    println!("  Identifier: {}", snapshot.identifier);
    println!("  Dataset:    {}", snapshot.etag);
    println!("  Rules:      {}", snapshot.rules_list.rule_count());
    if let Some(changes) = event.changes.get(name) {
        println!("  Changed:    {}", changes);
    }
    println!("  Time:       {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    if let Some(memory) = manager.failure_memory(name) {
        println!("Skipped broken inputs:");
        for component in Component::ALL {
            if let Some(version) = memory.get(component) {
                println!("  {}: {}", component, version);
            }
        }
    }

    if args.verbose {
        let exceptions = &snapshot.exceptions;
        println!("Exceptions:");
        println!("  Temp list:   {} domains", exceptions.temp_list.len());
        println!("  Allow list:  {} domains", exceptions.allow_list.len());
        println!("  Unprotected: {} domains", exceptions.unprotected_sites.len());
    }

    if let Some(output) = &args.output {
        write_file(output, snapshot.rules_list.encoded().as_bytes())?;
        println!("Wrote rule list to '{}'", output.display());
    }

    if let Some(path) = &args.artifacts {
        let bundle = timeout(COMPILE_TIMEOUT, bundles.recv())
            .await
            .map_err(|_| "Timed out waiting for artifacts".to_string())?
            .ok_or_else(|| "Updater stopped".to_string())?;
        let json = serde_json::to_string_pretty(&bundle.artifacts.scripts)
            .map_err(|e| format!("Failed to encode artifacts: {e}"))?;
        write_file(path, json.as_bytes())?;
        println!("Wrote {} script configs to '{}'", bundle.artifacts.scripts.len(), path.display());
    }

    Ok(())
}

fn cmd_identifier(value: &str, against: Option<&str>) -> Result<(), String> {
    let identifier: RulesIdentifier = value
        .parse()
        .map_err(|e| format!("Invalid identifier: {e}"))?;

    println!("Identifier: {}", identifier);
    println!("  Name:              {}", identifier.name());
    println!("  Tracker data:      {}", identifier.tds_etag());
    println!("  Temp list:         {}", identifier.temp_list_etag());
    println!("  Allow list:        {}", identifier.allow_list_etag());
    println!("  Unprotected sites: {}", identifier.unprotected_sites_hash());

    if let Some(other) = against {
        let other: RulesIdentifier = other
            .parse()
            .map_err(|e| format!("Invalid identifier to compare: {e}"))?;
        println!("Changed: {}", identifier.compare(&other));
    }

    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;

    let cached = CachedRuleList::load(&bytes).map_err(|e| format!("Invalid cache file: {}", e))?;

    println!("Cached rule list: {}", input.display());
    println!("  Magic:       RLC1");
    println!("  Version:     {}", cached.version);
    println!("  CRC32:       {}", if cached.flags & header_flags::HAS_CRC32 != 0 { "verified" } else { "absent" });
    println!("  Identifier:  {}", cached.identifier);
    println!("  Rules:       {}", cached.rule_count);
    println!("  Payload:     {} bytes", cached.payload().len());
    println!("  Total size:  {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);

    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, bytes).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}
