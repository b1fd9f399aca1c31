//! Command-line entry point: rewrites parsed tree documents in parallel.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use nette_symfony_rewriter::batch::{Batch, BatchReport, CancellationToken, FileReport, SourceUnit};
use nette_symfony_rewriter::config::RewriterConfig;
use nette_symfony_rewriter::ir::pipeline::Pipeline;
use nette_symfony_rewriter::ir::printer;
use nette_symfony_rewriter::ir::types::{ClassIndex, IndexedTypeOracle, TypeOracle, UnknownTypeOracle};
use nette_symfony_rewriter::logging::init_logger;
use nette_symfony_rewriter::rules;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tree document (JSON) to rewrite; can be given multiple times
    #[arg(short, long, required = true)]
    input: Vec<PathBuf>,

    /// Class index (JSON) used for type resolution
    #[arg(long)]
    class_index: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving rewritten documents and added files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    max_passes: Option<u32>,

    #[arg(long)]
    revisit_bound: Option<u32>,

    /// Rule to enable, in dispatch order; can be given multiple times
    #[arg(long = "rule")]
    rules: Vec<String>,

    /// Print rewritten trees as PHP-like text to stdout
    #[arg(long)]
    print: bool,

    /// Log level for stderr (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    no_color: bool,

    /// Also write a debug log to the user cache directory
    #[arg(long)]
    file_logging: bool,
}

fn load_config(cli: &Cli) -> Result<RewriterConfig> {
    let mut config = match &cli.config {
        Some(path) => RewriterConfig::load(path)?,
        None => RewriterConfig::default(),
    };
    if let Some(max_passes) = cli.max_passes {
        config.max_passes = max_passes;
    }
    if let Some(bound) = cli.revisit_bound {
        config.revisit_bound = bound;
    }
    if !cli.rules.is_empty() {
        config.rules = cli.rules.clone();
    }
    config.validate()?;
    Ok(config)
}

fn load_oracle(class_index: Option<&Path>) -> Result<Arc<dyn TypeOracle>> {
    match class_index {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read class index {}", path.display()))?;
            let index = ClassIndex::from_json(&json)
                .with_context(|| format!("invalid class index {}", path.display()))?;
            info!("Loaded {} class(es) from {}", index.len(), path.display());
            Ok(Arc::new(IndexedTypeOracle::new(Arc::new(index))))
        }
        None => {
            warn!("No class index given: every type is unknown and type-gated rules will not fire");
            Ok(Arc::new(UnknownTypeOracle))
        }
    }
}

/// Output location for `path`, keeping relative paths and flattening absolute ones.
fn output_path(output_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        output_dir.join(path.file_name().unwrap_or(path.as_os_str()))
    } else {
        output_dir.join(path)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn emit(report: &FileReport, cli: &Cli) -> Result<()> {
    let Some(tree) = &report.tree else {
        return Ok(());
    };
    if cli.print {
        println!("// {}", report.path.display());
        print!("{}", printer::format(tree)?);
    }
    if let Some(output_dir) = &cli.output_dir {
        let document = tree.to_document()?;
        write_file(&output_path(output_dir, &report.path), &document.to_json_pretty()?)?;
        for added in &report.added_files {
            write_file(&output_path(output_dir, &added.path), &added.content)?;
        }
    } else if cli.print {
        for added in &report.added_files {
            println!("// added {}", added.path.display());
            print!("{}", added.content);
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;
    let oracle = load_oracle(cli.class_index.as_deref())?;
    let rules = rules::select(&config.rules, &config)?;
    let pipeline = Arc::new(Pipeline::with_rules(config.pipeline_config(), rules)?);
    info!("Rules: {}", pipeline.rule_ids().join(", "));

    let mut failed = Vec::new();
    let mut units = Vec::new();
    for (index, path) in cli.input.iter().enumerate() {
        match SourceUnit::load(path) {
            Ok(unit) => units.push(unit),
            Err(err) => failed.push((index, FileReport::failed(path.clone(), format!("{:#}", err)))),
        }
    }

    let batch = Batch::new(pipeline, oracle, config.workers)?;
    let mut report = batch.run(units, &CancellationToken::new());
    report.merge_failed(failed);

    let mut ok = !report.has_errors();
    for file in &report.files {
        eprintln!("{}: {}", file.path.display(), file.status);
        if let Err(err) = emit(file, cli) {
            eprintln!("{}: error: {:#}", file.path.display(), err);
            ok = false;
        }
    }
    summarize(&report);
    Ok(ok)
}

fn summarize(report: &BatchReport) {
    eprintln!(
        "{} rewritten, {} unchanged, {} skipped, {} error(s)",
        report.rewritten(),
        report.unchanged(),
        report.skipped(),
        report.errors()
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_logger(cli.no_color, cli.log_level.as_deref(), cli.file_logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
