use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use brandmark_triage::{
    ClassifierConfig, Outcome, PathLayout, Pipeline, PipelineOptions, ProgressSink, Result,
    Stage, Tally,
};

#[derive(Parser)]
#[command(
    name = "brandmark-triage",
    about = "Download product photos, set aside the ones without the brand mark, and cover the mark on the rest",
    version,
    after_help = "Typical session: brandmark-triage --root work run\n\n\
                  Stages can also be run one at a time; each one resumes where it left off."
)]
struct Cli {
    /// Workspace root holding input/, output/ and templates/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// JSON file overriding the classifier thresholds
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Worker threads for classification and redaction
    #[arg(long)]
    workers: Option<usize>,

    /// Concurrent downloads
    #[arg(long)]
    download_workers: Option<usize>,

    /// Per-request download timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Persist a new match threshold (0.5-0.95) before running
    #[arg(long, value_parser = parse_threshold)]
    threshold: Option<f32>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress everything but errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every URL in input/qc.txt
    Download,
    /// Move images without the mark to the processed tree
    Filter,
    /// Cover template matches and move those images to the processed tree
    Redact,
    /// List URLs that have no processed file
    Validate,
    /// Run all four stages in order
    Run,
    /// Show the run state
    Status,
    /// Set the match threshold
    Threshold {
        /// New threshold (0.5-0.95)
        #[arg(value_parser = parse_threshold)]
        value: f32,
    },
    /// Delete the run state and empty both output trees
    Reset,
}

fn parse_threshold(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("not a number: {s}"))?;
    if (0.5..=0.95).contains(&value) {
        Ok(value)
    } else {
        Err("threshold must be between 0.5 and 0.95".into())
    }
}

/// Progress bar fed by the worker pool.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new(stage: Stage, quiet: bool) -> Self {
        if quiet {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let style = ProgressStyle::default_bar()
            .template("{prefix:>9} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        Self {
            bar: ProgressBar::new(0).with_style(style).with_prefix(stage.to_string()),
        }
    }
}

impl<O: Outcome> ProgressSink<O> for BarSink {
    fn progress(&self, completed: usize, total: usize, tally: &Tally<O>) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
        self.bar.set_message(tally.to_string());
    }
}

impl Drop for BarSink {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let options = match build_options(&cli) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let mut pipeline = match Pipeline::open(PathLayout::new(&cli.root), options) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Fatal: failed to open workspace {}: {e}", cli.root.display());
            process::exit(1);
        }
    };

    match execute(&cli, &mut pipeline) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("brandmark_triage={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_options(cli: &Cli) -> Result<PipelineOptions> {
    let mut options = PipelineOptions::default();
    if let Some(n) = cli.workers {
        options.cpu_workers = n.max(1);
    }
    if let Some(n) = cli.download_workers {
        options.download_workers = n.max(1);
    }
    if let Some(secs) = cli.timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    if let Some(path) = &cli.tuning {
        options.classifier = ClassifierConfig::from_json_file(path)?;
    }
    Ok(options)
}

/// Run the selected command. `Ok(false)` means the command finished but the
/// workspace is incomplete.
fn execute(cli: &Cli, pipeline: &mut Pipeline) -> Result<bool> {
    if let Some(threshold) = cli.threshold {
        pipeline.set_threshold(threshold)?;
    }

    match cli.command {
        Command::Download => download(pipeline, cli.quiet).map(|()| true),
        Command::Filter => filter(pipeline, cli.quiet).map(|()| true),
        Command::Redact => redact(pipeline, cli.quiet).map(|()| true),
        Command::Validate => validate(pipeline, cli.quiet),
        Command::Run => {
            download(pipeline, cli.quiet)?;
            filter(pipeline, cli.quiet)?;
            redact(pipeline, cli.quiet)?;
            validate(pipeline, cli.quiet)
        }
        Command::Status => {
            print_status(pipeline);
            Ok(true)
        }
        Command::Threshold { value } => {
            pipeline.set_threshold(value)?;
            if !cli.quiet {
                eprintln!("Threshold set to {value:.2}");
            }
            Ok(true)
        }
        Command::Reset => {
            pipeline.reset()?;
            if !cli.quiet {
                eprintln!("Workspace reset");
            }
            Ok(true)
        }
    }
}

fn download(pipeline: &mut Pipeline, quiet: bool) -> Result<()> {
    let fetcher = pipeline.http_fetcher();
    let tally = {
        let sink = BarSink::new(Stage::Download, quiet);
        pipeline.download(&fetcher, &sink)?
    };
    print_summary(Stage::Download, &tally, quiet);
    Ok(())
}

fn filter(pipeline: &mut Pipeline, quiet: bool) -> Result<()> {
    let tally = {
        let sink = BarSink::new(Stage::Filter, quiet);
        pipeline.filter(&sink)?
    };
    print_summary(Stage::Filter, &tally, quiet);
    Ok(())
}

fn redact(pipeline: &mut Pipeline, quiet: bool) -> Result<()> {
    let tally = {
        let sink = BarSink::new(Stage::Redact, quiet);
        pipeline.redact(&sink)?
    };
    print_summary(Stage::Redact, &tally, quiet);
    Ok(())
}

fn validate(pipeline: &mut Pipeline, quiet: bool) -> Result<bool> {
    let missing = pipeline.validate()?;
    for url in &missing {
        println!("{url}");
    }
    if !quiet {
        if missing.is_empty() {
            eprintln!("[validate] all assets processed");
        } else {
            eprintln!("[validate] {} asset(s) missing", missing.len());
        }
    }
    Ok(missing.is_empty())
}

fn print_summary<O: Outcome>(stage: Stage, tally: &Tally<O>, quiet: bool) {
    if !quiet {
        eprintln!("[{stage}] {tally} (Total: {})", tally.total());
    }
}

fn print_status(pipeline: &Pipeline) {
    let state = pipeline.state();
    println!("stage:     {}", state.stage);
    println!("threshold: {:.2}", state.threshold);
    for stage in Stage::ALL {
        let mark = if state.is_complete(stage) { "done" } else { "-" };
        println!("  {stage:<9} {mark}");
    }
    println!("pending:   {}", pipeline.layout().pending_count());
    println!("processed: {}", pipeline.layout().processed_count());
}
