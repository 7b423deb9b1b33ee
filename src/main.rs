use clap::{Parser, Subcommand};
use deck_gen::backend;
use deck_gen::batch::{BatchOptions, BatchRunner};
use deck_gen::config::{self, BackendKind, DeckConfig, SeedMode};
use deck_gen::manifest::{self, Rank, Suit, WorkItem};
use deck_gen::naming;
use deck_gen::output;
use deck_gen::presets::{BACKGROUNDS, TECHNIQUES};
use deck_gen::prompt::{self, StyleConfig};
use deck_gen::summary::{RunState, RunSummary};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deck-gen")]
#[command(about = "Generate a themed deck of playing-card images")]
#[command(long_about = "\
Generate a themed deck of playing-card images

Renders all 55 assets of a deck (52 cards, 2 jokers, 1 card back) through a
text-to-image backend, one at a time, in a single shared style.

Output layout:

  card_images/
  ├── Hearts_01_Ace.png            # {Suit}_{NN}_{Value}
  ├── ...
  ├── Clubs_13_King.png
  ├── ZZ_Joker_14_Joker1.png
  ├── ZZ_Joker_15_Joker2.png
  ├── ZZ_ZZ_00_Card-Back.png
  └── batch_results.json           # per-card status, timings, errors

Backends:
  remote   cloud image API (API key read from $GEMINI_API_KEY by default)
  local    diffusion server exposing /sdapi/v1/txt2img

Transient failures (timeouts, rate limits, 5xx) are retried with backoff.
Press Ctrl-C to stop after the current card; the summary is still written.

Run 'deck-gen gen-config' to generate a documented deck-gen.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = stock defaults)
    #[arg(long, default_value = "deck-gen.toml", global = true)]
    config: PathBuf,

    /// Output directory (overrides run.output_dir)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Command-line overrides for style, image and backend settings.
#[derive(clap::Args, Clone, Default)]
struct OverrideArgs {
    /// Visual theme, e.g. "Pirates"
    #[arg(long)]
    theme: Option<String>,
    /// Art technique: free text or a preset (see `deck-gen presets`)
    #[arg(long)]
    technique: Option<String>,
    /// Background: free text or a preset
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Inference steps
    #[arg(long)]
    steps: Option<u32>,
    /// Base seed (implies --seed-mode fixed unless a mode is given)
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, value_parser = ["random", "fixed", "per-card"])]
    seed_mode: Option<String>,
    #[arg(long, value_parser = ["remote", "local"])]
    backend: Option<String>,
}

impl OverrideArgs {
    fn apply(&self, config: &mut DeckConfig) {
        if let Some(theme) = &self.theme {
            config.style.theme = theme.clone();
        }
        if let Some(technique) = &self.technique {
            config.style.technique = technique.clone();
        }
        if let Some(background) = &self.background {
            config.style.background = background.clone();
        }
        if let Some(width) = self.width {
            config.image.width = width;
        }
        if let Some(height) = self.height {
            config.image.height = height;
        }
        if let Some(steps) = self.steps {
            config.image.steps = steps;
        }
        if let Some(seed) = self.seed {
            config.seed.value = Some(seed);
            if self.seed_mode.is_none() && config.seed.mode == SeedMode::Random {
                config.seed.mode = SeedMode::Fixed;
            }
        }
        if let Some(mode) = self.seed_mode.as_deref().and_then(SeedMode::parse) {
            config.seed.mode = mode;
        }
        if let Some(kind) = self.backend.as_deref().and_then(BackendKind::parse) {
            config.backend.kind = kind;
        }
    }
}

/// Which part of the deck to generate. Defaults to all 55 items.
#[derive(clap::Args, Clone, Default)]
#[group(multiple = false)]
struct SelectArgs {
    /// Generate a single card, e.g. `--card K spades` or `--card 7 hearts`
    #[arg(long, num_args = 2, value_names = ["VALUE", "SUIT"])]
    card: Option<Vec<String>>,
    /// Generate only the card back
    #[arg(long)]
    back_only: bool,
    /// Generate only these card keys (filenames are accepted too)
    #[arg(long, num_args = 1..)]
    only: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the deck (or part of it)
    Generate {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Re-generate the cards that failed in the last run
    RetryFailed {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// List every card with its output filename
    List,
    /// List the built-in technique and background presets
    Presets,
    /// Validate config and backend, and show sample prompts
    Check {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Print a stock deck-gen.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("deck_gen=info".parse()?))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Generate { select, overrides } => {
            let config = load_config(&cli, overrides)?;
            let items = select_items(select)?;
            let summary = run_batch(&config, items, None)?;
            output::print_summary(&summary, &output_dir(&config));
            finish(&summary)?;
        }
        Command::RetryFailed { overrides } => {
            let config = load_config(&cli, overrides)?;
            let dir = output_dir(&config);
            let previous = RunSummary::load(&dir)?;
            let mut items = Vec::new();
            for key in previous.failed_keys() {
                match naming::parse_card_key(&key) {
                    Some(item) => items.push(item),
                    None => warn!(%key, "skipping unrecognized card key"),
                }
            }
            if items.is_empty() {
                println!("No failed cards in {}", RunSummary::path(&dir).display());
                return Ok(());
            }
            println!("==> Retrying {} failed cards", items.len());
            let summary = run_batch(&config, items, Some(previous))?;
            output::print_summary(&summary, &dir);
            finish(&summary)?;
        }
        Command::List => {
            output::print_manifest_list(&manifest::enumerate(), "png");
        }
        Command::Presets => {
            output::print_presets(TECHNIQUES, BACKGROUNDS);
        }
        Command::Check { overrides } => {
            let config = load_config(&cli, overrides)?;
            let style = StyleConfig::from_config(&config)?;
            backend::from_config(&config.backend)?;
            let samples = [
                WorkItem::standard(Suit::Hearts, Rank::Ace),
                WorkItem::standard(Suit::Spades, Rank::King),
                WorkItem::joker(1),
                WorkItem::back(),
            ]
            .into_iter()
            .map(|item| prompt::build(&item, &style).map(|request| (item, request)))
            .collect::<Result<Vec<_>, _>>()?;
            output::print_check_output(&style, &config.backend.label(), &samples);
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file, apply command-line overrides, and validate the
/// result once.
fn load_config(cli: &Cli, overrides: &OverrideArgs) -> Result<DeckConfig, Box<dyn Error>> {
    let mut config = config::load_unvalidated(&cli.config)?;
    if let Some(dir) = &cli.output {
        config.run.output_dir = dir.to_string_lossy().into_owned();
    }
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn output_dir(config: &DeckConfig) -> PathBuf {
    PathBuf::from(&config.run.output_dir)
}

fn select_items(select: &SelectArgs) -> Result<Vec<WorkItem>, Box<dyn Error>> {
    if let Some(card) = &select.card {
        let [value, suit] = card.as_slice() else {
            return Err("--card takes a value and a suit".into());
        };
        let rank = Rank::parse(value).ok_or_else(|| format!("unknown card value: {value}"))?;
        let suit = Suit::parse(suit).ok_or_else(|| format!("unknown suit: {suit}"))?;
        return Ok(vec![WorkItem::standard(suit, rank)]);
    }
    if select.back_only {
        return Ok(vec![WorkItem::back()]);
    }
    if !select.only.is_empty() {
        let mut keys = Vec::new();
        for raw in &select.only {
            let item = naming::parse_card_key(raw).ok_or_else(|| format!("unknown card key: {raw}"))?;
            keys.push(item.key());
        }
        let (items, unknown) = manifest::select_keys(&manifest::enumerate(), &keys);
        if !unknown.is_empty() {
            return Err(format!("unknown card keys: {}", unknown.join(", ")).into());
        }
        return Ok(items);
    }
    Ok(manifest::enumerate())
}

/// Run the batch with a progress printer thread and Ctrl-C handling.
fn run_batch(
    config: &DeckConfig,
    items: Vec<WorkItem>,
    previous: Option<RunSummary>,
) -> Result<RunSummary, Box<dyn Error>> {
    let style = StyleConfig::from_config(config)?;
    let client = backend::from_config(&config.backend)?;
    let cancel = Arc::new(AtomicBool::new(false));
    listen_for_ctrl_c(Arc::clone(&cancel))?;

    let mut runner = BatchRunner::new(
        client.as_ref(),
        items,
        style,
        BatchOptions::from_config(config),
        config.backend.label(),
    )?;
    if let Some(previous) = previous {
        runner = runner.merge_into(previous)?;
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_batch_event(&event) {
                println!("{}", line);
            }
        }
    });
    let result = runner.run(&cancel, Some(tx));
    printer
        .join()
        .map_err(|_| "progress printer thread panicked")?;
    Ok(result?)
}

/// Set `cancel` on the first Ctrl-C; exit immediately on the second.
fn listen_for_ctrl_c(cancel: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    std::thread::spawn(move || {
        runtime.block_on(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                if cancel.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                info!("interrupt received, stopping after the current card (Ctrl-C again to quit)");
            }
        });
    });
    Ok(())
}

/// Exit status: an aborted run is an error, everything else is not.
fn finish(summary: &RunSummary) -> Result<(), Box<dyn Error>> {
    if summary.state == RunState::Aborted {
        return Err(format!(
            "run aborted after fatal backend errors ({} of {} cards generated)",
            summary.completed, summary.total_cards
        )
        .into());
    }
    Ok(())
}
