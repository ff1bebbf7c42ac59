use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use roomrando::randomize::{Randomization, Randomizer};
use roomrando::settings::RandomizerSettings;
use roomrando::spoiler_graph;
use roomrando_game::{ItemCatalog, MapDescription};
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// Map description JSON.
    #[arg(long)]
    map: PathBuf,

    /// Item catalog JSON.
    #[arg(long)]
    catalog: PathBuf,

    /// Settings preset JSON; defaults apply when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Generate exactly this seed instead of drawing random ones.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    player: Option<usize>,

    #[arg(long)]
    scenario: Option<usize>,

    #[arg(long)]
    random_doors: bool,

    #[arg(long)]
    max_attempts: Option<usize>,

    #[arg(long)]
    output_spoiler_log: Option<PathBuf>,

    #[arg(long)]
    output_spoiler_graph: Option<PathBuf>,
}

/// Attempt seeds come from a fixed stream when a seed is given on the
/// command line, and from OS entropy otherwise so repeated runs do not
/// generate the same world.
fn attempt_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            let mut rng_seed = [0u8; 32];
            rng_seed[..8].copy_from_slice(&seed.to_le_bytes());
            StdRng::from_seed(rng_seed)
        }
        None => StdRng::from_entropy(),
    }
}

fn get_randomization(
    args: &Args,
    map: &MapDescription,
    catalog: &ItemCatalog,
    settings: &RandomizerSettings,
) -> Result<(Randomization, String)> {
    let randomizer = Randomizer::new(map, catalog, settings);
    let max_attempts = if args.seed.is_some() {
        1
    } else {
        args.max_attempts.unwrap_or(500)
    };

    let mut rng = attempt_rng(args.seed);

    for attempt_num in 1..=max_attempts {
        let seed = match args.seed {
            Some(seed) => seed,
            None => rng.next_u64() & 0xFFFFFFFF,
        };
        info!("Attempt {attempt_num}/{max_attempts}: seed={seed}");
        match randomizer.randomize(seed) {
            Ok((randomization, graph)) => {
                let dot = spoiler_graph::render_dot(&graph, catalog);
                return Ok((randomization, dot));
            }
            Err(e) if e.is_retryable() && args.seed.is_none() => {
                info!("Attempt {attempt_num}/{max_attempts}: generation failed: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }
    bail!("Exhausted randomization attempts");
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let map = MapDescription::load(&args.map)?;
    let catalog = ItemCatalog::load(&args.catalog)?;
    let mut settings = match &args.settings {
        Some(path) => RandomizerSettings::load(path)?,
        None => RandomizerSettings::default(),
    };
    if let Some(player) = args.player {
        settings.player = player;
    }
    if let Some(scenario) = args.scenario {
        settings.scenario = scenario;
    }
    if args.random_doors {
        settings.random_doors = true;
    }

    let (randomization, dot) = get_randomization(&args, &map, &catalog, &settings)?;
    info!(
        "Generated seed {}: {} door assignments, {} item assignments, all rooms reachable: {}",
        randomization.seed,
        randomization.doors.len(),
        randomization.items.len(),
        randomization.all_rooms_reachable
    );

    if let Some(path) = &args.output_spoiler_log {
        let spoiler = serde_json::to_string_pretty(&randomization)?;
        std::fs::write(path, spoiler)
            .with_context(|| format!("Unable to write spoiler log at {}", path.display()))?;
        info!("Wrote spoiler log to {}", path.display());
    }
    if let Some(path) = &args.output_spoiler_graph {
        std::fs::write(path, dot)
            .with_context(|| format!("Unable to write spoiler graph at {}", path.display()))?;
        info!("Wrote spoiler graph to {}", path.display());
    }
    Ok(())
}
