use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use kymo_stats::data::loader;
use kymo_stats::settings::Settings;
use kymo_stats::Model;

/// Load a kymograph stats table, filter it and print a summary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stats table (.csv or .json)
    #[arg(value_name = "FILE")]
    stats: PathBuf,

    /// JSON settings holding the feature filters to apply
    #[arg(short = 's', long = "settings", value_name = "SETTINGS")]
    settings: Option<PathBuf>,

    /// Worker threads for filtering (overrides the settings file)
    #[arg(short = 't', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Drop stats hidden by the filters before printing
    #[arg(long = "crop")]
    crop: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => Settings::from_json(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let model = Model::new();
    let mut stats = loader::load_file(&args.stats, model.ids())
        .with_context(|| format!("loading stats from {}", args.stats.display()))?;
    if let Some(n) = args.threads.or(settings.num_threads) {
        stats.set_num_threads(n);
    }
    info!("Filtering on {} worker threads", stats.num_threads());
    model.set_stats(stats, true);

    if !settings.filters().is_empty() {
        print!("{settings}");
        model.filter_stats(settings.filters(), true);
    }
    if args.crop {
        model.stats().crop();
    }

    print!("{model}");
    println!();
    let stats = model.stats();
    for group in stats.key_set() {
        println!(
            "{group}: {} visible of {}",
            stats.count_in(&group, true),
            stats.count_in(&group, false)
        );
    }
    Ok(())
}
