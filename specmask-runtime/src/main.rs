use anyhow::{anyhow, Result};
use clap::{arg, Command};
use rand::{rngs::StdRng, Rng, SeedableRng};
use specmask_core::{
    generate::{generate_model, generate_sample},
    FrozenModel, JsonlSink, MaskOptimizer, ModelSnapshot, Sample, SearchSettings,
};
use std::{fs, path::PathBuf};

fn cli() -> Command {
    Command::new("specmask-runtime")
        .about("Generates instances and searches spectral noise masks")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("generate")
                .about("Generates a synthetic sample and a frozen model snapshot")
                .arg(arg!(<SEED> "Seed value").value_parser(clap::value_parser!(u64)))
                .arg(
                    arg!(--bins [BINS] "Number of frequency bins")
                        .default_value("257")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--frames [FRAMES] "Number of time frames")
                        .default_value("128")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--classes [CLASSES] "Number of output classes")
                        .default_value("31")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--hidden [HIDDEN] "Hidden layer width")
                        .default_value("256")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--layers [LAYERS] "Number of hidden layers")
                        .default_value("2")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--sample [SAMPLE_FILE] "Output path for the sample")
                        .default_value("sample.json")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--model [MODEL_FILE] "Output path for the model snapshot")
                        .default_value("model.json")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Runs the mask optimization loop")
                .arg(
                    arg!(<SETTINGS> "Settings json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(<SAMPLE> "Path to a sample file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(<MODEL> "Path to a frozen model snapshot")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--outdir [OUTDIR] "Directory for the solution and diagnostics")
                        .default_value("specmask_run")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}

fn main() {
    let matches = cli().get_matches();

    if let Err(e) = match matches.subcommand() {
        Some(("generate", sub_m)) => generate(
            *sub_m.get_one::<u64>("SEED").unwrap(),
            *sub_m.get_one::<usize>("bins").unwrap(),
            *sub_m.get_one::<usize>("frames").unwrap(),
            *sub_m.get_one::<usize>("classes").unwrap(),
            *sub_m.get_one::<usize>("hidden").unwrap(),
            *sub_m.get_one::<usize>("layers").unwrap(),
            sub_m.get_one::<PathBuf>("sample").unwrap().clone(),
            sub_m.get_one::<PathBuf>("model").unwrap().clone(),
        ),
        Some(("search", sub_m)) => search(
            sub_m.get_one::<String>("SETTINGS").unwrap().clone(),
            sub_m.get_one::<PathBuf>("SAMPLE").unwrap().clone(),
            sub_m.get_one::<PathBuf>("MODEL").unwrap().clone(),
            sub_m.get_one::<PathBuf>("outdir").unwrap().clone(),
        ),
        _ => Err(anyhow!("Invalid subcommand")),
    } {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn generate(
    seed: u64,
    bins: usize,
    frames: usize,
    classes: usize,
    hidden: usize,
    layers: usize,
    sample_path: PathBuf,
    model_path: PathBuf,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let sample = generate_sample(&rng.gen(), bins, frames, classes)?;
    let model = generate_model(&rng.gen(), bins, hidden, layers, classes)?;

    fs::write(&sample_path, serde_json::to_string(&sample)?)?;
    println!("sample written to: {:?}", sample_path);
    fs::write(&model_path, serde_json::to_string(&model.snapshot())?)?;
    println!("model snapshot written to: {:?}", model_path);
    Ok(())
}

fn search(settings: String, sample_path: PathBuf, model_path: PathBuf, outdir: PathBuf) -> Result<()> {
    let settings = load_settings(&settings);

    let sample: Sample = serde_json::from_str(&fs::read_to_string(&sample_path)?)?;
    let snapshot: ModelSnapshot = serde_json::from_str(&fs::read_to_string(&model_path)?)?;
    let mut model = FrozenModel::from_snapshot(snapshot)?;

    let mut sink = JsonlSink::new(&outdir)?;
    let mut optimizer = MaskOptimizer::new(settings, &sample);
    let solution = optimizer.run(&sample, &mut model, &mut sink)?;

    fs::write(outdir.join("solution.json"), serde_json::to_string(&solution)?)?;
    println!("solution written to: {:?}", outdir.join("solution.json"));
    println!(
        "final loss: {} (reconstruction {})",
        solution.total_loss, solution.rec_loss
    );
    Ok(())
}

fn load_settings(settings: &str) -> SearchSettings {
    let settings = if settings.ends_with(".json") {
        fs::read_to_string(settings).unwrap_or_else(|_| {
            eprintln!("Failed to read settings file: {}", settings);
            std::process::exit(1);
        })
    } else {
        settings.to_string()
    };

    serde_json::from_str::<SearchSettings>(&settings).unwrap_or_else(|_| {
        eprintln!("Failed to parse settings");
        std::process::exit(1);
    })
}
