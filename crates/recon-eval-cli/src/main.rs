use std::{fs, io::Write, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recon_eval_pipeline::{
    DatasetPaths, EvaluationConfig, EvaluationSession, EvaluationSummary, ReconstructionEvaluation,
    run_evaluation, run_parameter_study,
};

/// Evaluate photogrammetric reconstructions against synthetic ground truth.
#[derive(Debug, Parser)]
#[command(name = "recon-eval", author, version, about = "Reconstruction evaluation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one reconstruction run and print its summary as JSON.
    Evaluate {
        /// Reconstruction engine output folder.
        #[arg(long)]
        output_dir: PathBuf,

        /// Rendered images with the renderer's pose tables and params.json.
        #[arg(long)]
        image_dir: PathBuf,

        /// Ground-truth mesh (.obj).
        #[arg(long)]
        object: PathBuf,

        /// Where results go. Defaults to <output-dir>/Evaluation.
        #[arg(long)]
        evaluation_dir: Option<PathBuf>,

        #[command(flatten)]
        options: ConfigArgs,
    },
    /// Evaluate every row of <dir>/ParameterSet.csv.
    Study {
        /// Study directory.
        #[arg(long)]
        dir: PathBuf,

        #[command(flatten)]
        options: ConfigArgs,
    },
    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, clap::Args)]
struct ConfigArgs {
    /// Optional path to a JSON EvaluationConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recompute every stage instead of reloading persisted results.
    #[arg(long)]
    recompute: bool,

    /// CloudCompare executable for fine registration.
    #[arg(long)]
    cloudcompare: Option<PathBuf>,
}

fn load_config(args: &ConfigArgs) -> Result<EvaluationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => EvaluationConfig::default(),
    };
    config.recompute |= args.recompute;
    if let Some(exe) = &args.cloudcompare {
        config.fine_registration.cloudcompare = Some(exe.clone());
    }
    Ok(config)
}

fn evaluate(paths: DatasetPaths, config: EvaluationConfig) -> Result<EvaluationSummary> {
    let mut session = EvaluationSession::<ReconstructionEvaluation>::with_description(format!(
        "recon-eval {}",
        paths.reconstruction_dir.display()
    ));
    session.set_config(config)?;
    run_evaluation(&mut session, paths)?;
    Ok(EvaluationSummary::from(session.require_output()?))
}

fn run_study(dir: &Path, config: &EvaluationConfig) -> Result<String> {
    let study = run_parameter_study(dir, config)?;
    Ok(format!(
        "{} parameter sets, {} failed",
        study.rows().len(),
        study.failures()
    ))
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    match cli.command {
        Command::Evaluate {
            output_dir,
            image_dir,
            object,
            evaluation_dir,
            options,
        } => {
            let config = load_config(&options)?;
            let mut paths = DatasetPaths::new(output_dir, image_dir, object);
            if let Some(dir) = evaluation_dir {
                paths = paths.with_evaluation_dir(dir);
            }
            let summary = evaluate(paths, config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Study { dir, options } => {
            let config = load_config(&options)?;
            println!("{}", run_study(&dir, &config)?);
        }
        Command::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&EvaluationConfig::default())?);
        }
    }
    Ok(())
}
