// main.rs
// Description: Command line entry point. Trains a model from a JSON sample file,
//              generates text from a saved model, prints model information.
// History:
// - 2026-02-01: Add menu loop and checkpoint save and load.
// - 2026-10-19: Replace the menu loop with train / predict / info subcommands.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use minillm::{
    GenerationConfig, Llm, ModelConfig, OptimizerConfig, Result, TrainConfig, TrainingSample, Vocabulary,
};

#[derive(Parser)]
#[command(name = "minillm", version, about = "Train and run a tiny from-scratch transformer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a vocabulary from the samples, train a model and save it
    Train {
        /// JSON array of {"input": ..., "target": ...} objects
        #[arg(long)]
        samples: PathBuf,
        /// Output model file
        #[arg(long, default_value = "model.bin")]
        out: PathBuf,
        #[arg(long, default_value_t = 100)]
        epochs: usize,
        /// sgd, adam or manual
        #[arg(long, default_value = "adam")]
        optimizer: String,
        #[arg(long, default_value_t = 0.01)]
        lr: f32,
        /// Embedding dimension
        #[arg(long, default_value_t = 32)]
        dim: usize,
        #[arg(long, default_value_t = 2)]
        layers: usize,
        #[arg(long, default_value_t = 4)]
        heads: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Generate a continuation for a prompt
    Predict {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 10)]
        max_tokens: usize,
        /// Sample with this temperature instead of greedy decoding
        #[arg(long)]
        temperature: Option<f32>,
        /// Seed for sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Print configuration and layer summary of a saved model
    Info {
        #[arg(long)]
        model: PathBuf,
    },
}

fn read_samples(path: &Path) -> Result<Vec<TrainingSample>> {
    let s_json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s_json)?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_train(
    samples: &Path,
    out: &Path,
    i_epochs: usize,
    s_optimizer: &str,
    d_lr: f32,
    i_dim: usize,
    i_layers: usize,
    i_heads: usize,
    u64_seed: u64,
) -> Result<()> {
    let v_samples = read_samples(samples)?;
    let vocab = Vocabulary::from_samples(&v_samples);
    log::info!("{} samples, vocabulary of {} tokens", v_samples.len(), vocab.len());

    let config = ModelConfig::new(i_dim, i_layers, i_heads).with_seed(u64_seed);
    let mut llm = Llm::new(vocab, config)?;
    log::info!("network: {} ({} parameters)", llm.network_description(), llm.total_parameters());

    let train_config = TrainConfig::new(i_epochs, OptimizerConfig::parse(s_optimizer, d_lr)?);
    let report = llm.train(&v_samples, &train_config)?;
    if let Some(d_loss) = report.final_loss() {
        log::info!("final loss {:.4}, {} samples skipped", d_loss, report.samples_skipped);
    }

    llm.save(out)
}

fn cmd_predict(
    model: &Path,
    s_prompt: &str,
    i_max_tokens: usize,
    opt_temperature: Option<f32>,
    u64_seed: u64,
) -> Result<()> {
    let llm = Llm::load(model)?;
    let generation = match opt_temperature {
        Some(d_temperature) => GenerationConfig::sampled(d_temperature, u64_seed),
        None => GenerationConfig::default(),
    };
    let s_out = llm.predict_with(s_prompt, i_max_tokens, &generation)?;
    println!("{s_out}");
    Ok(())
}

fn cmd_info(model: &Path) -> Result<()> {
    let llm = Llm::load(model)?;
    println!("{}", serde_json::to_string_pretty(llm.config())?);
    println!("vocabulary: {} tokens", llm.vocab_size());
    println!("network: {}", llm.network_description());
    println!("parameters: {}", llm.total_parameters());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Train {
            samples,
            out,
            epochs,
            optimizer,
            lr,
            dim,
            layers,
            heads,
            seed,
        } => cmd_train(&samples, &out, epochs, &optimizer, lr, dim, layers, heads, seed),
        Command::Predict {
            model,
            prompt,
            max_tokens,
            temperature,
            seed,
        } => cmd_predict(&model, &prompt, max_tokens, temperature, seed),
        Command::Info { model } => cmd_info(&model),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
