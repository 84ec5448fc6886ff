use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// dxai : classification deepfake audio et explications visuelles.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Sous-commandes.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify an audio file (or a saved spectrogram).
    Classify(InputArgs),

    /// Classify, then explain the decision.
    Explain {
        #[command(flatten)]
        input: InputArgs,

        /// Perturbation explanation (LIME).
        #[arg(long, default_value_t = false)]
        lime: bool,

        /// Gradient explanation (Grad-CAM).
        #[arg(long, default_value_t = false)]
        gradcam: bool,

        /// Number of perturbation samples.
        #[arg(long)]
        samples: Option<usize>,

        /// Regions kept in the perturbation mask.
        #[arg(long)]
        top_k: Option<usize>,

        /// Seed of the perturbation sampler.
        #[arg(long)]
        seed: Option<u64>,

        /// Class explained by Grad-CAM (default: predicted label index).
        #[arg(long)]
        target: Option<usize>,
    },

    /// Write a seeded, untrained weight artifact.
    InitModel {
        /// Architecture : mobilenet, inception, vgg, custom.
        #[arg(long, default_value = "mobilenet")]
        arch: String,

        /// Number of output classes.
        #[arg(long, default_value_t = 2)]
        classes: usize,

        /// Weight initialization seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Destination file.
        #[arg(long)]
        out: PathBuf,
    },
}

/// Entrée commune à classify / explain.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Audio file (WAV, FLAC, OGG, MP3).
    #[arg(long, conflicts_with = "image")]
    pub audio: Option<PathBuf>,

    /// Previously saved spectrogram image, used instead of --audio.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Classifier weight artifact (overrides the configuration).
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Output directory for PNG renderings.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl InputArgs {
    /// Validate that exactly one input is provided.
    ///
    /// # Errors
    /// Returns an error if neither --audio nor --image is given.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.audio.is_none() && self.image.is_none() {
            anyhow::bail!("Aucune entrée spécifiée. Utilisez --audio ou --image.");
        }
        Ok(())
    }
}
