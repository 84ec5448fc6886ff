use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dx_app::output::write_artifacts;
use dx_app::{ExplainRequest, Pipeline};
use dx_core::config::{Architecture, PipelineConfig};
use dx_core::frame::IMAGE_SIZE;
use dx_core::runtime::CancelToken;
use dx_model::Network;

mod cli;

use cli::{Command, InputArgs};

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    // 3. Charger la config
    let mut config = resolve_config(&cli.config)?;

    match cli.command {
        Command::Classify(input) => analyze(&mut config, &input, &ExplainRequest::classify_only()),
        Command::Explain {
            input,
            lime,
            gradcam,
            samples,
            top_k,
            seed,
            target,
        } => {
            // 4. Overrides CLI
            if let Some(n) = samples {
                config.perturbation.num_samples = n;
            }
            if let Some(k) = top_k {
                config.perturbation.top_k = k;
            }
            if let Some(s) = seed {
                config.perturbation.seed = s;
            }
            config.clamp_all();
            // Neither flag: both explanations
            let both = !lime && !gradcam;
            let request = ExplainRequest {
                perturbation: lime || both,
                gradient: gradcam || both,
                gradient_target: target,
            };
            analyze(&mut config, &input, &request)
        }
        Command::InitModel {
            arch,
            classes,
            seed,
            out,
        } => init_model(&config, &arch, classes, seed, &out),
    }
}

fn resolve_config(path: &Path) -> Result<PipelineConfig> {
    if path.exists() {
        dx_core::config::load_config(path)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            path.display()
        );
        Ok(PipelineConfig::default())
    }
}

fn analyze(config: &mut PipelineConfig, input: &InputArgs, request: &ExplainRequest) -> Result<()> {
    input.validate()?;
    if let Some(model) = &input.model {
        config.classifier.model_path = Some(model.clone());
    }

    let pipeline = Pipeline::from_config(config).context("Cannot initialise the pipeline")?;
    let cancel = CancelToken::new();

    let report = if let Some(audio_path) = &input.audio {
        let audio = dx_audio::decode::decode_file(audio_path)?;
        pipeline.run(&audio, request, &cancel)?
    } else if let Some(image_path) = &input.image {
        let image = dx_render::export::load_image(image_path, IMAGE_SIZE)?;
        pipeline.run_on_image(Arc::new(image), request, &cancel)?
    } else {
        anyhow::bail!("Aucune entrée spécifiée.");
    };

    if let Some(dir) = &input.out {
        let written = write_artifacts(
            &report,
            dir,
            config.gradient.image_weight,
            config.gradient.heatmap_weight,
        )?;
        log::info!("Wrote {} image(s) to {}", written.len(), dir.display());
    }

    let json = serde_json::to_string_pretty(&report.summary())
        .context("Failed to serialize report")?;
    println!("{json}");
    Ok(())
}

fn init_model(
    config: &PipelineConfig,
    arch: &str,
    classes: usize,
    seed: u64,
    out: &Path,
) -> Result<()> {
    let architecture = Architecture::parse(arch)?;
    // Reuse configured names when the class count matches
    let names: Vec<String> = if classes == config.classifier.classes.len() {
        config.classifier.classes.clone()
    } else {
        (0..classes).map(|i| format!("class_{i}")).collect()
    };
    let net = Network::from_architecture(architecture, classes, seed)?;
    dx_model::artifact::save_network(&net, &names, out)?;
    println!("{}", out.display());
    Ok(())
}
