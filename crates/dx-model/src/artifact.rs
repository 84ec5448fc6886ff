use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use dx_core::error::XaiError;
use dx_core::traits::ImageModel;
use serde::{Deserialize, Serialize};

use crate::network::Network;

/// Version of the on-disk weight format.
pub const FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"DXNN";

/// Enveloppe sérialisée (bincode) d'un réseau : magic, version, vocabulaire.
#[derive(Serialize, Deserialize)]
struct Artifact {
    magic: [u8; 4],
    version: u32,
    classes: Vec<String>,
    network: Network,
}

/// Write `network` and its class names to `path`.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn save_network(network: &Network, classes: &[String], path: &Path) -> Result<()> {
    let artifact = Artifact {
        magic: MAGIC,
        version: FORMAT_VERSION,
        classes: classes.to_vec(),
        network: network.clone(),
    };
    let bytes = bincode::serialize(&artifact).context("Failed to serialize network")?;
    fs::write(path, &bytes)
        .with_context(|| format!("Cannot write model artifact: {}", path.display()))?;
    log::info!(
        "Saved model artifact {} ({} bytes)",
        path.display(),
        bytes.len()
    );
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Artifact> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read model artifact: {}", path.display()))?;
    let artifact: Artifact =
        bincode::deserialize(&bytes).context("Model artifact is corrupt or truncated")?;
    if artifact.magic != MAGIC {
        bail!("{} is not a model artifact", path.display());
    }
    if artifact.version != FORMAT_VERSION {
        bail!(
            "Model artifact format v{} unsupported (expected v{FORMAT_VERSION})",
            artifact.version
        );
    }
    let classes = artifact.network.validate()?;
    if classes != artifact.network.num_classes() || classes != artifact.classes.len() {
        bail!(
            "Model artifact declares {} class names for a {classes}-way network",
            artifact.classes.len()
        );
    }
    Ok(artifact)
}

/// Load a network and its class names from `path`.
///
/// # Errors
/// Returns `XaiError::ModelUnavailable` if the file is missing, corrupt, of
/// another format version, or describes an inconsistent network.
pub fn load_network(path: &Path) -> Result<(Network, Vec<String>), XaiError> {
    read_artifact(path)
        .map(|a| (a.network, a.classes))
        .map_err(|e| XaiError::ModelUnavailable(format!("{e:#}")))
}
