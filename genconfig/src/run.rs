use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    data::document::{extension, parse_by_extension, render_by_extension},
    loader::{default_schema_by_init, load_schema},
    resolve::{Resolution, resolve},
};

/// Where to write the artifacts of a run. Unset targets are skipped.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    pub makefile: Option<PathBuf>,
    pub header: Option<PathBuf>,
    /// Resolved configuration, JSON or TOML by extension.
    pub config: Option<PathBuf>,
}

/// Load a schema and a configuration and resolve them.
///
/// When `schema_path` is not provided, it is derived from the config path.
///
/// # Errors
///
/// I/O and parse failures are returned with context. A configuration that
/// does not resolve yields a [`Rejection`](crate::resolve::Rejection),
/// which can be recovered with `downcast_ref`.
pub async fn run(
    config_path: impl AsRef<Path>,
    schema_path: Option<impl AsRef<Path>>,
) -> anyhow::Result<Resolution> {
    let config_path = config_path.as_ref();
    let schema_path = match schema_path {
        Some(path) => path.as_ref().to_path_buf(),
        None => default_schema_by_init(config_path),
    };
    info!(
        "resolving {} against {}",
        config_path.display(),
        schema_path.display()
    );

    let (schema, config) = tokio::try_join!(load_schema(&schema_path), read_config(config_path))?;

    Ok(resolve(&schema, config)?)
}

async fn read_config(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse_by_extension(&content, extension(path))
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Write the requested artifacts of a successful run.
pub async fn write_outputs(resolution: &Resolution, outputs: &Outputs) -> anyhow::Result<()> {
    if let Some(path) = &outputs.makefile {
        write(path, &resolution.makefile).await?;
    }
    if let Some(path) = &outputs.header {
        write(path, &resolution.header).await?;
    }
    if let Some(path) = &outputs.config {
        let content = render_by_extension(&resolution.config, extension(path))?;
        write(path, &content).await?;
    }
    Ok(())
}

async fn write(path: &Path, content: &str) -> anyhow::Result<()> {
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}
