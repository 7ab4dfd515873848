//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

use crate::config::ModelSource;

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory which downloaded models are kept in.
pub fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("handface")
}

/// File name a downloaded model is stored under.
fn cached_file_name(url: &str) -> Option<&str> {
    url.split(['?', '#'])
        .next()
        .and_then(|url| url.rsplit('/').next())
        .filter(|name| !name.is_empty())
}

/// Resolve a model source to a local file, downloading it on first use.
pub async fn resolve_model_path(source: &ModelSource) -> Result<PathBuf> {
    match source {
        ModelSource::Path(path) => {
            if !path.is_file() {
                bail!("model file {} not found", path.display());
            }
            Ok(path.clone())
        }
        ModelSource::Url(url) => {
            let file_name = cached_file_name(url)
                .with_context(|| format!("cannot derive a file name from {url}"))?;
            let cache_dir = model_cache_dir();
            let filepath = cache_dir.join(file_name);

            if filepath.is_file() {
                log::info!("Using cached model {}", filepath.display());
                return Ok(filepath);
            }

            std::fs::create_dir_all(&cache_dir)
                .with_context(|| format!("failed to create {}", cache_dir.display()))?;

            log::info!("Downloading model from {} to {}", url, filepath.display());
            // Only a complete download ends up under the cached name
            let partial = filepath.with_extension("part");
            download_file(&Client::new(), url, &partial)
                .await
                .with_context(|| format!("failed to download model from {url}"))?;
            std::fs::rename(&partial, &filepath)?;

            Ok(filepath)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_name_from_url() {
        assert_eq!(
            cached_file_name("https://example.com/models/hand_face.onnx?raw=1"),
            Some("hand_face.onnx")
        );
        assert_eq!(cached_file_name("https://example.com/models/"), None);
    }

    #[tokio::test]
    async fn missing_local_model_is_an_error() {
        let source = ModelSource::Path("does/not/exist.onnx".into());
        assert!(resolve_model_path(&source).await.is_err());
    }
}
