use std::{env, path::Path};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

use crate::model::ModelError;

async fn download_file(url: &str, path: &Path) -> Result<(), ModelError> {
    tracing::info!("Downloading {} from {}", path.display(), url);
    let download_error = |reason: String| ModelError::Download {
        url: url.to_string(),
        reason,
    };

    let mut header_map = HeaderMap::new();

    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| download_error("invalid GITHUB_TOKEN format".to_string()))?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?;

    if !response.status().is_success() {
        return Err(download_error(format!("status {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(e.to_string()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;

    Ok(())
}

/// Fetches the weights file from `url` when it is configured and `path` is missing.
pub async fn ensure_model_file(path: &Path, url: Option<&str>) -> Result<(), ModelError> {
    tracing::debug!("Checking model file {}", path.display());
    match url {
        Some(url) if !path.exists() => download_file(url, path).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_file_is_not_downloaded() {
        let path = env::temp_dir().join(format!("catdog-service-present-{}", std::process::id()));
        tokio::fs::write(&path, b"weights").await.unwrap();

        // unroutable url: any download attempt would fail
        let result = ensure_model_file(&path, Some("http://127.0.0.1:1/model")).await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_without_url_is_left_alone() {
        let path = env::temp_dir().join("catdog-service-never-created");

        assert!(ensure_model_file(&path, None).await.is_ok());
        assert!(!path.exists());
    }
}
