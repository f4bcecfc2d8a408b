use bytes::Bytes;
use cli9_sdk::{ShellError, ShellResult};

/// Download the body behind a network file.
pub async fn fetch(client: &reqwest::Client, url: &str) -> ShellResult<Bytes> {
    tracing::debug!(url, "fetching network file");
    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| ShellError::shell(format!("Could not fetch {url}: {e}")))?;
    response
        .bytes()
        .await
        .map_err(|e| ShellError::shell(format!("Could not read {url}: {e}")))
}
