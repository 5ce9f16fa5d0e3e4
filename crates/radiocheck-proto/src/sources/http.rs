use std::time::Duration;

use reqwest::Client;

use crate::error::SourceError;

/// Shared client for the HTML sources. The overall timeout bounds every
/// request including the body read.
pub fn build_client(user_agent: &str, timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

/// Client for audio streams. No overall timeout: the body never ends, so the
/// stream adapter bounds reads itself.
pub fn build_stream_client(user_agent: &str, connect_timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout.min(Duration::from_secs(5)))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

/// GET a page and return its body, treating any non-success status as an error.
pub async fn fetch_html(client: &Client, url: &str) -> Result<String, SourceError> {
    let response = client
        .get(url)
        .header("Accept", "text/html")
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }

    response.text().await.map_err(classify)
}

/// Keep timeouts distinguishable from other transport failures in the logs.
pub fn classify(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Http(e)
    }
}
