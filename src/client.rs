//! HTTP access to the image service.

use anyhow::{Context, Result};
use clap::crate_version;
use std::time::Duration;

use crate::request::RequestDescriptor;

const ZERO_DURATION: Duration = Duration::from_secs(0);

/// A response from the image service. Non-2xx statuses are responses too;
/// only failures to get any response at all are errors.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ImageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues `exportImage` requests.
#[allow(async_fn_in_trait)]
pub trait ImageClient {
    /// Sends `request` and waits for the complete response body.
    async fn get(&self, request: &RequestDescriptor) -> Result<ImageResponse>;
}

/// [`ImageClient`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpImageClient {
    client: reqwest::Client,
}

impl HttpImageClient {
    /// Creates a client aborting requests after `timeout`. Pass the zero
    /// duration to disable the timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if timeout > ZERO_DURATION {
            builder = builder.timeout(timeout);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::USER_AGENT,
            format!("municipal-tile-downloader_rs_{}", crate_version!())
                .parse()
                .context("invalid user agent")?,
        );

        let client = builder
            .default_headers(headers)
            .build()
            .with_context(|| "failed creating HTTP client")?;

        Ok(Self { client })
    }
}

impl ImageClient for HttpImageClient {
    async fn get(&self, request: &RequestDescriptor) -> Result<ImageResponse> {
        let url = request.url()?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .context("failed reading response body")?
            .to_vec();

        Ok(ImageResponse { status, body })
    }
}
