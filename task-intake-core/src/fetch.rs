//! reqwest-backed [`ObjectFetcher`] for signed bucket URLs.
//!
//! Signed URLs carry their own authorization, so no credentials are attached.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

use crate::config::IntakeSettings;
use crate::contract::{FetchedObject, ObjectFetcher, ServiceError};

#[derive(Debug, Clone)]
pub struct HttpObjectFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpObjectFetcher {
    pub fn new(settings: &IntakeSettings) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            max_bytes: settings.max_object_bytes,
        })
    }
}

#[async_trait]
impl ObjectFetcher for HttpObjectFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedObject, ServiceError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {} returned {}", url.path(), status).into());
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(format!("object is {len} bytes, limit is {}", self.max_bytes).into());
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(format!("object exceeds limit of {} bytes", self.max_bytes).into());
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedObject {
            bytes,
            content_type,
        })
    }
}
