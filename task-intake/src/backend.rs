#![doc = "HTTP client for the task backend: share browsing, bucket listing and URL signing."]
//
//! # Backend client
//!
//! [`BackendClient`] implements the read-side collaborator contracts of
//! `task-intake-core` against the backend's REST endpoints:
//!
//! - [`ShareBrowser`]: `GET server/share?directory=<path>`
//! - [`BucketLister`]: `GET get_s3_data/`
//! - [`UrlSigner`]: `POST get_s3_signed_data/` with `{"keys": [...]}`
//!
//! The bearer token comes from `TASK_INTAKE_TOKEN` (see [`crate::load_config`]).
//! Non-2xx responses become `ServiceError`s carrying the status and body.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use task_intake_core::config::IntakeSettings;
use task_intake_core::contract::{
    BucketLister, CloudObjectRef, ServiceError, ShareBrowser, ShareEntry, SignedDownload, UrlSigner,
};

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShareEntryWire {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Node of the bucket listing as the backend renders it: a display tree
/// whose inner nodes are prefixes.
#[derive(Debug, Deserialize)]
struct BucketNodeWire {
    key: String,
    #[serde(default, rename = "isLeaf")]
    is_leaf: Option<bool>,
    #[serde(default)]
    children: Vec<BucketNodeWire>,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    keys: &'a [String],
}

impl BackendClient {
    pub fn new(
        base_url: Url,
        token: Option<String>,
        settings: &IntakeSettings,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.request_timeout())
            .build()?;

        // `Url::join` drops the last segment unless the path ends in '/'.
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        tracing::info!(
            base_url = %base_url,
            token_set = token.is_some(),
            "Initialized backend client"
        );
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        Ok(self.base_url.join(path)?)
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.authorized(self.client.get(url))
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.authorized(self.client.post(url))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends `request` and decodes a JSON body, turning non-2xx into an error.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(operation, %status, body = %body, "Backend request failed");
            return Err(format!("{operation} returned {status}: {body}").into());
        }
        Ok(response.json::<T>().await?)
    }
}

fn share_child_key(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

fn flatten_bucket(nodes: Vec<BucketNodeWire>, out: &mut Vec<CloudObjectRef>) {
    for node in nodes {
        let is_directory = !node.children.is_empty() || node.is_leaf == Some(false);
        out.push(CloudObjectRef {
            key: node.key,
            is_directory,
        });
        flatten_bucket(node.children, out);
    }
}

#[async_trait]
impl ShareBrowser for BackendClient {
    async fn load_node(&self, path: &str) -> Result<Vec<ShareEntry>, ServiceError> {
        let mut url = self.endpoint("server/share")?;
        url.query_pairs_mut().append_pair("directory", path);
        tracing::debug!(path, "Requesting share directory");

        let entries: Vec<ShareEntryWire> = self.send_json("list share", self.get(url)).await?;
        Ok(entries
            .into_iter()
            .map(|entry| ShareEntry {
                key: share_child_key(path, &entry.name),
                is_leaf: entry.kind != "DIR",
            })
            .collect())
    }
}

#[async_trait]
impl BucketLister for BackendClient {
    async fn list_bucket(&self) -> Result<Vec<CloudObjectRef>, ServiceError> {
        let url = self.endpoint("get_s3_data/")?;
        let nodes: Vec<BucketNodeWire> = self.send_json("list bucket", self.get(url)).await?;
        let mut objects = Vec::new();
        flatten_bucket(nodes, &mut objects);
        tracing::debug!(objects = objects.len(), "Bucket listing received");
        Ok(objects)
    }
}

#[async_trait]
impl UrlSigner for BackendClient {
    async fn sign_keys(&self, keys: &[String]) -> Result<Vec<SignedDownload>, ServiceError> {
        let url = self.endpoint("get_s3_signed_data/")?;
        let request = self.post(url).json(&SignRequest { keys });
        self.send_json("sign download URLs", request).await
    }
}
