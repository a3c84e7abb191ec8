//! DigitalOcean provider over the v2 REST API.
//!
//! API: GET /v2/droplets, POST /v2/droplets, DELETE /v2/droplets/{id},
//! POST /v2/droplets/{id}/actions, GET /v2/images

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::types::{CloudBox, Image, SpawnRequest};
use super::Provider;

pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com";
pub const DEFAULT_DROPLET_PASSWORD: &str = "1337rootPass";

const PAGE_SIZE: u32 = 200;

// ── Request / Response types ────────────────────────────────────────

/// Image reference accepted by the create endpoint: numeric ids for
/// private snapshots, slugs for public distribution images.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ImageRef {
    Id(u64),
    Slug(String),
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        match image.parse::<u64>() {
            Ok(id) => ImageRef::Id(id),
            Err(_) => ImageRef::Slug(image.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DropletMultiCreateRequest {
    pub names: Vec<String>,
    pub region: String,
    pub size: String,
    pub image: ImageRef,
    pub ssh_keys: Vec<String>,
    pub tags: Vec<String>,
    pub user_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Droplet {
    /// First public IPv4, or empty when none has been assigned yet.
    pub fn public_ipv4(&self) -> String {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address.clone())
            .unwrap_or_default()
    }

    fn into_box(self) -> CloudBox {
        let ip = self.public_ipv4();
        CloudBox {
            id: self.id.to_string(),
            label: self.name,
            group: String::new(),
            status: self.status,
            ip,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub pages: Option<Pages>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pages {
    #[serde(default)]
    pub next: Option<String>,
}

impl Links {
    fn next_page(&self) -> Option<String> {
        self.pages.as_ref().and_then(|p| p.next.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropletListResponse {
    pub droplets: Vec<Droplet>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoImage {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub size_gigabytes: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<DoImage>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Serialize)]
struct SnapshotAction<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
}

/// Cloud-init script that turns on SSH password auth and sets the
/// password of the `op` user, so the remote executor can log in.
pub fn password_user_data(password: &str) -> String {
    format!(
        "#!/bin/bash\n\
         sudo sed -i \"/^[^#]*PasswordAuthentication[[:space:]]no/c\\PasswordAuthentication yes\" /etc/ssh/sshd_config\n\
         sudo service sshd restart\n\
         echo 'op:{password}' | sudo chpasswd"
    )
}

// ── Client ──────────────────────────────────────────────────────────

/// DigitalOcean API client. The token is the account credential.
#[derive(Debug, Clone)]
pub struct DigitalOceanProvider {
    base_url: String,
    token: String,
    droplet_password: String,
    client: reqwest::Client,
}

impl DigitalOceanProvider {
    pub fn new(client: reqwest::Client, base_url: String, token: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            token,
            droplet_password: DEFAULT_DROPLET_PASSWORD.to_string(),
            client,
        }
    }

    pub fn with_droplet_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        if !password.is_empty() {
            self.droplet_password = password;
        }
        self
    }

    fn build_create_request(&self, req: SpawnRequest) -> DropletMultiCreateRequest {
        let ssh_keys = if req.ssh_fingerprint.is_empty() {
            Vec::new()
        } else {
            vec![req.ssh_fingerprint]
        };
        DropletMultiCreateRequest {
            names: req.names,
            region: req.region,
            size: req.size,
            image: ImageRef::parse(&req.image),
            ssh_keys,
            tags: req.tags,
            user_data: password_user_data(&self.droplet_password),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, ProviderError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("{what} request failed: {e}")))?;

        let resp = error_for_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(format!("failed to parse {what} response: {e}")))
    }
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api { status, body })
}

fn parse_droplet_id(id: &str) -> Result<u64, ProviderError> {
    id.parse::<u64>()
        .map_err(|_| ProviderError::InvalidId(id.to_string()))
}

#[async_trait]
impl Provider for DigitalOceanProvider {
    async fn list_boxes(&self) -> Result<Vec<CloudBox>, ProviderError> {
        let mut boxes = Vec::new();
        let mut next = Some(format!(
            "{}/v2/droplets?page=1&per_page={PAGE_SIZE}",
            self.base_url
        ));

        while let Some(url) = next {
            let page: DropletListResponse = self.get_json(&url, "droplet list").await?;
            next = page.links.next_page();
            boxes.extend(page.droplets.into_iter().map(Droplet::into_box));
        }

        tracing::debug!(count = boxes.len(), "listed droplets");
        Ok(boxes)
    }

    async fn spawn_boxes(&self, req: SpawnRequest) -> Result<(), ProviderError> {
        if req.names.is_empty() {
            return Ok(());
        }

        let body = self.build_create_request(req);
        let url = format!("{}/v2/droplets", self.base_url);

        tracing::info!(
            count = body.names.len(),
            region = %body.region,
            size = %body.size,
            "creating droplets"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("droplet create failed: {e}")))?;
        error_for_status(resp).await?;

        tracing::info!(names = ?body.names, "droplets requested");
        Ok(())
    }

    async fn delete_box(&self, id: &str) -> Result<(), ProviderError> {
        let droplet_id = parse_droplet_id(id)?;
        let url = format!("{}/v2/droplets/{droplet_id}", self.base_url);

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("droplet delete failed: {e}")))?;

        if resp.status().as_u16() == 404 {
            tracing::warn!(box_id = droplet_id, "droplet already deleted");
            return Ok(());
        }
        error_for_status(resp).await?;

        tracing::info!(box_id = droplet_id, "droplet deleted");
        Ok(())
    }

    async fn snapshot(&self, box_id: &str, label: &str) -> Result<(), ProviderError> {
        let droplet_id = parse_droplet_id(box_id)?;
        let url = format!("{}/v2/droplets/{droplet_id}/actions", self.base_url);
        let action = SnapshotAction {
            kind: "snapshot",
            name: label,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&action)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("snapshot action failed: {e}")))?;
        error_for_status(resp).await?;

        tracing::info!(box_id = droplet_id, label = %label, "snapshot requested");
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>, ProviderError> {
        let mut images = Vec::new();
        let mut next = Some(format!(
            "{}/v2/images?private=true&page=1&per_page={PAGE_SIZE}",
            self.base_url
        ));

        while let Some(url) = next {
            let page: ImageListResponse = self.get_json(&url, "image list").await?;
            next = page.links.next_page();
            images.extend(page.images.into_iter().map(|i| Image {
                id: i.id.to_string(),
                name: i.name,
                status: i.status.unwrap_or_default(),
                size_gigabytes: i.size_gigabytes.unwrap_or_default(),
            }));
        }

        Ok(images)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
