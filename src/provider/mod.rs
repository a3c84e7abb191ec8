pub mod digitalocean;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use error::ProviderError;
pub use types::{CloudBox, Image, SpawnRequest};

/// Cloud backend that owns the account's boxes.
///
/// Credentials live on the implementing type; every call is authoritative
/// at the time it is made and nothing is cached.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Full current box listing for the account.
    async fn list_boxes(&self) -> Result<Vec<CloudBox>, ProviderError>;

    /// Create one box per name in `req.names`.
    async fn spawn_boxes(&self, req: SpawnRequest) -> Result<(), ProviderError>;

    async fn delete_box(&self, id: &str) -> Result<(), ProviderError>;

    /// Snapshot a box into a new user image called `label`.
    async fn snapshot(&self, box_id: &str, label: &str) -> Result<(), ProviderError>;

    async fn list_images(&self) -> Result<Vec<Image>, ProviderError>;
}
