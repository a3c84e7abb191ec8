/// One remote instance as reported by a provider at query time.
///
/// Values are never mutated after a directory query; a fresh listing is
/// the only way to observe changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudBox {
    pub id: String,
    pub label: String,
    /// Reserved grouping tag, currently always empty.
    pub group: String,
    pub status: String,
    /// Public IPv4; empty until the provider assigns one.
    pub ip: String,
}

/// A user-owned image (snapshot) known to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size_gigabytes: f64,
}

/// Everything a provider needs to create a batch of boxes.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub names: Vec<String>,
    pub region: String,
    pub size: String,
    /// Provider image slug or numeric image id.
    pub image: String,
    pub ssh_fingerprint: String,
    pub tags: Vec<String>,
}
