/// Errors from cloud provider operations.
///
/// Concrete providers map transport, status and decode failures into
/// these variants. Nothing here terminates the process; callers decide
/// whether a failure is fatal.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("http: {0}")]
    Http(String),

    #[error("api returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("decode: {0}")]
    Decode(String),

    #[error("invalid box id: {0}")]
    InvalidId(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}
