use thiserror::Error;

/// A live view could not be bound to its configuration.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// The server answered, but not with something a list view can render.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no object_list")]
    MissingObjectList,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("selector error: {0}")]
    Selector(String),
}
