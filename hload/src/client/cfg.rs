use std::path::PathBuf;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri};

/// HTTP client config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Request method.
    pub method: Method,
    /// Absolute target URI, either "http" or "https".
    pub uri: Uri,
    /// Custom headers.
    ///
    /// These are applied last and override the generated ones.
    pub headers: HeaderMap,
    /// Content type of the request payload, if any.
    pub content_type: HeaderValue,
    /// Single cookie sent with each request.
    pub cookie: Option<(String, String)>,
    /// Basic authentication credentials.
    pub auth: Option<Credentials>,
    /// Plain HTTP proxy all connections go through.
    pub proxy: Option<Uri>,
    /// Request payload.
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    None,
    /// Raw body data.
    Data(Bytes),
    /// File uploaded as a "multipart/form-data" field named "file".
    File(PathBuf),
}
