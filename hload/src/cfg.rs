use core::{num::NonZero, time::Duration};

use bytes::Bytes;
use http::{
    header::{InvalidHeaderName, InvalidHeaderValue},
    HeaderMap, HeaderName, HeaderValue, Method, Uri,
};

use crate::{
    client::{Config as ClientConfig, Credentials, Payload},
    cmd::Cmd,
    engine::{Config as EngineConfig, Limit},
    report::Format,
};

/// Configuration errors, detected before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL '{0}': {1}")]
    InvalidUrl(String, http::uri::InvalidUri),
    #[error("URL '{0}' has no schema, please input URL like http:// or https://")]
    UnsupportedScheme(String),
    #[error("URL '{0}' has no host")]
    MissingHost(String),
    #[error("invalid proxy '{0}', only http:// proxies are supported")]
    InvalidProxy(String),
    #[error("header format is name:value, got '{0}'")]
    InvalidHeader(String),
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("auth format is user:passwd, got '{0}'")]
    InvalidAuth(String),
    #[error("cookie format is key:value, got '{0}'")]
    InvalidCookie(String),
    #[error("just POST and PUT methods accept a request body, got {0}")]
    UnexpectedBody(Method),
    #[error("timeout must be positive")]
    ZeroTimeout,
}

/// Immutable configuration of a single run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dispatcher settings.
    pub engine: EngineConfig,
    /// HTTP client settings.
    pub client: ClientConfig,
    /// Number of worker threads.
    pub threads: NonZero<usize>,
    /// Report format.
    pub format: Format,
}

impl TryFrom<Cmd> for Config {
    type Error = Error;

    fn try_from(cmd: Cmd) -> Result<Self, Self::Error> {
        let Cmd {
            method,
            url,
            number,
            timeout,
            concurrency,
            auth,
            cookie,
            proxy,
            data,
            content_type,
            headers,
            file,
            request_timeout,
            threads,
            format,
            log_file: _,
            verbose: _,
        } = cmd;

        let method = Method::from(method);
        let uri = parse_url(&url)?;

        let limit = match number.and_then(|v| u64::try_from(v).ok()).and_then(NonZero::new) {
            Some(num) => Limit::Requests(num),
            None => {
                if timeout == 0 {
                    return Err(Error::ZeroTimeout);
                }
                if let Some(num) = number {
                    log::warn!("the number should be larger than 0, got {num}: running for {timeout}s instead");
                }
                Limit::Duration(Duration::from_secs(timeout))
            }
        };

        let payload = match (data, file) {
            (Some(data), ..) => Payload::Data(Bytes::from(data)),
            (None, Some(path)) => Payload::File(path),
            (None, None) => Payload::None,
        };
        if payload != Payload::None && method != Method::POST && method != Method::PUT {
            return Err(Error::UnexpectedBody(method));
        }

        let proxy = proxy.map(|v| parse_proxy(&v)).transpose()?;
        if let Some(proxy) = &proxy {
            log::debug!("proxy was set: {proxy}");
        }

        let auth = auth
            .map(|v| match v.split_once(':') {
                Some((user, password)) => Ok(Credentials { user: user.into(), password: password.into() }),
                None => Err(Error::InvalidAuth(v)),
            })
            .transpose()?;
        if let Some(auth) = &auth {
            log::debug!("http auth was set, user: {}", auth.user);
        }

        let cookie = cookie
            .map(|v| match v.split_once(':') {
                Some((key, value)) => Ok((key.to_owned(), value.to_owned())),
                None => Err(Error::InvalidCookie(v)),
            })
            .transpose()?;
        if let Some((key, value)) = &cookie {
            log::debug!("cookie was set: {key}={value}");
        }

        let headers = parse_headers(&headers)?;
        let content_type = HeaderValue::try_from(content_type)?;

        let engine = EngineConfig { limit, concurrency, request_timeout };
        let client = ClientConfig {
            method,
            uri,
            headers,
            content_type,
            cookie,
            auth,
            proxy,
            payload,
        };

        let m = Self { engine, client, threads, format };

        Ok(m)
    }
}

fn parse_url(url: &str) -> Result<Uri, Error> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::UnsupportedScheme(url.into()));
    }

    let uri = Uri::try_from(url).map_err(|err| Error::InvalidUrl(url.into(), err))?;
    if uri.host().is_none_or(str::is_empty) {
        return Err(Error::MissingHost(url.into()));
    }

    Ok(uri)
}

fn parse_proxy(proxy: &str) -> Result<Uri, Error> {
    match Uri::try_from(proxy) {
        Ok(uri) if uri.scheme_str() == Some("http") && uri.host().is_some() => Ok(uri),
        _ => Err(Error::InvalidProxy(proxy.into())),
    }
}

/// Parses headers given in "name:value" format.
///
/// Exactly one colon is allowed.
fn parse_headers(headers: &[String]) -> Result<HeaderMap, Error> {
    let mut out = HeaderMap::new();

    for header in headers {
        let (name, value) = match header.split(':').collect::<Vec<_>>()[..] {
            [name, value] => (name.trim(), value.trim()),
            _ => return Err(Error::InvalidHeader(header.clone())),
        };

        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        out.insert(name, value);
    }

    Ok(out)
}
