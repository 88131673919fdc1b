use core::fmt::{self, Debug, Formatter};
use std::{fs, path::Path};

use anyhow::{anyhow, bail, Error};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http::{header, HeaderValue, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

pub use self::cfg::{Config, Credentials, Payload};
use self::{io::TokioIo, payload::Multipart};
use crate::engine::Client;

mod cfg;
mod io;
mod payload;
mod tls;
mod tunnel;

/// A host and port pair to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    fn from_uri(uri: &Uri) -> Result<Self, Error> {
        let host = uri.host().ok_or_else(|| anyhow!("URI has no host: {uri}"))?;
        // IPv6 literals come bracketed.
        let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();
        let port = match (uri.port_u16(), uri.scheme_str()) {
            (Some(port), ..) => port,
            (None, Some("https")) => 443,
            (None, ..) => 80,
        };

        Ok(Self { host, port })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// HTTP/1.1 client performing one request per fresh connection.
pub struct HttpClient {
    target: Endpoint,
    proxy: Option<Endpoint>,
    /// Request sent on each execution.
    request: Request<Full<Bytes>>,
    /// Set for "https" targets only.
    tls: Option<TlsConnector>,
}

impl HttpClient {
    pub fn new(cfg: Config) -> Result<Self, Error> {
        let Config {
            method,
            uri,
            headers,
            content_type,
            cookie,
            auth,
            proxy,
            payload,
        } = cfg;

        let tls = match uri.scheme_str() {
            Some("http") => None,
            Some("https") => Some(tls::connector()?),
            _ => bail!("unsupported URI scheme: {uri}"),
        };
        let target = Endpoint::from_uri(&uri)?;
        let proxy = proxy.as_ref().map(Endpoint::from_uri).transpose()?;

        // Plain HTTP through a proxy requires absolute-form, everything else
        // is sent in origin-form.
        let request_uri = if proxy.is_some() && tls.is_none() {
            uri.clone()
        } else {
            let path = uri.path_and_query().map(|v| v.as_str()).unwrap_or("/");
            Uri::try_from(path)?
        };
        let host = match uri.authority() {
            Some(authority) => authority.as_str().to_owned(),
            None => target.authority(),
        };

        let mut request = Request::builder()
            .method(method)
            .uri(request_uri)
            .header(header::HOST, host)
            .header(header::USER_AGENT, concat!("hload/", env!("CARGO_PKG_VERSION")))
            .header(header::CONNECTION, "close");

        let body = match payload {
            Payload::None => Bytes::new(),
            Payload::Data(data) => {
                request = request.header(header::CONTENT_TYPE, content_type);
                data
            }
            Payload::File(path) => {
                let (content_type, data) = Self::load_file(&path)?;
                request = request.header(header::CONTENT_TYPE, content_type);
                data
            }
        };

        if let Some((name, value)) = cookie {
            request = request.header(header::COOKIE, format!("{name}={value}"));
        }
        if let Some(Credentials { user, password }) = auth {
            let token = BASE64.encode(format!("{user}:{password}"));
            request = request.header(header::AUTHORIZATION, format!("Basic {token}"));
        }

        let mut request = request.body(Full::new(body))?;
        for (name, value) in &headers {
            request.headers_mut().insert(name, value.clone());
        }
        log::debug!("request template: {:?}", request);

        let m = Self { target, proxy, request, tls };

        Ok(m)
    }

    fn load_file(path: &Path) -> Result<(HeaderValue, Bytes), Error> {
        log::debug!("loading upload file '{}' ...", path.display());

        let data = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());

        let m = Multipart::new();
        let content_type = HeaderValue::try_from(m.content_type())?;

        Ok((content_type, m.encode("file", &filename, &data)))
    }

    async fn do_execute(&self) -> Result<StatusCode, Error> {
        let hop = self.proxy.as_ref().unwrap_or(&self.target);
        let mut stream = TcpStream::connect((hop.host.as_str(), hop.port)).await?;

        match &self.tls {
            Some(tls) => {
                if self.proxy.is_some() {
                    tunnel::connect(&mut stream, &self.target.authority()).await?;
                }
                let name = tls::server_name(&self.target.host)?;
                let stream = tls.connect(name, stream).await?;

                self.send(stream).await
            }
            None => self.send(stream).await,
        }
    }

    /// Sends the request over the given stream and drains the response.
    async fn send<S>(&self, stream: S) -> Result<StatusCode, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        let request = self.request.clone();

        let exchange = async move {
            let resp = sender.send_request(request).await?;
            let code = resp.status();

            let mut body = resp.into_body();
            while let Some(frame) = body.frame().await {
                frame?;
            }

            Ok::<_, Error>(code)
        };

        // The connection is driven in place rather than spawned, so that
        // abandoning this future tears the connection down too.
        let (rc, conn) = tokio::join!(exchange, conn);
        if let Err(err) = conn {
            log::debug!("connection failed: {err}");
        }

        rc
    }
}

impl Client for HttpClient {
    #[inline]
    async fn execute(&self) -> Result<StatusCode, Error> {
        self.do_execute().await
    }
}

impl Debug for HttpClient {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        fmt.debug_struct("HttpClient")
            .field("target", &self.target)
            .field("proxy", &self.proxy)
            .field("request", &self.request)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
