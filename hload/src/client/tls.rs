use std::sync::Arc;

use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Builds a TLS connector trusting the bundled Mozilla root certificates.
pub fn connector() -> Result<TlsConnector, rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut cfg = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    cfg.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(cfg)))
}

/// Converts a URI host into a TLS server name.
pub fn server_name(host: &str) -> Result<ServerName<'static>, anyhow::Error> {
    let name = ServerName::try_from(host.to_owned())?;
    Ok(name)
}
