//! Connection-pooled HTTP client shared by the Consul and Kubernetes adapters.
//!
//! [`build_http_client`] builds a hyper client over rustls, optionally
//! trusting a private CA bundle (the in-cluster Kubernetes CA).
//! [`send`] executes one request under the adapter's timeout and
//! collects the body, translating transport failures into
//! [`ConfmuxError::Unavailable`].

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::{ConfmuxError, Result};

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, Full<Bytes>>;

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

pub fn build_http_client(ca_file: Option<&Path>) -> Result<HttpClient> {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring` as the default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let builder = hyper_rustls::HttpsConnectorBuilder::new();
    let https = match ca_file {
        Some(path) => builder
            .with_tls_config(tls_config_with_ca(path)?)
            .https_or_http()
            .enable_http1()
            .build(),
        None => builder
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build(),
    };

    Ok(Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https))
}

fn tls_config_with_ca(path: &Path) -> Result<rustls::ClientConfig> {
    let pem = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfmuxError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfmuxError::Io(e)
        }
    })?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| ConfmuxError::parse(path.display().to_string(), e))?;
        roots
            .add(cert)
            .map_err(|e| ConfmuxError::parse(path.display().to_string(), e))?;
    }
    if roots.is_empty() {
        return Err(ConfmuxError::parse(
            path.display().to_string(),
            "no PEM certificates found",
        ));
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

pub fn parse_uri(adapter: &str, url: &url::Url) -> Result<hyper::Uri> {
    url.as_str()
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| {
            ConfmuxError::InvalidArgument(format!("{adapter}: invalid URL '{url}': {e}"))
        })
}

pub async fn send(
    client: &HttpClient,
    adapter: &str,
    request: Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<HttpResponse> {
    let uri = request.uri().clone();

    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| {
            ConfmuxError::unavailable(
                adapter,
                format!("request to {uri} timed out after {}ms", timeout.as_millis()),
            )
        })?
        .map_err(|e| ConfmuxError::unavailable(adapter, e))?;

    let status = response.status();
    let body = tokio::time::timeout(timeout, response.into_body().collect())
        .await
        .map_err(|_| {
            ConfmuxError::unavailable(adapter, format!("reading body from {uri} timed out"))
        })?
        .map_err(|e| ConfmuxError::unavailable(adapter, e))?
        .to_bytes();

    Ok(HttpResponse { status, body })
}
