//! Upstream side of a relay session: where to pull a path from and how.

use crate::error::Error;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT, CONNECTION, USER_AGENT};
use hyper::{Body, Client, Method, Request, Response, Uri};
use std::future::Future;
use std::pin::Pin;
use url::Url;

const UPSTREAM_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1; WOW64)";

pub type UpstreamClient = Client<HttpConnector>;

/// The pending upstream response a relay session streams from.
pub type UpstreamResponse =
    Pin<Box<dyn Future<Output = Result<Response<Body>, hyper::Error>> + Send>>;

/// Composes the upstream URI for a local request.
///
/// The base URL's own path wins when it is more than `/`, otherwise the
/// local path is used; the local query string is appended either way.
pub fn upstream_uri(base: &str, path: &str, query: Option<&str>) -> Result<Uri, Error> {
    let invalid = |reason: String| Error::InvalidUpstream(base.to_owned(), reason);

    let url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    let host = url.host_str().ok_or_else(|| invalid("missing host".into()))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let mut target = if url.path().len() > 1 {
        url.path().to_owned()
    } else {
        path.to_owned()
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    format!("http://{}:{}{}", host, port, target)
        .parse::<Uri>()
        .map_err(|e| invalid(e.to_string()))
}

pub fn upstream_request(uri: Uri) -> Result<Request<Body>, Error> {
    Ok(Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(USER_AGENT, UPSTREAM_USER_AGENT)
        .header(ACCEPT, "*/*")
        .header(CONNECTION, "keep-alive")
        .body(Body::empty())?)
}

pub fn fetch(client: &UpstreamClient, request: Request<Body>) -> UpstreamResponse {
    Box::pin(client.request(request))
}
