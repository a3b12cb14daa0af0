use crate::error::Error;
use crate::metrics;
use crate::transport::{ChannelMessage, ManagerHandle};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, PRAGMA,
};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::sync::oneshot;

async fn http_flv(
    manager_handle: ManagerHandle,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    metrics!(increment_requests);
    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);

    let method = req.method().clone();

    let response = match method {
        Method::GET => play(&manager_handle, path.clone(), query).await,
        Method::POST => publish(&manager_handle, path.clone(), req.into_body()).await,
        method => Err(Error::UnsupportedMethod(method.to_string())),
    };

    Ok(response.unwrap_or_else(|e| {
        log::warn!("{} failed: {}", path, e);
        metrics!(increment_errors);
        error_response(e.http_status())
    }))
}

async fn play(
    manager_handle: &ManagerHandle,
    path: String,
    query: Option<String>,
) -> Result<Response<Body>, Error> {
    log::info!("play {}", path);
    let (request, response) = oneshot::channel();
    manager_handle
        .send(ChannelMessage::Play {
            path,
            query,
            responder: request,
        })
        .map_err(|_| Error::ManagerUnavailable)?;

    let body = response.await.map_err(|_| Error::ManagerUnavailable)??;
    Ok(stream_response(body))
}

/// Answers once the whole POST body has been ingested.
async fn publish(
    manager_handle: &ManagerHandle,
    path: String,
    body: Body,
) -> Result<Response<Body>, Error> {
    log::info!("publish {}", path);
    let (request, response) = oneshot::channel();
    manager_handle
        .send(ChannelMessage::Publish {
            path: path.clone(),
            body,
            responder: request,
        })
        .map_err(|_| Error::ManagerUnavailable)?;

    let acked = response.await.map_err(|_| Error::ManagerUnavailable)??;
    acked.await.map_err(|_| Error::PublisherGone(path))??;
    Ok(ack_response())
}

fn stream_response(body: Body) -> Response<Body> {
    let mut res = Response::new(body);
    let headers = res.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/x-flv"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    res
}

fn ack_response() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    res.headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    res
}

fn error_response(status: StatusCode) -> Response<Body> {
    let mut res = ack_response();
    *res.status_mut() = status;
    res
}

pub struct Service {
    manager_handle: ManagerHandle,
}

impl Service {
    pub fn new(manager_handle: ManagerHandle) -> Self {
        Self { manager_handle }
    }

    /// Binds the listener and returns its address together with the server
    /// future that drives it.
    pub fn bind(
        &self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), Error> {
        let manager_handle = self.manager_handle.clone();
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let manager_handle = manager_handle.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    log::debug!("{} {} from {}", req.method(), req.uri(), remote);
                    http_flv(manager_handle.clone(), req)
                }))
            }
        });
        let server = Server::try_bind(&addr)?.serve(make_service);
        Ok((server.local_addr(), server))
    }

    pub async fn run(&self, port: u16) -> Result<(), Error> {
        let (addr, server) = self.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        log::info!("http-flv service Listening on http://{}", addr);
        server.await?;
        Ok(())
    }
}
