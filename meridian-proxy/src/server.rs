//! HTTP front end: accepts connections, turns each request into a
//! [`RequestContext`] and answers with the dispatcher's decision.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use meridian_core::{Dispatcher, Disposition, RequestContext};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ProxyError;

const NO_STORE: HeaderValue = HeaderValue::from_static("no-store");

/// State shared by every connection.
#[derive(Clone)]
pub struct ServerState {
    dispatcher: Dispatcher,
    trust_forwarded_for: bool,
}

impl ServerState {
    /// Create server state.
    pub fn new(dispatcher: Dispatcher, trust_forwarded_for: bool) -> Self {
        Self {
            dispatcher,
            trust_forwarded_for,
        }
    }
}

/// Accept connections on `listener` until an accept error occurs.
pub async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    state: Arc<ServerState>,
) -> Result<(), ProxyError> {
    info!(addr = %listener.local_addr()?, tls = tls_acceptor.is_some(), "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(error) => {
                warn!(%peer, %error, "dropping connection without local address");
                continue;
            }
        };
        let state = state.clone();

        if let Some(acceptor) = &tls_acceptor {
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_connection(tls_stream, state, peer, local, "https").await,
                    Err(error) => debug!(%peer, %error, "tls handshake failed"),
                }
            });
        } else {
            tokio::task::spawn(serve_connection(stream, state, peer, local, "http"));
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    state: Arc<ServerState>,
    peer: SocketAddr,
    local: SocketAddr,
    scheme: &'static str,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(&state, req, peer, local, scheme).await) }
    });
    if let Err(error) = http1::Builder::new().serve_connection(io, service).await {
        debug!(%peer, %error, "error serving connection");
    }
}

/// Answer one request.
pub async fn handle_request<B>(
    state: &ServerState,
    req: Request<B>,
    peer: SocketAddr,
    local: SocketAddr,
    scheme: &str,
) -> Response<Full<Bytes>> {
    let Some(context) = request_context(state, &req, peer, local, scheme) else {
        return plain(StatusCode::BAD_REQUEST, "Bad Request");
    };

    match state.dispatcher.dispatch(&context).await {
        Disposition::Redirect { location } => match HeaderValue::from_str(location.as_str()) {
            Ok(value) => {
                let mut response = plain(StatusCode::FOUND, "");
                response.headers_mut().insert(header::LOCATION, value);
                response
            }
            Err(error) => {
                warn!(%location, %error, "redirect target is not a valid header value");
                plain(StatusCode::SERVICE_UNAVAILABLE, Disposition::Unavailable.body())
            }
        },
        disposition => {
            let status = StatusCode::from_u16(disposition.status())
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            plain(status, disposition.body())
        }
    }
}

fn request_context<B>(
    state: &ServerState,
    req: &Request<B>,
    peer: SocketAddr,
    local: SocketAddr,
    scheme: &str,
) -> Option<RequestContext> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = Url::parse(&format!("{scheme}://{host}{path_and_query}")).ok()?;

    let client = if state.trust_forwarded_for {
        forwarded_for(req.headers())
            .map(|ip| SocketAddr::new(ip, peer.port()))
            .unwrap_or(peer)
    } else {
        peer
    };

    let mut context =
        RequestContext::new(url, client, local).with_protocol(format!("{:?}", req.version()));
    for cookie in req.headers().get_all(header::COOKIE) {
        if let Ok(cookie) = cookie.to_str() {
            context = context.with_cookie_header(cookie);
        }
    }
    if let Some(agent) = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
    {
        context = context.with_user_agent(agent);
    }
    Some(context)
}

/// First hop of `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CACHE_CONTROL, NO_STORE);
    response
}
