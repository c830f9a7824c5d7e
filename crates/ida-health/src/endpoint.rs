use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::HOST;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use ida_annotate::{NodeAnnotation, NodeAnnotator};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HealthConfig, NodeAddressing};
use crate::error::{HealthError, HealthResult};
use crate::router::{build_router, HelloResponse, HELLO_PATH};

fn http_err(err: impl std::fmt::Display) -> HealthError {
    HealthError::Http(err.to_string())
}

/// Send one `GET /hello` to the responder at `addr`.
pub async fn ping_addr(addr: SocketAddr) -> HealthResult<HelloResponse> {
    let stream = TcpStream::connect(addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(http_err)?;
    let driver = tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "health probe connection closed");
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(HELLO_PATH)
        .header(HOST, addr.to_string())
        .body(Empty::<Bytes>::new())
        .map_err(http_err)?;

    let result = async {
        let response = sender.send_request(request).await.map_err(http_err)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(http_err)?
            .to_bytes();
        if !status.is_success() {
            return Err(HealthError::UnexpectedStatus(status.as_u16()));
        }
        serde_json::from_slice(&body).map_err(|e| HealthError::Decode(e.to_string()))
    }
    .await;

    driver.abort();
    result
}

/// A running health responder.
///
/// Consuming it with [`HealthEndpoint::cleanup`] stops the responder and
/// waits for it. Dropping it stops the responder without waiting.
#[derive(Debug)]
pub struct HealthEndpoint {
    addr: SocketAddr,
    node_name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl HealthEndpoint {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Probe the responder owned by this handle.
    pub async fn ping(&self) -> HealthResult<HelloResponse> {
        ping_addr(self.addr).await
    }

    /// Stop the responder and wait for it to exit.
    pub async fn cleanup(mut self) -> HealthResult<()> {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => {
                info!(addr = %self.addr, "health endpoint stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(HealthError::Io(err)),
            Err(err) => Err(HealthError::Shutdown(err.to_string())),
        }
    }
}

impl Drop for HealthEndpoint {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Start the health responder and wait until it answers.
///
/// Once ready, and when an annotator is given, the node's health addresses
/// are published through it. A responder that does not answer within
/// `ready_timeout` is shut down and reported as [`HealthError::NotReady`].
pub async fn launch_as_endpoint(
    config: &HealthConfig,
    addressing: &NodeAddressing,
    annotator: Option<&NodeAnnotator>,
) -> HealthResult<HealthEndpoint> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;
    let token = CancellationToken::new();

    let app = build_router(&addressing.node_name);
    let shutdown = token.clone().cancelled_owned();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    let endpoint = HealthEndpoint {
        addr,
        node_name: addressing.node_name.clone(),
        token,
        handle: Some(handle),
    };

    if let Err(err) = wait_ready(&endpoint, config).await {
        if let Err(cleanup_err) = endpoint.cleanup().await {
            warn!(addr = %addr, error = %cleanup_err, "unable to stop unready health endpoint");
        }
        return Err(err);
    }
    info!(addr = %addr, node = %addressing.node_name, "health endpoint ready");

    if let Some(annotator) = annotator {
        let annotation = NodeAnnotation {
            v4_health_ip: addressing.v4_health_ip,
            v6_health_ip: addressing.v6_health_ip,
            ..Default::default()
        };
        if !annotation.is_empty() {
            annotator.annotate_node(&addressing.node_name, annotation);
        }
    }

    Ok(endpoint)
}

async fn wait_ready(endpoint: &HealthEndpoint, config: &HealthConfig) -> HealthResult<()> {
    let deadline = Instant::now() + config.ready_timeout();
    loop {
        match endpoint.ping().await {
            Ok(_) => return Ok(()),
            Err(err) if Instant::now() >= deadline => {
                return Err(HealthError::NotReady {
                    addr: endpoint.addr,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                debug!(addr = %endpoint.addr, error = %err, "health endpoint not ready yet");
                tokio::time::sleep(config.probe_interval()).await;
            }
        }
    }
}
