//! Outbound publisher
//!
//! Lets another service push a message into a remote hub through its
//! `/notify` endpoint, either awaiting the answer or fire-and-forget.

use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::handlers::notify::NotifyRequest;
use crate::error::{HubError, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a hub's publish endpoint
#[derive(Debug, Clone)]
pub struct Notifier {
    endpoint: Url,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Notifier {
    /// `base_url` is either the service root (`http://host:8083`), in which
    /// case `/notify` is appended, or the full endpoint URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut endpoint = Url::parse(base_url)?;

        if endpoint.scheme() != "http" {
            return Err(HubError::InvalidConfig(format!(
                "notify URL has unsupported scheme: {}",
                endpoint.scheme()
            )));
        }
        if endpoint.host_str().is_none() {
            return Err(HubError::InvalidConfig(
                "notify URL must include a host".into(),
            ));
        }
        if endpoint.path() == "/" {
            endpoint.set_path("/notify");
        }

        Ok(Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `host:port` of the endpoint. IPv6 hosts keep their brackets, which is
    /// the form both the resolver and the `Host` header expect.
    fn authority(&self) -> Result<String> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| HubError::InvalidConfig("notify URL must include a host".into()))?;
        let port = self.endpoint.port_or_known_default().unwrap_or(80);
        Ok(format!("{}:{}", host, port))
    }

    /// Post `message` and wait for the hub to acknowledge it.
    ///
    /// The connect timeout bounds reaching the hub; the request timeout
    /// bounds everything after that, including reading the response body.
    pub async fn notify(&self, message: &str) -> Result<StatusCode> {
        let authority = self.authority()?;

        let stream = timeout(self.connect_timeout, TcpStream::connect(authority.as_str()))
            .await
            .map_err(|_| HubError::Timeout)??;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HubError::Notify(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Notify connection ended: {}", e);
            }
        });

        let body = serde_json::to_vec(&NotifyRequest {
            message: message.to_string(),
        })
        .map_err(|e| HubError::Internal(format!("Failed to encode message: {}", e)))?;

        let mut path = self.endpoint.path().to_string();
        if let Some(query) = self.endpoint.query() {
            path.push('?');
            path.push_str(query);
        }

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::HOST, authority.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| HubError::Notify(format!("Failed to build request: {}", e)))?;

        let exchange = async {
            let response = sender
                .send_request(request)
                .await
                .map_err(|e| HubError::Notify(format!("Request failed: {}", e)))?;
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, HubError>((status, body))
        };

        let (status, body) = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| HubError::Timeout)??;

        if !status.is_success() {
            return Err(HubError::Notify(format!(
                "{} responded {}: {}",
                self.endpoint,
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(status)
    }

    /// Post `message` in the background; the outcome is only logged.
    pub fn notify_detached(&self, message: impl Into<String>) -> JoinHandle<()> {
        let notifier = self.clone();
        let message = message.into();

        tokio::spawn(async move {
            match notifier.notify(&message).await {
                Ok(status) => info!("Notification service responded: {}", status),
                Err(e) => warn!("Failed to send notification: {}", e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiServer;
    use crate::config::{Config, LogConfig, ServerConfig};
    use crate::hub::{Hub, HubConfig};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    async fn start_server(max_message_bytes: usize) -> (SocketAddr, Hub, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        serve_on(listener, max_message_bytes)
    }

    fn serve_on(
        listener: TcpListener,
        max_message_bytes: usize,
    ) -> (SocketAddr, Hub, watch::Sender<bool>) {
        let config = Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_origins: vec![],
                max_message_bytes,
            },
            hub: HubConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        let hub = Hub::new(config.hub);
        let server = ApiServer::new(config, hub.clone());

        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

        (addr, hub, shutdown_tx)
    }

    #[test]
    fn test_new_appends_notify_path() {
        let notifier = Notifier::new("http://localhost:8083").unwrap();
        assert_eq!(notifier.endpoint().as_str(), "http://localhost:8083/notify");

        let notifier = Notifier::new("http://hub.internal/events/notify").unwrap();
        assert_eq!(notifier.endpoint().path(), "/events/notify");
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        assert!(matches!(
            Notifier::new("not a url"),
            Err(HubError::InvalidConfig(_))
        ));
        assert!(matches!(
            Notifier::new("https://localhost:8083"),
            Err(HubError::InvalidConfig(_))
        ));
        assert!(matches!(
            Notifier::new("unix:/tmp/hub.sock"),
            Err(HubError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers() {
        let (addr, hub, shutdown) = start_server(1024).await;
        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        let notifier = Notifier::new(&format!("http://{}", addr)).unwrap();
        let status = notifier.notify("New todo added: bread").await.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            mailbox.recv().await.unwrap().payload(),
            "New todo added: bread"
        );

        hub.close().await;
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_notify_reports_rejection() {
        let (addr, hub, shutdown) = start_server(4).await;

        let notifier = Notifier::new(&format!("http://{}", addr)).unwrap();
        let err = notifier.notify("much too long").await.unwrap_err();

        match err {
            HubError::Notify(msg) => assert!(msg.contains("413")),
            other => panic!("unexpected error: {:?}", other),
        }

        hub.close().await;
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_notify_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = Notifier::new(&format!("http://{}", addr))
            .unwrap()
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(500));

        assert!(notifier.notify("nobody home").await.is_err());
    }

    #[tokio::test]
    async fn test_notify_over_ipv6_literal() {
        // Hosts without IPv6 loopback have nothing to test here.
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return;
        };
        let (addr, hub, shutdown) = serve_on(listener, 1024);
        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        let notifier = Notifier::new(&format!("http://{}", addr)).unwrap();
        assert_eq!(notifier.authority().unwrap(), format!("[::1]:{}", addr.port()));

        let status = notifier.notify("over v6").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mailbox.recv().await.unwrap().payload(), "over v6");

        hub.close().await;
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_notify_times_out_on_stalled_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Answers with headers promising a body that never arrives.
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\npartial")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let notifier = Notifier::new(&format!("http://{}", addr))
            .unwrap()
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(300));

        let result = tokio::time::timeout(Duration::from_secs(5), notifier.notify("hello"))
            .await
            .expect("notify ignored its request timeout");
        assert!(matches!(result, Err(HubError::Timeout)));
    }

    #[tokio::test]
    async fn test_notify_detached_completes() {
        let (addr, hub, shutdown) = start_server(1024).await;
        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        let notifier = Notifier::new(&format!("http://{}", addr)).unwrap();
        tokio_test::assert_ok!(notifier.notify_detached("detached").await);

        assert_eq!(mailbox.recv().await.unwrap().payload(), "detached");

        hub.close().await;
        let _ = shutdown.send(true);
    }
}
