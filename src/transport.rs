/*
 *  transport.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::{debug, error, warn};
use reqwest::{Client, header, Error as ReqwestError};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as TokMutex;
use tokio::time::Instant;

use crate::metadata::ArtworkValidator;

/// Transport failure classes seen by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The caller supplied timeout elapsed.
    Timeout,
    /// Connect/send/read failed at the socket level.
    ConnectionError(String),
    /// The peer answered, but not with something usable (status, framing).
    ProtocolError(String),
    /// Bytes arrived, but so slowly the pool was recycled.
    Degraded { elapsed: Duration },
}

impl TransportFault {
    /// Socket-ish faults earn the extra retry penalty, a clean protocol error does not.
    pub fn is_socket_related(&self) -> bool {
        !matches!(self, TransportFault::ProtocolError(_))
    }
}

impl Display for TransportFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::Timeout => write!(f, "request timed out"),
            TransportFault::ConnectionError(e) => write!(f, "connection error: {}", e),
            TransportFault::ProtocolError(e) => write!(f, "protocol error: {}", e),
            TransportFault::Degraded { elapsed } => {
                write!(f, "slow response ({:.1}s), socket pool recycled", elapsed.as_secs_f32())
            }
        }
    }
}

impl std::error::Error for TransportFault {}

impl From<ReqwestError> for TransportFault {
    fn from(err: ReqwestError) -> Self {
        if err.is_timeout() {
            TransportFault::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            TransportFault::ConnectionError(err.to_string())
        } else {
            TransportFault::ProtocolError(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Head => write!(f, "HEAD"),
        }
    }
}

/// A fully consumed response; the connection is gone by the time you hold one.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub validator: ArtworkValidator,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

/// What the sync engine needs from the network.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn request(&self, url: &str, method: Method, timeout: Duration) -> Result<HttpResponse, TransportFault>;
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub slow_response_threshold: Duration,
    pub pool_settle: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connect_timeout: Duration::from_secs(5),
            slow_response_threshold: Duration::from_secs(15),
            pool_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
struct Pool {
    client: Option<Client>,
    generation: u64,
}

/// reqwest backed transport; the `Client` is the connection pool.
#[derive(Debug)]
pub struct HttpTransport {
    pool: TokMutex<Pool>,
    settings: TransportSettings,
    resets: AtomicU32,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportFault> {
        let client = build_client(&settings)?;
        Ok(HttpTransport {
            pool: TokMutex::new(Pool { client: Some(client), generation: 0 }),
            settings,
            resets: AtomicU32::new(0),
        })
    }

    /// Number of pool recycles since start.
    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Current client and its generation, rebuilding lazily after a failed recycle.
    async fn checkout(&self) -> Result<(Client, u64), TransportFault> {
        let mut pool = self.pool.lock().await;
        if pool.client.is_none() {
            pool.client = Some(build_client(&self.settings)?);
            debug!("Socket pool rebuilt lazily (generation {})", pool.generation);
        }
        match pool.client.as_ref() {
            Some(client) => Ok((client.clone(), pool.generation)),
            None => Err(TransportFault::ConnectionError("socket pool unavailable".into())),
        }
    }

    /// Recycle the pool only if nobody has done so since `seen` was checked out.
    async fn recycle(&self, seen: u64) {
        let mut pool = self.pool.lock().await;
        if pool.generation != seen {
            debug!("Socket pool already recycled (generation {} > {})", pool.generation, seen);
            return;
        }
        warn!("Resetting socket pool...");
        // dropping the last Client handle closes its idle sockets
        drop(pool.client.take());
        tokio::time::sleep(self.settings.pool_settle).await;
        pool.generation += 1;
        match build_client(&self.settings) {
            Ok(client) => pool.client = Some(client),
            Err(e) => error!("Socket pool rebuild failed, will retry on next request: {}", e),
        }
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}

impl Transport for HttpTransport {
    async fn request(&self, url: &str, method: Method, timeout: Duration) -> Result<HttpResponse, TransportFault> {
        let (client, generation) = self.checkout().await?;
        let start = Instant::now();

        let builder = match method {
            Method::Get => client.get(url),
            Method::Head => client.head(url),
        };
        let response = builder.timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            // body is dropped unread, Connection: close takes the socket with it
            return Err(TransportFault::ProtocolError(format!("HTTP {}", status.as_u16())));
        }
        let validator = ArtworkValidator::from_headers(response.headers());
        let body = match method {
            Method::Get => response.bytes().await?.to_vec(),
            Method::Head => {
                drop(response);
                Vec::new()
            }
        };
        let elapsed = start.elapsed();
        drop(client);

        if elapsed > self.settings.slow_response_threshold {
            warn!("Slow response ({:.1}s) from {} {} - resetting socket pool", elapsed.as_secs_f32(), method, url);
            self.recycle(generation).await;
            return Err(TransportFault::Degraded { elapsed });
        }

        debug!("{} {} -> {} ({} bytes, {:.2}s)", method, url, status.as_u16(), body.len(), elapsed.as_secs_f32());
        Ok(HttpResponse { validator, body, elapsed })
    }
}

fn build_client(settings: &TransportSettings) -> Result<Client, TransportFault> {
    const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

    let mut headers = header::HeaderMap::new();
    headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
    headers.insert("Accept", header::HeaderValue::from_static("*/*"));
    headers.insert("Connection", header::HeaderValue::from_static("close"));

    Client::builder()
        .http1_only()
        .connect_timeout(settings.connect_timeout)
        .pool_max_idle_per_host(0)
        .default_headers(headers)
        .build()
        .map_err(|e| TransportFault::ConnectionError(format!("cannot build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_classification() {
        assert!(TransportFault::Timeout.is_socket_related());
        assert!(TransportFault::ConnectionError("reset".into()).is_socket_related());
        assert!(TransportFault::Degraded { elapsed: Duration::from_secs(16) }.is_socket_related());
        assert!(!TransportFault::ProtocolError("HTTP 500".into()).is_socket_related());
    }

    #[test]
    fn test_fault_display() {
        let f = TransportFault::Degraded { elapsed: Duration::from_millis(16_500) };
        assert_eq!(f.to_string(), "slow response (16.5s), socket pool recycled");
        assert_eq!(TransportFault::ProtocolError("HTTP 404".into()).to_string(), "protocol error: HTTP 404");
    }

    #[tokio::test]
    async fn test_connection_refused_is_socket_fault() {
        // grab a free port then close it, nothing listens there
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new(TransportSettings::default()).unwrap();
        let url = format!("http://127.0.0.1:{}/metadata.json", port);
        let err = transport.request(&url, Method::Get, Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_socket_related(), "unexpected fault {:?}", err);
    }

    /// Answers one request after `delay`, then hangs up.
    async fn serve_once(delay: Duration) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nLast-Modified: Sun, 06 Nov 1994 08:49:37 GMT\r\nConnection: close\r\n\r\nok")
                .await;
            let _ = socket.shutdown().await;
        });
        addr
    }

    fn quick_settings(slow_after: Duration) -> TransportSettings {
        TransportSettings {
            slow_response_threshold: slow_after,
            pool_settle: Duration::from_millis(1),
            ..TransportSettings::default()
        }
    }

    #[tokio::test]
    async fn test_prompt_response_is_returned() {
        let addr = serve_once(Duration::ZERO).await;
        let transport = HttpTransport::new(quick_settings(Duration::from_secs(5))).unwrap();
        let url = format!("http://{}/artwork_bar.bmp", addr);

        let response = transport.request(&url, Method::Get, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.body, b"ok");
        assert_eq!(response.validator.last_modified, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(transport.resets(), 0);
    }

    #[tokio::test]
    async fn test_slow_response_is_degraded_and_recycles_pool() {
        let addr = serve_once(Duration::from_millis(150)).await;
        let transport = HttpTransport::new(quick_settings(Duration::from_millis(20))).unwrap();
        let url = format!("http://{}/artwork_bar.bmp", addr);

        let err = transport.request(&url, Method::Get, Duration::from_secs(5)).await.unwrap_err();
        match err {
            TransportFault::Degraded { elapsed } => assert!(elapsed >= Duration::from_millis(20)),
            other => panic!("expected Degraded, got {:?}", other),
        }
        assert_eq!(transport.resets(), 1);
        assert_eq!(transport.pool.lock().await.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recycle_is_counted_once_per_generation() {
        let transport = HttpTransport::new(TransportSettings::default()).unwrap();
        transport.recycle(0).await;
        assert_eq!(transport.resets(), 1);

        // a stale recycle for generation 0 must not reset again
        transport.recycle(0).await;
        assert_eq!(transport.resets(), 1);

        let (_, generation) = transport.checkout().await.unwrap();
        transport.recycle(generation).await;
        assert_eq!(transport.resets(), 2);
    }
}
