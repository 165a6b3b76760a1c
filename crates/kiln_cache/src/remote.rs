//! Client for a remote cache server.

use std::io::{self, Cursor, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use kiln_common::{ContentHash, Guid};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::protocol::{self, Op, Request, Response, Status};
use crate::traits::{BufferedCacheWriter, CacheAccess, CacheWriter, PipelineCache};

/// Connection settings for [`RemotePipelineCache`].
#[derive(Debug, Clone)]
pub struct RemoteCacheOptions {
    /// `host:port` of the cache server.
    pub addr: String,
    /// Read/write permissions.
    pub access: CacheAccess,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Timeout for each read and write on an established connection.
    pub io_timeout: Duration,
    /// How long a failed connect keeps the server marked unavailable. No
    /// connection is attempted during that window.
    pub retry_delay: Duration,
}

impl RemoteCacheOptions {
    /// Options with default timeouts and full access.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            access: CacheAccess::READ_WRITE,
            connect_timeout: Duration::from_millis(2000),
            io_timeout: Duration::from_millis(5000),
            retry_delay: Duration::from_millis(10_000),
        }
    }
}

/// A [`PipelineCache`] backed by a cache server.
///
/// Holds one persistent connection, guarded by a mutex so request and
/// response frames of concurrent callers never interleave. A failed exchange
/// drops the connection and is retried once on a fresh one; if that fails
/// too the server is reported [`CacheError::Unavailable`] and reads degrade
/// to misses.
///
/// A failed connect marks the server unavailable for
/// [`retry_delay`](RemoteCacheOptions::retry_delay); requests in that window
/// fail immediately instead of waiting on the connect timeout again.
pub struct RemotePipelineCache {
    options: RemoteCacheOptions,
    connection: Mutex<Connection>,
}

#[derive(Default)]
struct Connection {
    stream: Option<TcpStream>,
    unavailable_until: Option<Instant>,
    last_error: String,
}

impl RemotePipelineCache {
    /// Creates a client. No connection is made until the first request.
    pub fn new(options: RemoteCacheOptions) -> Self {
        Self {
            options,
            connection: Mutex::new(Connection::default()),
        }
    }

    /// Returns the server address.
    pub fn addr(&self) -> &str {
        &self.options.addr
    }

    /// Checks that the server answers.
    pub fn ping(&self) -> Result<(), CacheError> {
        let response = self.exchange(&Request {
            op: Op::Ping,
            key: CacheKey::new(Guid::NULL, ContentHash::from_raw([0; 16])),
            payload: Vec::new(),
        })?;
        match response.status {
            Status::Ok => Ok(()),
            _ => Err(self.rejected(&response)),
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.options.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.options.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.options.io_timeout))?;
                    stream.set_write_timeout(Some(self.options.io_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(addr = %addr, "connected to cache server");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        }))
    }

    fn exchange(&self, request: &Request) -> Result<Response, CacheError> {
        let mut frame = Vec::with_capacity(1 + CacheKey::ENCODED_LEN + 4 + request.payload.len());
        protocol::write_request(&mut frame, request).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let mut connection = self.connection.lock();
        if let Some(until) = connection.unavailable_until {
            if Instant::now() < until {
                return Err(self.unavailable(format!(
                    "backing off after: {}",
                    connection.last_error
                )));
            }
            connection.unavailable_until = None;
        }

        let mut last_err = None;
        for attempt in 0..2 {
            if connection.stream.is_none() {
                match self.connect() {
                    Ok(stream) => connection.stream = Some(stream),
                    Err(e) => {
                        warn!(
                            addr = %self.options.addr,
                            error = %e,
                            retry_in_ms = self.options.retry_delay.as_millis() as u64,
                            "cache server unreachable"
                        );
                        connection.unavailable_until =
                            Some(Instant::now() + self.options.retry_delay);
                        connection.last_error = e.to_string();
                        return Err(self.unavailable(e.to_string()));
                    }
                }
            }
            let Some(stream) = connection.stream.as_mut() else {
                continue;
            };
            match round_trip(stream, &frame) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(addr = %self.options.addr, attempt, error = %e, "cache exchange failed");
                    connection.stream = None;
                    last_err = Some(e);
                }
            }
        }

        Err(self.unavailable(
            last_err.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
        ))
    }

    fn unavailable(&self, reason: String) -> CacheError {
        CacheError::Unavailable {
            addr: self.options.addr.clone(),
            reason,
        }
    }

    fn rejected(&self, response: &Response) -> CacheError {
        CacheError::Remote {
            addr: self.options.addr.clone(),
            message: match response.status {
                Status::Error => response.message(),
                other => format!("unexpected status {other:?}"),
            },
        }
    }

    fn store(&self, key: CacheKey, payload: Vec<u8>) -> Result<(), CacheError> {
        let size = payload.len();
        let response = self.exchange(&Request {
            op: Op::Set,
            key,
            payload,
        })?;
        match response.status {
            Status::Ok => {
                debug!(key = %key, bytes = size, "stored artifact remotely");
                Ok(())
            }
            _ => Err(self.rejected(&response)),
        }
    }
}

fn round_trip(stream: &mut TcpStream, frame: &[u8]) -> io::Result<Response> {
    use std::io::Write;
    stream.write_all(frame)?;
    stream.flush()?;
    protocol::read_response(stream)
}

impl PipelineCache for RemotePipelineCache {
    fn get(&self, guid: Guid, hash: ContentHash) -> Option<Box<dyn Read + Send>> {
        if !self.options.access.read {
            return None;
        }
        let key = CacheKey::new(guid, hash);
        let response = match self.exchange(&Request {
            op: Op::Get,
            key,
            payload: Vec::new(),
        }) {
            Ok(response) => response,
            Err(e @ CacheError::Unavailable { .. }) => {
                debug!(key = %key, error = %e, "remote cache unavailable; treating as miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "remote cache read failed; treating as miss");
                return None;
            }
        };
        match response.status {
            Status::Value => Some(Box::new(Cursor::new(response.payload))),
            Status::NotFound => None,
            _ => {
                warn!(key = %key, error = %self.rejected(&response), "remote cache read failed");
                None
            }
        }
    }

    fn put(
        &self,
        guid: Guid,
        hash: ContentHash,
    ) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        self.options.access.check_write()?;
        let key = CacheKey::new(guid, hash);
        Ok(Box::new(BufferedCacheWriter::new(move |payload| {
            self.store(key, payload)
        })))
    }

    fn remove(&self, guid: Guid, hash: ContentHash) -> Result<bool, CacheError> {
        self.options.access.check_write()?;
        let response = self.exchange(&Request {
            op: Op::Delete,
            key: CacheKey::new(guid, hash),
            payload: Vec::new(),
        })?;
        match response.status {
            Status::Ok => Ok(true),
            Status::NotFound => Ok(false),
            _ => Err(self.rejected(&response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::CacheServer;
    use std::io::Write;
    use std::net::TcpListener;

    fn client_for(addr: std::net::SocketAddr) -> RemotePipelineCache {
        let mut options = RemoteCacheOptions::new(addr.to_string());
        options.connect_timeout = Duration::from_millis(500);
        options.io_timeout = Duration::from_millis(2000);
        RemotePipelineCache::new(options)
    }

    fn unused_addr() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn roundtrip_through_server() {
        let server = CacheServer::bind("127.0.0.1:0", 1 << 20).unwrap().spawn().unwrap();
        let cache = client_for(server.local_addr());

        cache.ping().unwrap();

        let guid = Guid::from_u128(11);
        let hash = ContentHash::from_bytes(b"fp");
        assert!(cache.get(guid, hash).is_none());

        let mut writer = cache.put(guid, hash).unwrap();
        writer.write_all(b"remote bytes").unwrap();
        writer.commit().unwrap();

        let mut out = Vec::new();
        cache.get(guid, hash).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"remote bytes");

        assert!(cache.remove(guid, hash).unwrap());
        assert!(!cache.remove(guid, hash).unwrap());
        assert!(!cache.contains(guid, hash));

        server.shutdown();
    }

    #[test]
    fn uncommitted_writer_sends_nothing() {
        let server = CacheServer::bind("127.0.0.1:0", 1 << 20).unwrap().spawn().unwrap();
        let cache = client_for(server.local_addr());
        let guid = Guid::from_u128(1);
        let hash = ContentHash::from_bytes(b"fp");
        {
            let mut writer = cache.put(guid, hash).unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert!(cache.get(guid, hash).is_none());
        assert!(server.store().is_empty());
        server.shutdown();
    }

    #[test]
    fn unreachable_server_degrades_to_miss() {
        let cache = client_for(unused_addr());
        let guid = Guid::from_u128(1);
        let hash = ContentHash::from_bytes(b"fp");
        assert!(cache.get(guid, hash).is_none());
        assert!(!cache.contains(guid, hash));
        assert!(matches!(cache.ping(), Err(CacheError::Unavailable { .. })));

        let mut writer = cache.put(guid, hash).unwrap();
        writer.write_all(b"data").unwrap();
        assert!(matches!(
            writer.commit(),
            Err(CacheError::Unavailable { .. })
        ));
    }

    #[test]
    fn failed_connect_backs_off_until_retry_delay() {
        let addr = unused_addr();
        let mut options = RemoteCacheOptions::new(addr.to_string());
        options.connect_timeout = Duration::from_millis(500);
        options.retry_delay = Duration::from_millis(300);
        let cache = RemotePipelineCache::new(options);
        let guid = Guid::from_u128(1);
        let hash = ContentHash::from_bytes(b"fp");

        let started = Instant::now();
        for _ in 0..50 {
            assert!(cache.get(guid, hash).is_none());
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        // A server appearing inside the window is not contacted yet.
        let server = CacheServer::bind(addr, 1 << 20).unwrap().spawn().unwrap();
        let mut writer = server.store().put(guid, hash).unwrap();
        writer.write_all(b"late").unwrap();
        writer.commit().unwrap();
        if started.elapsed() < Duration::from_millis(250) {
            assert!(cache.get(guid, hash).is_none());
        }

        std::thread::sleep(Duration::from_millis(350));
        let mut out = Vec::new();
        cache.get(guid, hash).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"late");
        server.shutdown();
    }

    #[test]
    fn reconnects_after_server_restart() {
        let server = CacheServer::bind("127.0.0.1:0", 1 << 20).unwrap().spawn().unwrap();
        let addr = server.local_addr();
        let cache = client_for(addr);
        cache.ping().unwrap();
        server.shutdown();

        let server = CacheServer::bind(addr, 1 << 20).unwrap().spawn().unwrap();
        cache.ping().unwrap();
        server.shutdown();
    }

    #[test]
    fn read_only_client_refuses_writes() {
        let mut options = RemoteCacheOptions::new(unused_addr().to_string());
        options.access = CacheAccess::READ_ONLY;
        let cache = RemotePipelineCache::new(options);
        assert!(matches!(
            cache.put(Guid::from_u128(1), ContentHash::from_bytes(b"x")),
            Err(CacheError::AccessDenied { .. })
        ));
    }

    #[test]
    fn concurrent_clients_share_one_connection() {
        let server = CacheServer::bind("127.0.0.1:0", 1 << 20).unwrap().spawn().unwrap();
        let cache = client_for(server.local_addr());

        std::thread::scope(|s| {
            for t in 0..4u128 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..20u128 {
                        let guid = Guid::from_u128(t * 100 + i);
                        let hash = ContentHash::from_bytes(&guid.as_bytes()[..]);
                        let mut writer = cache.put(guid, hash).unwrap();
                        writer.write_all(guid.as_bytes()).unwrap();
                        writer.commit().unwrap();
                        let mut out = Vec::new();
                        cache.get(guid, hash).unwrap().read_to_end(&mut out).unwrap();
                        assert_eq!(&out[..], &guid.as_bytes()[..]);
                    }
                });
            }
        });

        assert_eq!(server.store().len(), 80);
        server.shutdown();
    }
}
