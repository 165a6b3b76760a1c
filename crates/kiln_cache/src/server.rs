//! A cache server speaking the wire protocol, backed by a memory store.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::memory::MemoryPipelineCache;
use crate::protocol::{self, Op, Request, Response};

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// A bound, not yet running cache server.
pub struct CacheServer {
    listener: TcpListener,
    store: Arc<MemoryPipelineCache>,
}

impl CacheServer {
    /// Binds to `addr` with a fresh memory store of `capacity` bytes.
    pub fn bind(addr: impl ToSocketAddrs, capacity: usize) -> io::Result<Self> {
        Ok(Self::with_store(
            TcpListener::bind(addr)?,
            Arc::new(MemoryPipelineCache::new(capacity)),
        ))
    }

    /// Serves `store` on an already bound listener.
    pub fn with_store(listener: TcpListener, store: Arc<MemoryPipelineCache>) -> Self {
        Self { listener, store }
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections on a background thread.
    pub fn spawn(self) -> io::Result<CacheServerHandle> {
        let addr = self.listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let connections: Connections = Arc::default();
        let store = Arc::clone(&self.store);

        let thread = {
            let stop = Arc::clone(&stop);
            let connections = Arc::clone(&connections);
            std::thread::Builder::new()
                .name("kiln-cache-accept".to_string())
                .spawn(move || accept_loop(self.listener, self.store, stop, connections))?
        };

        info!(addr = %addr, capacity = store.capacity(), "cache server listening");
        Ok(CacheServerHandle {
            addr,
            store,
            stop,
            connections,
            thread: Some(thread),
        })
    }
}

/// Controls a running [`CacheServer`]. Dropping the handle shuts it down.
pub struct CacheServerHandle {
    addr: SocketAddr,
    store: Arc<MemoryPipelineCache>,
    stop: Arc<AtomicBool>,
    connections: Connections,
    thread: Option<JoinHandle<()>>,
}

impl CacheServerHandle {
    /// Returns the address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the backing store.
    pub fn store(&self) -> &MemoryPipelineCache {
        &self.store
    }

    /// Blocks until the server stops.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stops accepting, closes open connections and waits for the accept
    /// thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);

        // Wake the blocking accept.
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        let _ = TcpStream::connect(wake);

        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let _ = thread.join();
        info!(addr = %self.addr, "cache server stopped");
    }
}

impl Drop for CacheServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    store: Arc<MemoryPipelineCache>,
    stop: Arc<AtomicBool>,
    connections: Connections,
) {
    let next_id = AtomicU64::new(0);
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to accept cache connection");
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(clone) => {
                connections.lock().insert(id, clone);
            }
            Err(e) => {
                warn!(error = %e, "failed to register cache connection");
                continue;
            }
        }

        let store = Arc::clone(&store);
        let connections_for_thread = Arc::clone(&connections);
        let spawned = std::thread::Builder::new()
            .name("kiln-cache-conn".to_string())
            .spawn(move || {
                let peer = stream.peer_addr().ok();
                debug!(peer = ?peer, "cache client connected");
                if let Err(e) = serve_connection(stream, &store) {
                    debug!(peer = ?peer, error = %e, "cache connection closed with error");
                }
                connections_for_thread.lock().remove(&id);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn cache connection thread");
            connections.lock().remove(&id);
        }
    }
}

fn serve_connection(stream: TcpStream, store: &MemoryPipelineCache) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    while let Some(request) = protocol::read_request(&mut reader)? {
        let response = handle_request(store, request);
        protocol::write_response(&mut writer, &response)?;
    }
    Ok(())
}

fn handle_request(store: &MemoryPipelineCache, request: Request) -> Response {
    let key = request.key;
    match request.op {
        Op::Get => match store.get_entry(&key) {
            Some(data) => Response::value(data.to_vec()),
            None => Response::not_found(),
        },
        Op::Set => match store.insert_entry(key, request.payload) {
            Ok(()) => Response::ok(),
            Err(e) => Response::error(e.to_string()),
        },
        Op::Delete => {
            if store.remove_entry(&key) {
                Response::ok()
            } else {
                Response::not_found()
            }
        }
        Op::Ping => Response::ok(),
    }
}
