//! The `ServerContext` holds the configuration and loaded zone data shared
//! by the transport loop and its workers.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use derive_more::{Display, Error, From};

use crate::dns::authority::Authority;

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Authority(crate::dns::authority::AuthorityError),
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ContextError>;

/// Everything the server needs from its environment, gathered in one place
/// so the protocol core can be constructed and tested without touching
/// sockets, stdin or the process arguments.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub dns_port: u16,
    pub zones_dir: PathBuf,
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            dns_port: 53,
            zones_dir: PathBuf::from("zones"),
            worker_threads: 4,
        }
    }
}

pub struct ServerStatistics {
    pub udp_query_count: AtomicUsize,
    pub dropped_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }

    pub fn get_dropped_query_count(&self) -> usize {
        self.dropped_query_count.load(Ordering::Acquire)
    }
}

pub struct ServerContext {
    pub config: ServerConfig,
    pub authority: Authority,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    /// Build the context for `config`, loading every zone file up front.
    /// A malformed zone aborts startup here; nothing is served until the
    /// whole configuration has been read successfully.
    pub fn new(config: ServerConfig) -> Result<ServerContext> {
        let authority = Authority::load(&config.zones_dir)?;

        Ok(ServerContext {
            config,
            authority,
            statistics: ServerStatistics {
                udp_query_count: AtomicUsize::new(0),
                dropped_query_count: AtomicUsize::new(0),
            },
        })
    }
}
