//! Authoritative DNS responder.
//!
//! # Module Structure
//!
//! * `buffer` - Low-level packet buffer operations
//! * `protocol` - DNS wire codec: header, question and answer handling
//! * `authority` - Zone store and record resolution
//! * `context` - Server configuration and shared state
//! * `server` - Request handling and the UDP transport loop

/// Authoritative zone data, loaded from JSON zone files
pub mod authority;

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// Server configuration and shared context
pub mod context;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// UDP DNS server and query-to-response handling
pub mod server;
