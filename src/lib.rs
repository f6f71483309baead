//! Meridian DNS Server
//!
//! A minimal authoritative DNS server: it answers A-record queries over UDP
//! from zone data loaded once at startup, and nothing else. No recursion,
//! no caching, no TCP; a query either matches a configured zone and gets a
//! complete wire-format response, or it is dropped.
//!
//! The interesting part is the `dns` module's codec: parsing raw query
//! datagrams and serializing responses byte-for-byte as RFC 1035 lays them
//! out.

/// DNS server implementation and protocol handling
pub mod dns;
