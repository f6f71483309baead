//! Contains the data store for local zones.
//!
//! Zones are plain JSON files, one per zone, with a required `$origin` key
//! and one array of records per record kind:
//!
//! ```json
//! {
//!     "$origin": "example.com",
//!     "a": [
//!         { "ttl": 3600, "value": "10.0.0.1" }
//!     ]
//! }
//! ```
//!
//! Every file in the configured directory is loaded once at startup and the
//! store is read-only afterwards. Any problem with the configured data - a
//! file that is not valid JSON, a record whose value is not an IPv4 address,
//! two files claiming the same origin - aborts startup instead of surfacing
//! on the request path.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde_derive::Deserialize;

use crate::dns::protocol::{DnsQuestion, ProtocolError, RecordKind, ZoneRecord};

#[derive(Debug)]
pub enum AuthorityError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Record(ProtocolError),
    DuplicateOrigin(String),
    NoSuchZone(String),
}

impl std::fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityError::Io(e) => write!(f, "IO error: {}", e),
            AuthorityError::Json(e) => write!(f, "zone file is not valid JSON: {}", e),
            AuthorityError::Record(e) => write!(f, "invalid zone record: {}", e),
            AuthorityError::DuplicateOrigin(origin) => {
                write!(f, "more than one zone file declares origin {}", origin)
            }
            AuthorityError::NoSuchZone(origin) => write!(f, "no zone for origin {}", origin),
        }
    }
}

impl std::error::Error for AuthorityError {}

impl From<std::io::Error> for AuthorityError {
    fn from(err: std::io::Error) -> Self {
        AuthorityError::Io(err)
    }
}

impl From<serde_json::Error> for AuthorityError {
    fn from(err: serde_json::Error) -> Self {
        AuthorityError::Json(err)
    }
}

impl From<ProtocolError> for AuthorityError {
    fn from(err: ProtocolError) -> Self {
        AuthorityError::Record(err)
    }
}

type Result<T> = std::result::Result<T, AuthorityError>;

/// A single zone: its origin and the records grouped by kind.
///
/// The origin is fixed once the zone is loaded. Record order within a kind
/// is the order in the zone file and is preserved through to the answer
/// section of responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Zone {
    #[serde(rename = "$origin")]
    pub origin: String,
    #[serde(flatten)]
    pub records: BTreeMap<RecordKind, Vec<ZoneRecord>>,
}

impl Zone {
    pub fn new(origin: String) -> Zone {
        Zone {
            origin,
            records: BTreeMap::new(),
        }
    }

    pub fn add_record(&mut self, kind: RecordKind, rec: ZoneRecord) {
        self.records.entry(kind).or_insert_with(Vec::new).push(rec);
    }

    pub fn records_of(&self, kind: RecordKind) -> &[ZoneRecord] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check every configured record parses into its wire form
    fn validate(&self) -> Result<()> {
        for (kind, records) in &self.records {
            for rec in records {
                match kind {
                    RecordKind::A => {
                        rec.address()?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// The outcome of a record lookup for a supported or unsupported question
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// A supported question type, with the matching records in zone-file
    /// order. The slice may be empty if the zone has no records of the kind.
    Records {
        kind: RecordKind,
        records: &'a [ZoneRecord],
    },
    /// A question type this server does not serve; the response carries the
    /// echoed question and no answers.
    Unsupported(u16),
}

/// In-memory zone store, indexed by origin
#[derive(Debug, Default)]
pub struct Authority {
    zones: BTreeMap<String, Zone>,
}

impl Authority {
    pub fn new() -> Authority {
        Authority {
            zones: BTreeMap::new(),
        }
    }

    /// Load every zone file in `zones_dir`. Fails on the first malformed
    /// file rather than serving a partial view of the configuration.
    pub fn load(zones_dir: &Path) -> Result<Authority> {
        let mut authority = Authority::new();

        for entry in zones_dir.read_dir()? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let file = File::open(&path)?;
            let zone: Zone = serde_json::from_reader(file)?;
            zone.validate()?;

            log::info!(
                "Loaded zone {} with {} records",
                zone.origin,
                zone.records.values().map(Vec::len).sum::<usize>()
            );

            authority.add_zone(zone)?;
        }

        Ok(authority)
    }

    /// Insert a zone; at most one zone may exist per origin
    pub fn add_zone(&mut self, zone: Zone) -> Result<()> {
        if self.zones.contains_key(&zone.origin) {
            return Err(AuthorityError::DuplicateOrigin(zone.origin));
        }

        self.zones.insert(zone.origin.clone(), zone);

        Ok(())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Look up the records answering `question`.
    ///
    /// An unsupported question type short-circuits before the zone lookup,
    /// mirroring the order in which failures are reported: a query for an
    /// unserved type never yields `NoSuchZone`.
    pub fn resolve(&self, question: &DnsQuestion) -> Result<Resolution<'_>> {
        let kind = match RecordKind::from_qtype(question.qtype) {
            Some(kind) => kind,
            None => return Ok(Resolution::Unsupported(question.qtype.to_num())),
        };

        let origin = question.name();
        let zone = match self.zones.get(&origin) {
            Some(zone) => zone,
            None => return Err(AuthorityError::NoSuchZone(origin)),
        };

        Ok(Resolution::Records {
            kind,
            records: zone.records_of(kind),
        })
    }
}
