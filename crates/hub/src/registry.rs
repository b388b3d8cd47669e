//! The closed set of zones known at startup, with their display metadata.

use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Zone identifiers
// ---------------------------------------------------------------------------

/// Opaque zone identifier. Only obtainable from a [`ZoneRegistry`], so holding
/// one means the zone is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ZoneId(Arc<str>);

impl ZoneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ZoneId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ZoneInfo {
    pub zone_id: ZoneId,
    pub name: String,
    /// Where the zone indicator sits on the floor plan, if the dashboard
    /// draws one.
    pub position: Option<[u32; 2]>,
}

/// Registered zones in configuration order. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    zones: Arc<[ZoneInfo]>,
}

impl ZoneRegistry {
    /// Build a registry from `(zone_id, name, position)` entries. Duplicate
    /// ids keep the first entry; config validation rejects them earlier.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, String, Option<[u32; 2]>)>,
        S: AsRef<str>,
    {
        let mut zones: Vec<ZoneInfo> = Vec::new();
        for (id, name, position) in entries {
            let id = id.as_ref();
            if zones.iter().any(|z| z.zone_id.as_str() == id) {
                continue;
            }
            zones.push(ZoneInfo {
                zone_id: ZoneId(Arc::from(id)),
                name,
                position,
            });
        }
        Self {
            zones: zones.into(),
        }
    }

    /// Look up a zone by its textual id.
    pub fn resolve(&self, id: &str) -> Option<&ZoneId> {
        self.get(id).map(|z| &z.zone_id)
    }

    pub fn get(&self, id: &str) -> Option<&ZoneInfo> {
        self.zones.iter().find(|z| z.zone_id.as_str() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneInfo> {
        self.zones.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ZoneId> {
        self.zones.iter().map(|z| &z.zone_id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
