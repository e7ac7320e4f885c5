use crate::core::Result;
use crate::poll::FieldSpec;
use crate::registry::{Registry, VarId};
use crate::time::{CLOCK_FIELD, GPS_FIELDS, PEER_FIELDS, SYSTEM_FIELDS};

/// Ids of every published variable, grouped by poller.
///
/// Groups are registered peer, system, host clock, GPS. Clients address
/// variables by position, so this order must not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalogue {
    pub peer: Vec<VarId>,
    pub system: Vec<VarId>,
    pub clock: VarId,
    pub gps: Vec<VarId>,
}

impl Catalogue {
    /// Registers all groups as read-only slots
    pub async fn register(registry: &Registry) -> Result<Self> {
        let peer = register_group(registry, &PEER_FIELDS).await?;
        let system = register_group(registry, &SYSTEM_FIELDS).await?;
        let clock = registry.register(CLOCK_FIELD.kind.size(), false).await?;
        let gps = register_group(registry, &GPS_FIELDS).await?;
        Ok(Catalogue {
            peer,
            system,
            clock,
            gps,
        })
    }

    /// Number of registered variables
    pub fn len(&self) -> usize {
        self.peer.len() + self.system.len() + 1 + self.gps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(id, name)` of every variable in id order
    pub fn names(&self) -> Vec<(VarId, &'static str)> {
        let mut names = Vec::with_capacity(self.len());
        names.extend(self.peer.iter().copied().zip(PEER_FIELDS.iter().map(|f| f.name)));
        names.extend(self.system.iter().copied().zip(SYSTEM_FIELDS.iter().map(|f| f.name)));
        names.push((self.clock, CLOCK_FIELD.name));
        names.extend(self.gps.iter().copied().zip(GPS_FIELDS.iter().map(|f| f.name)));
        names
    }
}

async fn register_group(registry: &Registry, specs: &[FieldSpec]) -> Result<Vec<VarId>> {
    let mut ids = Vec::with_capacity(specs.len());
    for spec in specs {
        ids.push(registry.register(spec.kind.size(), false).await?);
    }
    Ok(ids)
}
