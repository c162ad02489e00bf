use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{UploadError, UploadResult};
use crate::types::{HostProbe, TransportKind};

static GLOBAL: Lazy<AdapterSelector> = Lazy::new(AdapterSelector::new);

/// Picks the first transport in priority order whose probe holds.
///
/// The first successful answer is memoized; later calls return it without
/// probing again, whatever priority or host they pass. A failed selection
/// is not cached.
#[derive(Debug, Default)]
pub struct AdapterSelector {
    chosen: RwLock<Option<TransportKind>>,
}

impl AdapterSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide selector shared by every uploader
    pub fn global() -> &'static AdapterSelector {
        &GLOBAL
    }

    pub fn select(
        &self,
        priority: &[TransportKind],
        host: &HostProbe,
        plugin_min_version: u32,
    ) -> UploadResult<TransportKind> {
        if let Some(kind) = *self.chosen.read() {
            return Ok(kind);
        }

        let mut chosen = self.chosen.write();
        if let Some(kind) = *chosen {
            return Ok(kind);
        }

        let kind = probe(priority, host, plugin_min_version)?;
        debug!(transport = %kind, "selected upload transport");
        *chosen = Some(kind);
        Ok(kind)
    }

    /// Memoized choice, if any
    pub fn cached(&self) -> Option<TransportKind> {
        *self.chosen.read()
    }

    /// Forget the memoized choice
    pub fn reset(&self) {
        *self.chosen.write() = None;
    }
}

/// Uncached selection
pub fn probe(priority: &[TransportKind], host: &HostProbe, plugin_min_version: u32) -> UploadResult<TransportKind> {
    priority
        .iter()
        .copied()
        .find(|kind| host.supports(*kind, plugin_min_version))
        .ok_or_else(|| UploadError::NoAdapterAvailable {
            tried: priority.to_vec(),
        })
}
