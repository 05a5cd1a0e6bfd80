//! Native player instance registry.
//!
//! Instances register with an explicit liveness token; every dispatch
//! checks liveness and prunes dead entries, so a torn-down instance is
//! never kept alive by the registry and late messages become no-ops.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use tracing::trace;

/// Control surface of one native player instance.
pub trait PlayerControl: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn seek(&self, timestamp: f64);
}

/// One quality rendition as reported by the scripted player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
}

/// Mutable per-instance playback state mirrored from runtime reports.
#[derive(Debug, Default)]
pub struct InstanceState {
    pub is_ready: bool,
    pub is_playing: bool,
    pub rate: f64,
    pub default_rate: f64,
    pub levels: BTreeMap<u32, Level>,
    pub current_level: Option<u32>,
    pub current_time: f64,
    pub has_requested_load: bool,
    /// Preferred rendition height; `None` means automatic selection.
    pub preferred_height: Option<u32>,
}

impl InstanceState {
    /// Level index to load: preferred height when it matches an
    /// available level, otherwise the highest available rendition.
    pub fn level_to_load(&self) -> Option<u32> {
        if let Some(height) = self.preferred_height
            && let Some((&index, _)) = self.levels.iter().find(|(_, level)| level.height == height)
        {
            return Some(index);
        }
        self.levels
            .iter()
            .max_by_key(|(_, level)| level.height)
            .map(|(&index, _)| index)
    }
}

pub struct InstanceEntry {
    pub control: Arc<dyn PlayerControl>,
    pub state: InstanceState,
    liveness: Weak<()>,
}

#[derive(Default)]
pub struct InstanceRegistry {
    entries: HashMap<u64, InstanceEntry>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        instance_id: u64,
        control: Arc<dyn PlayerControl>,
        liveness: Weak<()>,
        preferred_height: Option<u32>,
    ) {
        let state = InstanceState {
            preferred_height,
            ..InstanceState::default()
        };
        self.entries.insert(
            instance_id,
            InstanceEntry {
                control,
                state,
                liveness,
            },
        );
    }

    pub fn remove(&mut self, instance_id: u64) -> bool {
        self.entries.remove(&instance_id).is_some()
    }

    /// The entry for a live instance; a dead entry is pruned and
    /// reported as absent.
    pub fn live(&mut self, instance_id: u64) -> Option<&mut InstanceEntry> {
        if let Some(entry) = self.entries.get(&instance_id)
            && entry.liveness.upgrade().is_none()
        {
            trace!(instance_id, "pruning dead player instance");
            self.entries.remove(&instance_id);
            return None;
        }
        self.entries.get_mut(&instance_id)
    }
}
