//! Explicit ownership of bridge-visible objects.
//!
//! One registry owns every emulated object, passed by reference to the
//! router; lookups return an explicit "not found" instead of silently
//! swallowing missing ids.

use std::collections::HashMap;

use crate::player::{FragmentBuffer, VirtualMediaSource};

/// Binding between one playback-runtime instance and its media source.
#[derive(Debug)]
pub struct VideoElement {
    pub instance_id: u64,
    pub media_source_id: Option<u64>,
}

#[derive(Debug, Default)]
pub struct BridgeRegistry {
    pub video_elements: HashMap<u64, VideoElement>,
    pub media_sources: HashMap<u64, VirtualMediaSource>,
    pub source_buffers: HashMap<u64, FragmentBuffer>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Video element bound to the given runtime instance, if any.
    pub fn video_element_by_instance(&mut self, instance_id: u64) -> Option<&mut VideoElement> {
        self.video_elements
            .values_mut()
            .find(|element| element.instance_id == instance_id)
    }

    /// Bridge id of the video element attached to a media source.
    pub fn video_element_for_media_source(&self, media_source_id: u64) -> Option<u64> {
        self.video_elements
            .iter()
            .find(|(_, element)| element.media_source_id == Some(media_source_id))
            .map(|(&bridge_id, _)| bridge_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_instance_and_media_source() {
        let mut registry = BridgeRegistry::new();
        registry.video_elements.insert(
            10,
            VideoElement {
                instance_id: 3,
                media_source_id: Some(20),
            },
        );

        assert!(registry.video_element_by_instance(3).is_some());
        assert!(registry.video_element_by_instance(4).is_none());
        assert_eq!(registry.video_element_for_media_source(20), Some(10));
        assert_eq!(registry.video_element_for_media_source(21), None);
    }
}
