/// Emulated MediaSource: a declared duration plus the ordered set of
/// source buffers attached to it.
#[derive(Debug, Default)]
pub struct VirtualMediaSource {
    duration: Option<f64>,
    source_buffer_ids: Vec<u64>,
}

impl VirtualMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Returns whether the duration actually changed; dependents are
    /// only notified on change, not on a re-set of the same value.
    pub fn set_duration(&mut self, duration: f64) -> bool {
        if self.duration == Some(duration) {
            return false;
        }
        self.duration = Some(duration);
        true
    }

    pub fn source_buffer_ids(&self) -> &[u64] {
        &self.source_buffer_ids
    }

    pub fn set_source_buffer_ids(&mut self, ids: Vec<u64>) {
        self.source_buffer_ids = ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_duration_reports_change() {
        let mut source = VirtualMediaSource::new();
        assert!(source.set_duration(10.0));
        assert!(!source.set_duration(10.0));
        assert!(source.set_duration(12.0));
        assert_eq!(source.duration(), Some(12.0));
    }
}
