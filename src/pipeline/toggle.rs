use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Processing on/off switch shared by the presentation thread and the worker.
///
/// Every transition bumps an epoch. Results carry the epoch observed before
/// dispatch, so the presenter can discard anything produced under an earlier
/// toggle state.
#[derive(Debug, Default)]
pub struct Toggle {
    enabled: AtomicBool,
    epoch: AtomicU64,
}

impl Toggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns true if the state changed.
    pub fn set(&self, enabled: bool) -> bool {
        let changed = self.enabled.swap(enabled, Ordering::SeqCst) != enabled;
        if changed {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Epoch first, then the flag: a flip racing with this read either shows
    /// up as disabled or as a newer epoch.
    pub fn observe(&self) -> (u64, bool) {
        let epoch = self.epoch();
        (epoch, self.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_moves_only_on_change() {
        let toggle = Toggle::new(false);
        assert!(!toggle.set(false));
        assert_eq!(toggle.epoch(), 0);

        assert!(toggle.set(true));
        assert!(!toggle.set(true));
        assert!(toggle.set(false));
        assert_eq!(toggle.observe(), (2, false));
    }
}
