use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a participant currently accepts step requests.
pub trait ServiceAvailability: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Switch held in memory, shared by clones. Available by default.
#[derive(Debug, Clone)]
pub struct InMemoryAvailability {
    available: Arc<AtomicBool>,
}

impl InMemoryAvailability {
    pub fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for InMemoryAvailability {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceAvailability for InMemoryAvailability {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_switch() {
        let availability = InMemoryAvailability::new();
        let view = availability.clone();
        assert!(view.is_available());

        availability.set_available(false);
        assert!(!view.is_available());
    }
}
