//! Admission control: a cap on concurrently active sessions.

/// Capacity gate consulted immediately before a session is opened.
///
/// It holds no count of its own. The [`SessionManager`](super::session::SessionManager)
/// passes the registry size while holding the registry lock, so the check
/// and the registration that follows cannot be split by another open.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_concurrent: usize,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    /// `false` once `active` has reached the configured maximum.
    pub fn try_admit(&self, active: usize) -> bool {
        active < self.max_concurrent
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denies_at_capacity() {
        let gate = AdmissionController::new(5);
        assert!(gate.try_admit(0));
        assert!(gate.try_admit(4));
        assert!(!gate.try_admit(5));
        assert!(!gate.try_admit(6));
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        assert!(!AdmissionController::new(0).try_admit(0));
    }
}
