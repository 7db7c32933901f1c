use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResyncTarget {
    Directory,
    StateSnapshot,
    Automations,
    Groups,
    Settings,
}

impl ResyncTarget {
    pub const ALL: [ResyncTarget; 5] = [
        ResyncTarget::Directory,
        ResyncTarget::StateSnapshot,
        ResyncTarget::Automations,
        ResyncTarget::Groups,
        ResyncTarget::Settings,
    ];
}

/// At most one request per target in flight. A trigger that arrives meanwhile is remembered and
/// runs once after the in-flight result has been applied.
#[derive(Debug, Default)]
pub struct ResyncGuard {
    in_flight: HashSet<ResyncTarget>,
    dirty: HashSet<ResyncTarget>,
}

impl ResyncGuard {
    /// Returns true when the caller should start the request now.
    pub fn request(&mut self, target: ResyncTarget) -> bool {
        if self.in_flight.insert(target) {
            true
        } else {
            self.dirty.insert(target);
            false
        }
    }

    /// Returns true when the target was triggered again while in flight; it stays in flight and
    /// the caller should start it again.
    pub fn complete(&mut self, target: ResyncTarget) -> bool {
        if self.dirty.remove(&target) {
            true
        } else {
            self.in_flight.remove(&target);
            false
        }
    }

    pub fn is_in_flight(&self, target: ResyncTarget) -> bool {
        self.in_flight.contains(&target)
    }
}
