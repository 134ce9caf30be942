use crate::geo::GeoFix;

/// Ordered, append-only log of accepted fixes.
///
/// Insertion order is chronological and authoritative; there is no removal
/// while the owning session is live.
#[derive(Debug, Clone, Default)]
pub struct Route {
    fixes: Vec<GeoFix>,
}

impl Route {
    pub fn new() -> Self {
        Self { fixes: Vec::new() }
    }

    pub fn append(&mut self, fix: GeoFix) {
        self.fixes.push(fix);
    }

    /// Defensive copy for callers such as a map renderer.
    pub fn snapshot(&self) -> Vec<GeoFix> {
        self.fixes.clone()
    }

    /// Most recent accepted fix, if any.
    pub fn last(&self) -> Option<&GeoFix> {
        self.fixes.last()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}
