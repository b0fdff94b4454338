use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out connection ids. Shared by every connection task of a process.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    next: AtomicU32,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionIdGenerator;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_increase_monotonically() {
        let ids = ConnectionIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = Arc::new(ConnectionIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("join") {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
