use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// Bits reserved for the intra-millisecond sequence.
const SEQUENCE_BITS: u32 = 16;

/// Issues strictly increasing ids partition-wide. Ids are wall-clock derived
/// (epoch millis shifted left) with a sequence suffix, so they double as
/// timestamps and versions while never regressing even if the clock does.
pub struct OrderIdProvider {
    last_id: AtomicI64,
}

impl OrderIdProvider {
    pub fn new() -> Self {
        Self {
            last_id: AtomicI64::new(0),
        }
    }

    pub fn next_id(&self) -> i64 {
        let wall = (Self::now_millis() << SEQUENCE_BITS) as i64;
        loop {
            let last = self.last_id.load(Ordering::Acquire);
            let candidate = if wall > last { wall } else { last + 1 };
            if self
                .last_id
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl Default for OrderIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_strictly_increase() {
        let provider = OrderIdProvider::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = provider.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let provider = Arc::new(OrderIdProvider::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let p = provider.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| p.next_id()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
