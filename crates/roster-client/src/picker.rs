//! Per-RPC endpoint selection.
//!
//! The picker is a pure function over the latest membership snapshot plus a
//! monotonic cursor: quarantined hosts are filtered out, the minimum
//! advertised load wins, and ties rotate round-robin through the tied hosts
//! in stable `(address, port)` order so rotation is deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};

use roster_common::host::Host;
use roster_common::protocol::error::{Result, RosterError};

pub struct WeightedPicker {
    cursor: AtomicUsize,
}

impl WeightedPicker {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    /// Selects a host from `snapshot`, or `NoReadyEndpoint` when every host
    /// is quarantined or the snapshot is empty.
    ///
    /// The cursor only advances on a successful pick, so an empty snapshot
    /// does not perturb the rotation.
    pub fn pick(&self, snapshot: &[Host]) -> Result<Host> {
        let ready: Vec<&Host> = snapshot
            .iter()
            .filter(|host| !host.metadata.quarantined)
            .collect();

        let min_load = match ready.iter().map(|host| host.metadata.load).min() {
            Some(min_load) => min_load,
            None => return Err(RosterError::NoReadyEndpoint),
        };

        let mut candidates: Vec<&Host> = ready
            .into_iter()
            .filter(|host| host.metadata.load == min_load)
            .collect();
        candidates.sort_by(|a, b| (a.address.as_str(), a.port).cmp(&(b.address.as_str(), b.port)));

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[index].clone())
    }
}

impl Default for WeightedPicker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_common::host::HostMetadata;
    use std::collections::HashMap;

    fn host(port: u16, load: i32, quarantined: bool) -> Host {
        Host::with_metadata("h", port, HostMetadata { load, quarantined })
    }

    #[test]
    fn test_empty_snapshot_has_no_ready_endpoint() {
        let picker = WeightedPicker::new();
        assert!(matches!(
            picker.pick(&[]),
            Err(RosterError::NoReadyEndpoint)
        ));
    }

    #[test]
    fn test_all_quarantined_has_no_ready_endpoint() {
        let picker = WeightedPicker::new();
        let snapshot = vec![host(1, 0, true), host(2, 5, true)];
        assert!(matches!(
            picker.pick(&snapshot),
            Err(RosterError::NoReadyEndpoint)
        ));
    }

    #[test]
    fn test_quarantined_hosts_are_never_picked() {
        let picker = WeightedPicker::new();
        // The quarantined host advertises the lowest load and still loses.
        let snapshot = vec![host(1, 0, true), host(2, 5, false), host(3, 9, false)];
        for _ in 0..100 {
            assert_eq!(picker.pick(&snapshot).unwrap().port, 2);
        }
    }

    #[test]
    fn test_lowest_load_wins() {
        let picker = WeightedPicker::new();
        let snapshot = vec![host(1, 7, false), host(2, 3, false), host(3, 12, false)];
        for _ in 0..50 {
            assert_eq!(picker.pick(&snapshot).unwrap().port, 2);
        }
    }

    #[test]
    fn test_negative_load_is_lowest() {
        let picker = WeightedPicker::new();
        let snapshot = vec![host(1, 0, false), host(2, -4, false)];
        assert_eq!(picker.pick(&snapshot).unwrap().port, 2);
    }

    #[test]
    fn test_ties_rotate_fairly() {
        let picker = WeightedPicker::new();
        let snapshot = vec![
            host(1, 2, false),
            host(2, 2, false),
            host(3, 2, false),
            host(4, 8, false),
        ];

        let mut counts: HashMap<u16, usize> = HashMap::new();
        for _ in 0..30 {
            *counts.entry(picker.pick(&snapshot).unwrap().port).or_insert(0) += 1;
        }

        // 10 * k consecutive picks over k tied hosts: each appears, and the
        // deterministic rotation makes the split exact.
        assert_eq!(counts[&1], 10);
        assert_eq!(counts[&2], 10);
        assert_eq!(counts[&3], 10);
        assert!(!counts.contains_key(&4));
    }

    #[test]
    fn test_rotation_is_deterministic_regardless_of_snapshot_order() {
        let picker = WeightedPicker::new();
        let forward = vec![host(1, 0, false), host(2, 0, false)];
        let backward = vec![host(2, 0, false), host(1, 0, false)];

        // Candidate order is normalized, so alternation continues across
        // differently ordered snapshots.
        assert_eq!(picker.pick(&forward).unwrap().port, 1);
        assert_eq!(picker.pick(&backward).unwrap().port, 2);
        assert_eq!(picker.pick(&forward).unwrap().port, 1);
    }

    #[test]
    fn test_failed_pick_does_not_advance_cursor() {
        let picker = WeightedPicker::new();
        let snapshot = vec![host(1, 0, false), host(2, 0, false)];

        assert_eq!(picker.pick(&snapshot).unwrap().port, 1);
        assert!(picker.pick(&[]).is_err());
        assert_eq!(picker.pick(&snapshot).unwrap().port, 2);
    }
}
