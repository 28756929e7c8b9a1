//! Host port allocation

use std::collections::{BTreeMap, HashSet};

use crate::store::InstanceRecord;

/// Pick the lowest port at or above `base` not taken by a live record.
///
/// There is no reclamation list; destroying an instance frees its port
/// implicitly by removing the record.
pub fn next_free_port(instances: &BTreeMap<String, InstanceRecord>, base: u16) -> u16 {
    let used: HashSet<u16> = instances.values().map(|record| record.port).collect();

    let mut port = base;
    while used.contains(&port) {
        port += 1;
    }
    port
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: u16) -> InstanceRecord {
        InstanceRecord {
            pubkey: "W".repeat(44),
            port,
            gateway_token: "ab".repeat(24),
            created: 0,
            last_started: 0,
            container_id: "0123456789ab".to_string(),
        }
    }

    fn instances(ports: &[u16]) -> BTreeMap<String, InstanceRecord> {
        ports
            .iter()
            .enumerate()
            .map(|(i, port)| (format!("{:012x}", i), record(*port)))
            .collect()
    }

    #[test]
    fn test_empty_store_gets_base_port() {
        assert_eq!(next_free_port(&instances(&[]), 19000), 19000);
    }

    #[test]
    fn test_dense_allocation_appends() {
        let map = instances(&[19000, 19001, 19002]);
        assert_eq!(next_free_port(&map, 19000), 19003);
    }

    #[test]
    fn test_gap_is_reused() {
        let map = instances(&[19000, 19002, 19003]);
        assert_eq!(next_free_port(&map, 19000), 19001);
    }
}
