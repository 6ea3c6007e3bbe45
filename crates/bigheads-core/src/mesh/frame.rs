//! What actually travels over a BLE characteristic write: either a whole
//! mesh frame or one chunk of a fragmented one.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use crate::helpers::from_b64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    Mesh {
        env: Envelope,
    },
    Frag {
        frame_id: String,
        idx: usize,
        total: usize,
        data: String,
    },
}

/// Reassembles `frag` frames keyed by `(address, frame_id)`. No eviction
/// timeout: a stalled transfer's partial chunks live until completed or
/// the process restarts (spec §9 open question).
#[derive(Default)]
pub struct FragmentAssembler {
    partial: HashMap<String, BTreeMap<usize, String>>,
    totals: HashMap<String, usize>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the reassembled frame bytes once every
    /// chunk for its `frame_id` has arrived.
    pub fn collect(
        &mut self,
        address: &str,
        frame_id: &str,
        idx: usize,
        total: usize,
        data: &str,
    ) -> Option<Vec<u8>> {
        if total == 0 || idx >= total {
            return None;
        }
        let key = format!("{address}:{frame_id}");
        let entry = self.partial.entry(key.clone()).or_default();
        entry.insert(idx, data.to_string());
        self.totals.insert(key.clone(), total);

        if entry.len() < total {
            return None;
        }

        let joined: String = (0..total)
            .map(|i| entry.get(&i).cloned().unwrap_or_default())
            .collect();
        self.partial.remove(&key);
        self.totals.remove(&key);

        let raw = from_b64(&joined).ok()?;
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_chunks_in_order_regardless_of_arrival() {
        let mut assembler = FragmentAssembler::new();
        let original = b"hello fragmented world".to_vec();
        let b64 = crate::helpers::to_b64(&original);
        let chunks: Vec<&str> = vec![&b64[0..8], &b64[8..16], &b64[16..]];

        assert!(assembler
            .collect("addr1", "frame-a", 2, 3, chunks[2])
            .is_none());
        assert!(assembler
            .collect("addr1", "frame-a", 0, 3, chunks[0])
            .is_none());
        let result = assembler.collect("addr1", "frame-a", 1, 3, chunks[1]);
        assert_eq!(result, Some(original));
    }

    #[test]
    fn distinct_addresses_do_not_cross_contaminate() {
        let mut assembler = FragmentAssembler::new();
        assembler.collect("addr1", "frame-x", 0, 2, "AA");
        assert!(assembler.collect("addr2", "frame-x", 1, 2, "BB").is_none());
    }
}
