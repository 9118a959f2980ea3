//! Wave/batch partitioning and the JSONL request payload

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use batchline_core::WorkItem;

/// One batch job's worth of items. `wave` and `batch_num` are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub wave: usize,
    pub batch_num: usize,
    pub items: &'a [WorkItem],
}

/// A group of batches whose estimated enqueued tokens fit the safe budget
#[derive(Debug, Clone)]
pub struct Wave<'a> {
    pub wave: usize,
    pub batches: Vec<Batch<'a>>,
}

impl Wave<'_> {
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }
}

/// Split `items` into waves of at most `max_items_per_wave`, each wave into
/// batches of at most `max_batch_size`.
///
/// Wave *k* holds items `[k·W, min((k+1)·W, N))`. Batch numbers restart at 1
/// in every wave.
pub fn partition(
    items: &[WorkItem],
    max_items_per_wave: usize,
    max_batch_size: usize,
) -> Vec<Wave<'_>> {
    if max_items_per_wave == 0 || max_batch_size == 0 {
        return Vec::new();
    }
    items
        .chunks(max_items_per_wave)
        .enumerate()
        .map(|(w, wave_items)| Wave {
            wave: w + 1,
            batches: wave_items
                .chunks(max_batch_size)
                .enumerate()
                .map(|(b, chunk)| Batch {
                    wave: w + 1,
                    batch_num: b + 1,
                    items: chunk,
                })
                .collect(),
        })
        .collect()
}

/// Deterministic name, so a rerun under the same run name maps onto the
/// same ledger entries.
pub fn batch_name(run_name: &str, wave: usize, batch_num: usize) -> String {
    format!("{run_name}_wave{wave:02}_batch{batch_num:03}")
}

/// Request id for the item at `idx` within its batch
pub fn request_id(idx: usize) -> String {
    format!("request_{idx}")
}

/// `request_<idx>` → original item id for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMapping {
    map: FxHashMap<String, String>,
}

impl IdMapping {
    pub fn get(&self, custom_id: &str) -> Option<&str> {
        self.map.get(custom_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Serialize)]
struct RequestRecord<'a> {
    custom_id: String,
    title: &'a str,
    content: &'a str,
}

/// Encode a batch as JSONL request records plus its id mapping
pub fn build_payload(batch: &Batch<'_>) -> serde_json::Result<(Vec<u8>, IdMapping)> {
    let mut payload = Vec::with_capacity(batch.items.len() * 256);
    let mut mapping = IdMapping::default();
    for (idx, item) in batch.items.iter().enumerate() {
        let record = RequestRecord {
            custom_id: request_id(idx),
            title: &item.title,
            content: &item.content,
        };
        serde_json::to_writer(&mut payload, &record)?;
        payload.push(b'\n');
        mapping.map.insert(record.custom_id, item.id.clone());
    }
    Ok((payload, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("id-{i}"), format!("t{i}"), "body"))
            .collect()
    }

    #[test]
    fn twelve_thousand_items_into_four_waves() {
        let items = items(12_000);
        let waves = partition(&items, 3200, 1000);
        let sizes: Vec<_> = waves.iter().map(Wave::item_count).collect();
        let batches: Vec<_> = waves.iter().map(|w| w.batches.len()).collect();
        assert_eq!(sizes, [3200, 3200, 3200, 2400]);
        assert_eq!(batches, [4, 4, 4, 3]);
    }

    #[test]
    fn waves_are_contiguous_and_in_order() {
        let items = items(2500);
        let waves = partition(&items, 1200, 500);
        let flat: Vec<&str> = waves
            .iter()
            .flat_map(|w| w.batches.iter())
            .flat_map(|b| b.items.iter())
            .map(|i| i.id.as_str())
            .collect();
        let expected: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(flat, expected);

        let last = &waves[2];
        assert_eq!(last.wave, 3);
        assert_eq!(last.item_count(), 100);
        assert_eq!(last.batches[0].batch_num, 1);
    }

    #[test]
    fn empty_input_no_waves() {
        assert!(partition(&[], 100, 10).is_empty());
    }

    #[test]
    fn batch_names_are_zero_padded() {
        assert_eq!(batch_name("run", 2, 7), "run_wave02_batch007");
    }

    #[test]
    fn payload_lines_match_mapping() {
        let items = items(3);
        let batch = Batch {
            wave: 1,
            batch_num: 1,
            items: &items,
        };
        let (payload, mapping) = build_payload(&batch).unwrap();
        let text = String::from_utf8(payload).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["custom_id"], "request_0");
        assert_eq!(first["title"], "t0");
        assert_eq!(mapping.get("request_2"), Some("id-2"));
        assert_eq!(mapping.len(), 3);
    }
}
