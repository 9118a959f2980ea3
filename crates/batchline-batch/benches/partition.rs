use batchline_batch::{Batch, build_payload, partition};
use batchline_core::WorkItem;

fn synthetic_items(n: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| {
            WorkItem::new(
                format!("item-{i}"),
                format!("Headline number {i}"),
                "Markets rallied after the central bank held rates steady. ".repeat(40),
            )
        })
        .collect()
}

#[divan::bench(args = [10_000, 100_000])]
fn partition_waves(bencher: divan::Bencher, n: usize) {
    let items = synthetic_items(n);
    bencher.bench(|| partition(divan::black_box(&items), 3214, 1000).len());
}

#[divan::bench]
fn encode_full_batch(bencher: divan::Bencher) {
    let items = synthetic_items(1000);
    let batch = Batch {
        wave: 1,
        batch_num: 1,
        items: &items,
    };
    bencher.bench(|| build_payload(divan::black_box(&batch)).unwrap());
}

fn main() {
    divan::main();
}
