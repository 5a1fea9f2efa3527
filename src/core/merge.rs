// DbgMux - core/merge.rs
//
// Ordered merge of per-source line batches into the aggregate stream.
//
// The aggregate is kept sorted by (time, source id) as long as every batch
// is time-ordered. A batch that is not (clock adjustments, reordered
// datagrams) is merged in arrival order: a source's lines are never reordered
// relative to each other, since they may still be raw fragments awaiting
// newline reassembly. The disorder then shows up in the aggregate as is.

use crate::core::model::Line;
use std::cmp::Ordering;

fn compare(a: &Line, b: &Line) -> Ordering {
    a.time
        .total_cmp(&b.time)
        .then_with(|| a.source.cmp(&b.source))
}

/// Merge `batch` into the sorted `aggregate`, keeping it sorted.
///
/// Stable: on equal keys, lines already in the aggregate stay first. Lines
/// within the batch always keep their relative order.
pub fn merge_sorted(aggregate: &mut Vec<Line>, mut batch: Vec<Line>) {
    if batch.is_empty() {
        return;
    }
    if !batch.windows(2).all(|w| compare(&w[0], &w[1]) != Ordering::Greater) {
        tracing::debug!(lines = batch.len(), "Merge: out-of-order batch, keeping arrival order");
    }

    // Fast path: the batch starts at or after the aggregate's tail.
    let appendable = aggregate
        .last()
        .map_or(true, |last| compare(last, &batch[0]) != Ordering::Greater);
    if appendable {
        aggregate.append(&mut batch);
        return;
    }

    let existing = std::mem::take(aggregate);
    aggregate.reserve(existing.len() + batch.len());
    let mut left = existing.into_iter().peekable();
    let mut right = batch.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(l, r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        if let Some(line) = next {
            aggregate.push(line);
        }
    }
}
