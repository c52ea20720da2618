//! Dedup/advance filter.
//!
//! Given a page and the current stream cursor, decides which records are new
//! and computes the next cursor. IDs are accumulated per distinct timestamp,
//! so pages need not be sorted: a later record with an earlier (but still
//! maximal) timestamp never evicts IDs from the tie set.

use crate::cursor::StreamCursor;
use crate::record::Record;
use crate::timestamp::Timestamp;
use std::collections::{BTreeMap, BTreeSet};

/// Result of filtering one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    /// Records not emitted in any earlier cycle, in emission order.
    pub new_records: Vec<Record>,
    /// Cursor covering everything emitted so far.
    pub cursor: StreamCursor,
}

/// Filters `page` against `cursor`, emitting records in page order.
pub fn advance(cursor: &StreamCursor, page: Vec<Record>) -> Advance {
    advance_inner(cursor, page, usize::MAX)
}

/// Like [`advance`], but emits at most `limit` new records.
///
/// The page is stably sorted by timestamp first so the emitted records form a
/// time-ordered prefix; the cursor then only covers what was emitted. Records
/// left behind at the last emitted timestamp are picked up next cycle through
/// the tie set.
pub fn advance_with_limit(cursor: &StreamCursor, mut page: Vec<Record>, limit: usize) -> Advance {
    page.sort_by_key(|r| r.timestamp);
    advance_inner(cursor, page, limit)
}

/// Moves the cursor over records that were dropped as malformed but still
/// carried a usable time.
///
/// A dropped record newer than the cursor marks its second as read, so a page
/// of bad records does not pin the watermark. Nothing moves when `advance`
/// stopped at its limit: dropped records past the cut were never reached.
pub fn pass_dropped(advance: Advance, dropped: &[Timestamp], limit: usize) -> Advance {
    if advance.new_records.len() >= limit {
        return advance;
    }
    match dropped.iter().max() {
        Some(&latest) if latest > advance.cursor.watermark => Advance {
            new_records: advance.new_records,
            cursor: StreamCursor::new(latest, BTreeSet::new()),
        },
        _ => advance,
    }
}

fn advance_inner(cursor: &StreamCursor, page: Vec<Record>, limit: usize) -> Advance {
    let mut buckets: BTreeMap<Timestamp, BTreeSet<String>> = BTreeMap::new();
    let mut new_records = Vec::new();

    for record in page {
        if new_records.len() >= limit {
            break;
        }
        if cursor.has_emitted(record.timestamp, &record.id) {
            continue;
        }
        // Duplicate inside the same page.
        if !buckets
            .entry(record.timestamp)
            .or_default()
            .insert(record.id.clone())
        {
            continue;
        }
        new_records.push(record);
    }

    let cursor = match buckets.pop_last() {
        None => cursor.clone(),
        Some((watermark, mut ids)) if watermark == cursor.watermark => {
            ids.extend(cursor.seen_ids_at_watermark.iter().cloned());
            StreamCursor::new(watermark, ids)
        }
        Some((watermark, ids)) => StreamCursor::new(watermark, ids),
    };

    Advance {
        new_records,
        cursor,
    }
}
