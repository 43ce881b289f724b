use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// First active booking on the room overlapping `range`, skipping `exclude`.
///
/// Only reserved and checked-in bookings count; completed and cancelled
/// bookings never block. Room status is not consulted.
pub fn first_conflict(rs: &RoomState, range: &DateRange, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(range)
        .filter(|b| b.status.is_active())
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

/// True iff no active booking other than `exclude` overlaps `[range.start, range.end)`.
pub fn is_available(rs: &RoomState, range: &DateRange, exclude: Option<Ulid>) -> bool {
    first_conflict(rs, range, exclude).is_none()
}

/// Free sub-ranges of `window` on this room: the window minus every active booking.
pub fn free_ranges(rs: &RoomState, window: &DateRange) -> Vec<DateRange> {
    let mut busy: Vec<DateRange> = rs
        .overlapping(window)
        .filter(|b| b.status.is_active())
        .map(|b| {
            DateRange::new(
                b.check_in.max(window.start),
                b.check_out.min(window.end),
            )
        })
        .collect();
    busy.sort_by_key(|r| r.start);
    let busy = merge_overlapping(&busy);
    subtract_ranges(&[*window], &busy)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` disjoint.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}
