//! Read-path dispatch: Get, GetNext, and GetBulk against region snapshots.

use std::sync::Arc;

use crate::error::ResponseError;
use crate::oid::Oid;
use crate::pdu::{GetBulkPayload, ResponsePayload};
use crate::snapshot::Snapshot;
use crate::value::Value;
use crate::varbind::{SearchRange, VarBind};

/// One region's contribution to a single request: its subtree root and the
/// snapshot that was current when the request arrived.
///
/// The view pins the snapshot `Arc` for the whole request, so a concurrent
/// updater publish cannot produce a mixed read.
pub(crate) struct RegionView {
    pub subtree: Oid,
    pub snapshot: Arc<Snapshot>,
}

/// Handle a Get PDU: exact lookup per range start.
pub(crate) fn get(views: &[RegionView], ranges: &[SearchRange]) -> ResponsePayload {
    let varbinds = ranges
        .iter()
        .map(|range| VarBind::new(range.start.clone(), lookup_exact(views, &range.start)))
        .collect();
    finalize(varbinds)
}

/// Handle a GetNext PDU: one successor per range.
pub(crate) fn get_next(views: &[RegionView], ranges: &[SearchRange]) -> ResponsePayload {
    let varbinds = ranges
        .iter()
        .map(|range| match next_in_range(views, range) {
            Some((name, value)) => VarBind::new(name, value),
            None => VarBind::new(range.start.clone(), Value::EndOfMibView),
        })
        .collect();
    finalize(varbinds)
}

/// Handle a GetBulk PDU.
///
/// The first `non_repeaters` ranges answer once, like GetNext. The rest
/// repeat up to `max_repetitions` times, each with its own cursor, emitted
/// round-major: range 1 rep 1, range 2 rep 1, ... range 1 rep 2, and so on.
/// A range that reaches the end of the view reports EndOfMibView once and
/// sits out the remaining rounds; the others continue.
pub(crate) fn get_bulk(views: &[RegionView], bulk: &GetBulkPayload) -> ResponsePayload {
    let split = (bulk.non_repeaters as usize).min(bulk.ranges.len());
    let (singles, repeaters) = bulk.ranges.split_at(split);

    let mut varbinds: Vec<VarBind> = singles
        .iter()
        .map(|range| match next_in_range(views, range) {
            Some((name, value)) => VarBind::new(name, value),
            None => VarBind::new(range.start.clone(), Value::EndOfMibView),
        })
        .collect();

    struct Cursor {
        start: Oid,
        include: bool,
        done: bool,
    }
    let mut cursors: Vec<Cursor> = repeaters
        .iter()
        .map(|range| Cursor {
            start: range.start.clone(),
            include: range.include,
            done: false,
        })
        .collect();

    for _ in 0..bulk.max_repetitions {
        let mut live = false;
        for (cursor, range) in cursors.iter_mut().zip(repeaters) {
            if cursor.done {
                continue;
            }
            let step = SearchRange::new(cursor.start.clone(), cursor.include, range.end.clone());
            match next_in_range(views, &step) {
                Some((name, value)) => {
                    cursor.start = name.clone();
                    cursor.include = false;
                    varbinds.push(VarBind::new(name, value));
                    live = true;
                }
                None => {
                    cursor.done = true;
                    varbinds.push(VarBind::new(cursor.start.clone(), Value::EndOfMibView));
                }
            }
        }
        if !live {
            break;
        }
    }

    finalize(varbinds)
}

fn lookup_exact(views: &[RegionView], name: &Oid) -> Value {
    match views.iter().find(|v| v.subtree.is_prefix_of(name)) {
        // Outside every registered region.
        None => Value::NoSuchObject,
        // Inside a region: either a bound leaf or a hole.
        Some(view) => view
            .snapshot
            .get(name)
            .cloned()
            .unwrap_or(Value::NoSuchInstance),
    }
}

// Smallest bound (name, value) within the range, across all regions.
//
// Views are ordered by subtree and subtrees are disjoint, so every name in
// an earlier view sorts before every name in a later one; the first hit is
// the global minimum.
fn next_in_range(views: &[RegionView], range: &SearchRange) -> Option<(Oid, Value)> {
    // A collapsed range degenerates to an exact probe honoring the
    // include flag.
    if !range.end.is_empty() && range.start == range.end {
        if !range.include {
            return None;
        }
        return views
            .iter()
            .find(|v| v.subtree.is_prefix_of(&range.start))
            .and_then(|v| v.snapshot.get(&range.start))
            .map(|value| (range.start.clone(), value.clone()));
    }

    for view in views {
        if let Some((name, value)) = view.snapshot.successor(&range.start, range.include) {
            if !range.end.is_empty() && name >= range.end {
                return None;
            }
            return Some((name, value.clone()));
        }
    }
    None
}

// Success unless some value cannot be framed; then genErr with the 1-based
// offender index and every value blanked to Null.
pub(crate) fn finalize(varbinds: Vec<VarBind>) -> ResponsePayload {
    for (i, vb) in varbinds.iter().enumerate() {
        if vb.value.validate().is_err() {
            let nulls = varbinds
                .iter()
                .map(|vb| VarBind::null(vb.name.clone()))
                .collect();
            return ResponsePayload::error(ResponseError::GenErr, (i + 1) as u16, nulls);
        }
    }
    ResponsePayload::success(varbinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::snapshot::SnapshotBuilder;
    use bytes::Bytes;

    fn view(root: Oid, entries: &[(Oid, Value)]) -> RegionView {
        let mut builder = SnapshotBuilder::new(root.clone());
        for (suffix, value) in entries {
            builder.set(suffix.clone(), value.clone()).unwrap();
        }
        RegionView {
            subtree: root,
            snapshot: Arc::new(builder.finish()),
        }
    }

    fn sample_views() -> Vec<RegionView> {
        vec![view(
            oid!(1, 3, 6, 1, 4, 1, 12345),
            &[
                (oid!(1, 0), Value::Integer(42)),
                (
                    oid!(2, 0),
                    Value::OctetString(Bytes::from_static(b"hello")),
                ),
            ],
        )]
    }

    #[test]
    fn test_get_hit_and_misses() {
        let views = sample_views();
        let response = get(
            &views,
            &[
                SearchRange::exact(oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0)),
                SearchRange::exact(oid!(1, 3, 6, 1, 4, 1, 12345, 9, 0)),
                SearchRange::exact(oid!(1, 3, 6, 1, 4, 1, 99999)),
                // Interior (non-leaf) name inside the region.
                SearchRange::exact(oid!(1, 3, 6, 1, 4, 1, 12345, 1)),
            ],
        );

        assert!(response.error.is_ok());
        assert_eq!(response.varbinds[0].value, Value::Integer(42));
        assert_eq!(response.varbinds[1].value, Value::NoSuchInstance);
        assert_eq!(response.varbinds[2].value, Value::NoSuchObject);
        assert_eq!(response.varbinds[3].value, Value::NoSuchInstance);
    }

    #[test]
    fn test_get_next_walks_to_second_binding() {
        let views = sample_views();
        let response = get_next(
            &views,
            &[SearchRange::new(
                oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0),
                false,
                Oid::empty(),
            )],
        );

        assert_eq!(response.varbinds.len(), 1);
        assert_eq!(response.varbinds[0].name, oid!(1, 3, 6, 1, 4, 1, 12345, 2, 0));
        assert_eq!(
            response.varbinds[0].value,
            Value::OctetString(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn test_get_next_exhaustion_and_bounds() {
        let views = sample_views();

        let past_all = get_next(
            &views,
            &[SearchRange::new(
                oid!(1, 3, 6, 1, 4, 1, 12345, 2, 0),
                false,
                Oid::empty(),
            )],
        );
        assert_eq!(past_all.varbinds[0].value, Value::EndOfMibView);
        assert_eq!(past_all.varbinds[0].name, oid!(1, 3, 6, 1, 4, 1, 12345, 2, 0));

        // An end bound below the next binding also exhausts the range.
        let bounded = get_next(
            &views,
            &[SearchRange::new(
                oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0),
                false,
                oid!(1, 3, 6, 1, 4, 1, 12345, 2),
            )],
        );
        assert_eq!(bounded.varbinds[0].value, Value::EndOfMibView);
    }

    #[test]
    fn test_get_next_collapsed_range_is_exact_probe() {
        let views = sample_views();
        let name = oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0);

        let hit = get_next(
            &views,
            &[SearchRange::new(name.clone(), true, name.clone())],
        );
        assert_eq!(hit.varbinds[0].value, Value::Integer(42));

        let miss = get_next(
            &views,
            &[SearchRange::new(name.clone(), false, name.clone())],
        );
        assert_eq!(miss.varbinds[0].value, Value::EndOfMibView);
    }

    #[test]
    fn test_get_next_spans_regions() {
        let views = vec![
            view(oid!(1, 3, 6, 1, 4, 1, 100), &[(oid!(1), Value::Integer(1))]),
            view(oid!(1, 3, 6, 1, 4, 1, 200), &[(oid!(1), Value::Integer(2))]),
        ];
        let response = get_next(
            &views,
            &[SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 100, 1), false, Oid::empty())],
        );
        assert_eq!(response.varbinds[0].name, oid!(1, 3, 6, 1, 4, 1, 200, 1));
    }

    #[test]
    fn test_get_bulk_repetitions_hit_end_of_view() {
        let views = sample_views();
        let response = get_bulk(
            &views,
            &GetBulkPayload {
                non_repeaters: 0,
                max_repetitions: 3,
                ranges: vec![SearchRange::new(
                    oid!(1, 3, 6, 1, 4, 1, 12345, 0),
                    false,
                    Oid::empty(),
                )],
            },
        );

        // Two bindings, then EndOfMibView on the third repetition.
        assert_eq!(response.varbinds.len(), 3);
        assert_eq!(response.varbinds[0].value, Value::Integer(42));
        assert_eq!(
            response.varbinds[1].value,
            Value::OctetString(Bytes::from_static(b"hello"))
        );
        assert_eq!(response.varbinds[2].value, Value::EndOfMibView);
    }

    #[test]
    fn test_get_bulk_round_major_interleave() {
        let views = vec![view(
            oid!(1, 3, 6, 1, 4, 1, 7),
            &[
                (oid!(1, 1), Value::Integer(11)),
                (oid!(1, 2), Value::Integer(12)),
                (oid!(2, 1), Value::Integer(21)),
                (oid!(2, 2), Value::Integer(22)),
            ],
        )];
        let response = get_bulk(
            &views,
            &GetBulkPayload {
                non_repeaters: 0,
                max_repetitions: 2,
                ranges: vec![
                    SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 7, 1), false, oid!(1, 3, 6, 1, 4, 1, 7, 2)),
                    SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 7, 2), false, Oid::empty()),
                ],
            },
        );

        let values: Vec<_> = response.varbinds.iter().map(|vb| vb.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                Value::Integer(11),
                Value::Integer(21),
                Value::Integer(12),
                Value::Integer(22),
            ]
        );
    }

    #[test]
    fn test_get_bulk_non_repeaters_and_dead_range() {
        let views = sample_views();
        let response = get_bulk(
            &views,
            &GetBulkPayload {
                non_repeaters: 1,
                max_repetitions: 2,
                ranges: vec![
                    SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 12345), false, Oid::empty()),
                    // Already past the region: dies on round one.
                    SearchRange::new(oid!(1, 3, 6, 1, 4, 1, 12345, 9), false, Oid::empty()),
                ],
            },
        );

        assert_eq!(response.varbinds.len(), 2);
        assert_eq!(response.varbinds[0].value, Value::Integer(42));
        assert_eq!(response.varbinds[1].value, Value::EndOfMibView);
    }

    #[test]
    fn test_get_bulk_zero_repetitions() {
        let views = sample_views();
        let response = get_bulk(
            &views,
            &GetBulkPayload {
                non_repeaters: 0,
                max_repetitions: 0,
                ranges: vec![SearchRange::new(oid!(1, 3, 6), false, Oid::empty())],
            },
        );
        assert!(response.varbinds.is_empty());
        assert!(response.error.is_ok());
    }

    #[test]
    fn test_finalize_blanks_unframeable_values() {
        let varbinds = vec![
            VarBind::new(oid!(1, 1), Value::Integer(1)),
            VarBind::new(
                oid!(1, 2),
                Value::OctetString(Bytes::from(vec![0u8; 70000])),
            ),
        ];
        let response = finalize(varbinds);
        assert_eq!(response.error, ResponseError::GenErr);
        assert_eq!(response.index, 2);
        assert!(response.varbinds.iter().all(|vb| vb.value == Value::Null));
        assert_eq!(response.varbinds[0].name, oid!(1, 1));
    }
}
