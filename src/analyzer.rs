use tracing::debug;

use crate::types::{Mover, PerformanceResult, SheetRow};

/// Pick the largest and smallest 24h change among `rows`.
///
/// Rows without a change value are ignored. Ties go to the row that comes
/// first, so the result is stable for a given sheet. A single usable row is
/// both gainer and loser.
pub fn analyze(rows: &[SheetRow]) -> PerformanceResult {
    let mut usable = rows
        .iter()
        .filter_map(|r| r.change_24h.map(|change| (r.id.as_str(), change)));

    let Some(first) = usable.next() else {
        debug!("No rows with a 24h change among {} rows", rows.len());
        return PerformanceResult::EmptyDataset;
    };

    let (mut gainer, mut loser) = (first, first);
    for candidate in usable {
        if candidate.1 > gainer.1 {
            gainer = candidate;
        }
        if candidate.1 < loser.1 {
            loser = candidate;
        }
    }

    PerformanceResult::Leaders {
        top_gainer: Mover {
            id: gainer.0.to_string(),
            change_24h: gainer.1,
        },
        top_loser: Mover {
            id: loser.0.to_string(),
            change_24h: loser.1,
        },
    }
}
