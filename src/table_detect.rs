use tracing::debug;

use crate::model::{DetectedTable, PageText, TextCell};
use crate::table_parse::modal_width;

pub(crate) const LOW_CONFIDENCE_THRESHOLD: f32 = 0.60;

#[allow(clippy::cast_precision_loss)]
fn table_confidence(rows: &[Vec<TextCell>]) -> f32 {
    if rows.len() < 2 {
        return 0.0;
    }

    let modal = modal_width(rows);
    if modal == 0 {
        return 0.0;
    }

    let consistent =
        rows.iter().filter(|row| row.len() == modal).count() as f32 / rows.len() as f32;
    let max_width = rows.iter().map(Vec::len).max().unwrap_or(modal);
    let min_width = rows.iter().map(Vec::len).min().unwrap_or(modal);
    let uniformity = if max_width == 0 {
        0.0
    } else {
        1.0 - ((max_width - min_width) as f32 / max_width as f32)
    };

    (consistent * 0.75 + uniformity * 0.25).clamp(0.0, 1.0)
}

/// Collects every run of consecutive multi-cell lines on a page.
fn candidate_tables(page: &PageText, min_cols: usize) -> Vec<DetectedTable> {
    let mut tables = Vec::new();
    let mut current_rows: Vec<Vec<TextCell>> = Vec::new();

    let flush_current = |rows: &mut Vec<Vec<TextCell>>, tables: &mut Vec<DetectedTable>| {
        if rows.len() >= 2 {
            let confidence = table_confidence(rows);
            tables.push(DetectedTable {
                page: page.page_number,
                rows: std::mem::take(rows),
                confidence,
            });
        } else {
            rows.clear();
        }
    };

    for cells in &page.lines {
        if cells.len() >= min_cols {
            current_rows.push(cells.clone());
        } else {
            flush_current(&mut current_rows, &mut tables);
        }
    }

    flush_current(&mut current_rows, &mut tables);
    tables
}

/// Locates the single table of a page: the candidate with the most rows,
/// then the highest confidence, then the earliest on the page.
pub(crate) fn detect_page_table(page: &PageText, min_cols: usize) -> Option<DetectedTable> {
    let candidates = candidate_tables(page, min_cols.max(2));
    debug!(
        page = page.page_number,
        candidates = candidates.len(),
        "table candidates detected"
    );

    let mut best: Option<DetectedTable> = None;
    for candidate in candidates {
        let better = best.as_ref().is_none_or(|current| {
            candidate.rows.len() > current.rows.len()
                || (candidate.rows.len() == current.rows.len()
                    && candidate.confidence > current.confidence)
        });
        if better {
            best = Some(candidate);
        }
    }
    best
}
