use std::collections::HashMap;

use crate::model::TextCell;

#[allow(clippy::cast_precision_loss)]
fn column(index: usize) -> f32 {
    index as f32
}

/// Splits one line of plain page text into cells positioned by character
/// column.
///
/// Tabs and runs of two or more spaces separate cells; a single space stays
/// inside the cell, which keeps values like `01.06.2024 14:05` whole. Leading
/// whitespace counts towards the position, so a cell keeps the column it was
/// printed under even when the cells before it are blank.
pub(crate) fn split_line_into_cells(line: &str) -> Vec<TextCell> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut end = 0;
    let mut whitespace_run = 0_usize;

    let mut flush = |current: &mut String, start: usize, end: usize| {
        if !current.is_empty() {
            cells.push(TextCell::new(std::mem::take(current), column(start), column(end)));
        }
    };

    for (index, ch) in line.trim_end().chars().enumerate() {
        if ch == '\t' {
            flush(&mut current, start, end);
            whitespace_run = 0;
            continue;
        }

        if ch.is_whitespace() {
            whitespace_run += 1;
            if whitespace_run == 2 {
                flush(&mut current, start, end);
            }
            continue;
        }

        if current.is_empty() {
            start = index;
        } else if whitespace_run == 1 {
            current.push(' ');
        }
        whitespace_run = 0;
        current.push(ch);
        end = index + 1;
    }

    flush(&mut current, start, end);
    cells
}

/// Horizontal band owned by each header column: from halfway to the previous
/// header to halfway to the next one, open-ended at both sides.
fn column_bands(headers: &[TextCell]) -> Vec<(f32, f32)> {
    let boundaries = headers
        .windows(2)
        .map(|pair| (pair[0].end + pair[1].start) / 2.0)
        .collect::<Vec<_>>();
    (0..headers.len())
        .map(|index| {
            let low = if index == 0 {
                f32::NEG_INFINITY
            } else {
                boundaries[index - 1]
            };
            let high = boundaries.get(index).copied().unwrap_or(f32::INFINITY);
            (low, high)
        })
        .collect()
}

fn overlap(cell: &TextCell, (low, high): (f32, f32)) -> f32 {
    // Zero-width cells still belong to the band they sit in.
    let end = cell.end.max(cell.start + f32::EPSILON);
    (end.min(high) - cell.start.max(low)).max(0.0)
}

/// Places the cells of one data row under the header columns they overlap
/// most. Columns no cell lands in stay `None`.
///
/// Returns the fitted row and whether two or more cells shared a column; such
/// cells are joined with a space in left-to-right order.
pub(crate) fn assign_to_columns(
    headers: &[TextCell],
    row: &[TextCell],
) -> (Vec<Option<String>>, bool) {
    let bands = column_bands(headers);
    let mut fitted: Vec<Option<String>> = vec![None; headers.len()];
    let mut shared = false;

    for cell in row {
        let Some(target) = bands
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| overlap(cell, **a).total_cmp(&overlap(cell, **b)))
            .map(|(index, _)| index)
        else {
            continue;
        };

        match &mut fitted[target] {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(&cell.text);
                shared = true;
            }
            slot @ None => *slot = Some(cell.text.clone()),
        }
    }

    (fitted, shared)
}

pub(crate) fn modal_width<T>(rows: &[Vec<T>]) -> usize {
    let mut freq = HashMap::new();
    for width in rows.iter().map(Vec::len) {
        *freq.entry(width).or_insert(0_usize) += 1;
    }

    freq.into_iter()
        .max_by_key(|(width, count)| (*count, *width))
        .map_or(0, |(width, _)| width)
}
