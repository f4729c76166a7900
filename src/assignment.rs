use munkres::{solve_assignment, WeightMatrix};

use crate::bbox::{BBox, Ltwh};

const PADDING_COST: f64 = 100000.0;

/// Hungarian assignment over an arbitrary `rows x cols` score table.
///
/// `score(r, c)` is maximised. Returned pairs `(row, col, score)` all have
/// `score >= threshold`.
pub fn assign_by<F>(rows: usize, cols: usize, threshold: f64, score: F) -> Vec<(usize, usize, f64)>
where
    F: Fn(usize, usize) -> f64,
{
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let n = rows.max(cols);
    let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
        if r < rows && c < cols {
            1.0 - score(r, c)
        } else {
            PADDING_COST
        }
    });

    match solve_assignment(&mut mat) {
        Ok(inner) => inner
            .into_iter()
            .filter(|p| p.row < rows && p.column < cols)
            .map(|p| (p.row, p.column, score(p.row, p.column)))
            .filter(|&(_, _, s)| s >= threshold)
            .collect(),
        Err(_) => {
            tracing::warn!(rows, cols, "assignment could not be solved");
            Vec::new()
        }
    }
}

/// IoU-maximising assignment between two box sets
pub fn assign_iou(
    rows: &[BBox<Ltwh>],
    cols: &[BBox<Ltwh>],
    threshold: f32,
) -> Vec<(usize, usize, f32)> {
    assign_by(rows.len(), cols.len(), threshold as f64, |r, c| {
        rows[r].iou(&cols[c]) as f64
    })
    .into_iter()
    .map(|(r, c, s)| (r, c, s as f32))
    .collect()
}
