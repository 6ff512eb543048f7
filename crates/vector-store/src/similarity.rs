use ndarray::{Array2, ArrayView1};

/// Scale `vec` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Dot product of two unit vectors. Mismatched lengths compare as unrelated.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Similarity of `query` against every row of `matrix`.
#[must_use]
pub fn cosine_similarity_batch(query: &[f32], matrix: &Array2<f32>) -> Vec<f32> {
    if matrix.ncols() != query.len() {
        return vec![0.0; matrix.nrows()];
    }
    matrix.dot(&ArrayView1::from(query)).to_vec()
}

/// Temperature-scaled softmax. Returns an empty vector for empty input.
#[must_use]
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let temperature = if temperature > 0.0 { temperature } else { 1.0 };
    let scaled: Vec<f32> = values.iter().map(|v| v / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scaled.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Normalised mean of a set of vectors, or `None` when `rows` is empty.
#[must_use]
pub fn centroid(rows: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = rows.first()?;
    let mut sum = vec![0.0f32; first.len()];
    for row in rows {
        for (acc, value) in sum.iter_mut().zip(row) {
            *acc += value;
        }
    }
    let count = rows.len() as f32;
    for value in &mut sum {
        *value /= count;
    }
    normalize(&mut sum);
    Some(sum)
}
