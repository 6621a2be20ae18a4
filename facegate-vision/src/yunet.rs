//! YuNet post-processing.
//!
//! YuNet is anchor-free. For each stride (8, 16, 32) the model emits one row
//! per grid cell in four tensors, grouped by kind in this order:
//! `cls_8 cls_16 cls_32 obj_8 obj_16 obj_32 bbox_8 bbox_16 bbox_32 kps_8 kps_16 kps_32`
//! with shapes `[1, N, 1]`, `[1, N, 1]`, `[1, N, 4]` and `[1, N, 10]`.
//!
//! The cell at row `i`, column `j` decodes linearly:
//! `cx = (j + dx) * stride`, `cy = (i + dy) * stride`, `w = dw * stride`,
//! `h = dh * stride`, all divided by the input size.

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in coordinates normalised to the square model input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Head outputs of one stride, one row per grid cell.
#[derive(Debug, Clone)]
pub struct StrideHead {
    pub stride: usize,
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn tensor(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    kind: &str,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing {kind} output at index {index}");
    };
    let expected = [1, cells as i64, width as i64];
    if *shape != expected.as_slice() {
        bail!("unexpected {kind} shape at index {index}: {shape:?}, expected {expected:?}");
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Group the twelve raw outputs into per-stride heads. Scores are the
/// sigmoid of `cls * obj`.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideHead>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(k, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            let cls = tensor(outputs, k, cells, 1, "cls")?;
            let obj = tensor(outputs, k + 3, cells, 1, "obj")?;
            let mut scores = cls * obj;
            scores.mapv_inplace(sigmoid);
            Ok(StrideHead {
                stride,
                scores,
                boxes: tensor(outputs, k + 6, cells, 4, "bbox")?,
                landmarks: tensor(outputs, k + 9, cells, 10, "kps")?,
            })
        })
        .collect()
}

/// Decode every cell scoring at least `score_threshold`.
pub fn decode(
    heads: &[StrideHead],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut detections = Vec::new();

    for head in heads {
        let side = input_size / head.stride;
        if head.scores.nrows() != side * side {
            bail!(
                "stride {} expects a {side}x{side} grid, got {} cells",
                head.stride,
                head.scores.nrows()
            );
        }
        let stride = head.stride as f32;
        let project = |cell: usize, delta: f32| (cell as f32 + delta) * stride / size;

        for (idx, &score) in head.scores.column(0).iter().enumerate() {
            if score < score_threshold {
                continue;
            }
            let (row, col) = (idx / side, idx % side);
            let b = head.boxes.row(idx);
            let w = b[2] * stride / size;
            let h = b[3] * stride / size;
            let cx = project(col, b[0]);
            let cy = project(row, b[1]);

            let kps = head.landmarks.row(idx);
            let mut landmarks = [0.0f32; 10];
            for (k, pair) in landmarks.chunks_exact_mut(2).enumerate() {
                pair[0] = project(col, kps[k * 2]);
                pair[1] = project(row, kps[k * 2 + 1]);
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}
