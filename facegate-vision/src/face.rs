use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet input side.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input side.
pub const ENCODER_INPUT: u32 = 112;

/// Reference eye centres for a 112x112 ArcFace-style crop.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// Detection in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// L2-normalised SFace output.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn into_vec(self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Square canvas placement of a source image: uniform scale plus centring
/// offset.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = side as f32 / width.max(height) as f32;
        let new_w = (width as f32 * scale) as u32;
        let new_h = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: ((side - new_w) / 2) as f32,
            offset_y: ((side - new_h) / 2) as f32,
        }
    }

    fn unproject_x(&self, normalized: f32, side: f32) -> f32 {
        (normalized * side - self.offset_x) / self.scale
    }

    fn unproject_y(&self, normalized: f32, side: f32) -> f32 {
        (normalized * side - self.offset_y) / self.scale
    }
}

/// Planar BGR float tensor data (`[3, H, W]`) with values in `[0, 255]`.
fn bgr_planes(rgb: &RgbImage) -> Vec<f32> {
    let pixels = rgb.as_raw();
    let mut data = Vec::with_capacity(pixels.len());
    for channel in [2usize, 1, 0] {
        data.extend(pixels.chunks_exact(3).map(|px| px[channel] as f32));
    }
    data
}

/// Detect faces with YuNet. Coordinates are returned in source image pixels.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let side = DETECTOR_INPUT;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty image");
    }
    let fit = Letterbox::fit(width, height, side);

    let resized = img.resize_exact(
        (width as f32 * fit.scale) as u32,
        (height as f32 * fit.scale) as u32,
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = DynamicImage::new_rgb8(side, side);
    image::imageops::overlay(&mut canvas, &resized, fit.offset_x as i64, fit.offset_y as i64);

    let input = Array4::from_shape_vec(
        (1, 3, side as usize, side as usize),
        bgr_planes(&canvas.to_rgb8()),
    )?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = raw
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::parse_outputs(&refs, side as usize).context("parsing yunet outputs")?;
    let side_f = side as f32;
    let detections: Vec<Detection> = yunet::decode(&heads, score_threshold, side as usize)?
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for (k, pair) in landmarks.chunks_exact_mut(2).enumerate() {
                pair[0] = fit.unproject_x(d.landmarks[k * 2], side_f);
                pair[1] = fit.unproject_y(d.landmarks[k * 2 + 1], side_f);
            }
            Detection {
                bbox: [
                    fit.unproject_x(d.bbox[0], side_f),
                    fit.unproject_y(d.bbox[1], side_f),
                    d.bbox[2] * side_f / fit.scale,
                    d.bbox[3] * side_f / fit.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Rotate, scale and crop so the eyes land on the reference positions of a
/// `size`x`size` crop. Pixels falling outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);
    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }

    let unit = size as f32 / ENCODER_INPUT as f32;
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);

    // forward map: out = [a b; c d] * src + t
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let (c, d) = (-b, a);
    let centre = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let target = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );
    let tx = target.0 - (a * centre.0 + b * centre.1);
    let ty = target.1 - (c * centre.0 + d * centre.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, px) in output.enumerate_pixels_mut() {
        let (ox, oy) = (out_x as f32 - tx, out_y as f32 - ty);
        let sx = (d * ox - b * oy) / det;
        let sy = (-c * ox + a * oy) / det;
        if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
            continue;
        }

        // bilinear
        let (x0, y0) = (sx.floor() as u32, sy.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
        let taps = [
            (src.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (src.get_pixel(x1, y0), fx * (1.0 - fy)),
            (src.get_pixel(x0, y1), (1.0 - fx) * fy),
            (src.get_pixel(x1, y1), fx * fy),
        ];
        for ch in 0..3 {
            let v: f32 = taps.iter().map(|(p, wt)| p[ch] as f32 * wt).sum();
            px[ch] = v as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned crop with SFace and L2-normalise the result.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let side = ENCODER_INPUT;
    let crop = face_img
        .resize_exact(side, side, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let input = Array4::from_shape_vec((1, 3, side as usize, side as usize), bgr_planes(&crop))?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // [1, 128] for the 2021dec export
    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    l2_normalize(Array1::from_vec(data[..len].to_vec()))
}

/// A zero or non-finite encoder output has no direction to compare.
fn l2_normalize(mut vector: Array1<f32>) -> Result<Embedding> {
    let norm = vector.dot(&vector).sqrt();
    if !norm.is_finite() || norm <= 0.0 {
        anyhow::bail!("encoder produced an unusable embedding (norm {norm})");
    }
    vector /= norm;
    Ok(Embedding { vector })
}
