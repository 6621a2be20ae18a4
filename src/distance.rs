use crate::error::{FaceError, Result};

/// `1 - cos(a, b)`. Lower is more similar; identical directions give 0 and
/// orthogonal vectors give exactly 1.
///
/// Fails on length mismatch, a NaN or infinite component, or a zero-norm
/// operand instead of producing NaN.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(FaceError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        if !x.is_finite() || !y.is_finite() {
            return Err(FaceError::NonFinite);
        }
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(FaceError::ZeroNorm);
    }

    let distance = (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())) as f32;
    if !distance.is_finite() {
        return Err(FaceError::NonFinite);
    }
    Ok(distance)
}

/// A vector cosine distance is defined for: non-empty, finite, non-zero.
pub fn check_embedding(v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(FaceError::InvalidInput("empty embedding vector".to_string()));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(FaceError::NonFinite);
    }
    if v.iter().all(|&x| x == 0.0) {
        return Err(FaceError::ZeroNorm);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = [0.3, -1.2, 4.0, 0.01];
        assert!(cosine_distance(&v, &v).unwrap().abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 3.0]).unwrap(), 1.0);
        assert_eq!(cosine_distance(&[1.0, 1.0, 0.0], &[1.0, -1.0, 5.0]).unwrap(), 1.0);
    }

    #[test]
    fn opposite_vectors_have_distance_two() {
        let d = cosine_distance(&[1.0, 2.0], &[-1.0, -2.0]).unwrap();
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs: [(&[f32], &[f32]); 3] = [
            (&[0.1, 0.2, 0.3], &[0.3, 0.2, 0.1]),
            (&[1.0, -4.0], &[2.5, 0.5]),
            (&[7.0, 0.0, 0.0, 1.0], &[0.5, 0.5, 0.5, 0.5]),
        ];
        for (a, b) in pairs {
            assert_eq!(cosine_distance(a, b).unwrap(), cosine_distance(b, a).unwrap());
        }
    }

    #[test]
    fn scale_does_not_matter() {
        let d = cosine_distance(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn length_mismatch_fails() {
        let err = cosine_distance(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            FaceError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn zero_norm_fails() {
        assert!(matches!(
            cosine_distance(&[0.0, 0.0], &[1.0, 0.0]),
            Err(FaceError::ZeroNorm)
        ));
        assert!(matches!(cosine_distance(&[], &[]), Err(FaceError::ZeroNorm)));
    }

    #[test]
    fn non_finite_components_fail() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(matches!(
                cosine_distance(&[bad, 1.0], &[1.0, 0.0]),
                Err(FaceError::NonFinite)
            ));
            assert!(matches!(
                cosine_distance(&[1.0, 0.0], &[1.0, bad]),
                Err(FaceError::NonFinite)
            ));
        }
    }

    #[test]
    fn check_embedding_rejects_unusable_vectors() {
        assert!(check_embedding(&[0.5, -0.5]).is_ok());
        assert!(matches!(check_embedding(&[]), Err(FaceError::InvalidInput(_))));
        assert!(matches!(check_embedding(&[0.0, 0.0]), Err(FaceError::ZeroNorm)));
        assert!(matches!(
            check_embedding(&[1.0, f32::NAN]),
            Err(FaceError::NonFinite)
        ));
    }
}
