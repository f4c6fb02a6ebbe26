use contracts::{DetectionError, ObjectDetector, POINT_STRIDE};

/// Stand-in detector reporting point count and the axis-aligned bounds of
/// the merged cloud.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryDetector;

impl ObjectDetector for SummaryDetector {
    fn detect(&self, points: &[f32]) -> Result<String, DetectionError> {
        if points.len() % POINT_STRIDE != 0 {
            return Err(DetectionError::new(format!(
                "{} floats is not a whole number of points",
                points.len()
            )));
        }
        let count = points.len() / POINT_STRIDE;
        if count == 0 {
            return Ok("points=0".to_string());
        }

        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for point in points.chunks_exact(POINT_STRIDE) {
            for axis in 0..3 {
                min[axis] = min[axis].min(point[axis]);
                max[axis] = max[axis].max(point[axis]);
            }
        }
        Ok(format!(
            "points={count} x=[{:.2},{:.2}] y=[{:.2},{:.2}] z=[{:.2},{:.2}]",
            min[0], max[0], min[1], max[1], min[2], max[2]
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let points = [1.0, -2.0, 0.5, 0.1, 3.0, 4.0, -1.0, 0.9];
        assert_eq!(
            SummaryDetector.detect(&points).unwrap(),
            "points=2 x=[1.00,3.00] y=[-2.00,4.00] z=[-1.00,0.50]"
        );
        assert_eq!(SummaryDetector.detect(&[]).unwrap(), "points=0");
        assert!(SummaryDetector.detect(&[1.0]).is_err());
    }
}
