use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl BoundingBox {
    /// Smallest box holding every point, grown by `margin_m` metres on each
    /// side. `None` for an empty slice.
    pub fn around(points: &[LatLng], margin_m: f64) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self {
            top: first.lat,
            bottom: first.lat,
            left: first.lng,
            right: first.lng,
        };

        for point in &points[1..] {
            bounds.top = bounds.top.max(point.lat);
            bounds.bottom = bounds.bottom.min(point.lat);
            bounds.left = bounds.left.min(point.lng);
            bounds.right = bounds.right.max(point.lng);
        }

        if margin_m > 0.0 {
            let delta_lat = margin_m / 1000.0 / KM_PER_DEGREE_LAT;
            let mid_lat = ((bounds.top + bounds.bottom) / 2.0).to_radians();
            // Longitude degrees shrink toward the poles
            let delta_lng = delta_lat / mid_lat.cos().max(f64::EPSILON);

            bounds.top = (bounds.top + delta_lat).min(90.0);
            bounds.bottom = (bounds.bottom - delta_lat).max(-90.0);
            bounds.left -= delta_lng;
            bounds.right += delta_lng;
        }

        Some(bounds)
    }

    /// Corners as top-left, top-right, bottom-left, bottom-right.
    pub fn corners(&self) -> [LatLng; 4] {
        [
            LatLng::new(self.top, self.left),
            LatLng::new(self.top, self.right),
            LatLng::new(self.bottom, self.left),
            LatLng::new(self.bottom, self.right),
        ]
    }

    pub fn contains(&self, point: &LatLng) -> bool {
        (self.bottom..=self.top).contains(&point.lat) && (self.left..=self.right).contains(&point.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_box() {
        let bounds = BoundingBox::around(&[LatLng::new(1.0, 2.0)], 0.0).unwrap();
        assert_eq!(bounds.corners(), [LatLng::new(1.0, 2.0); 4]);
    }

    #[test]
    fn test_margin_grows_box() {
        let point = LatLng::new(10.0, 20.0);
        let bounds = BoundingBox::around(&[point], 500.0).unwrap();

        assert!(bounds.top > point.lat && bounds.bottom < point.lat);
        assert!(bounds.left < point.lng && bounds.right > point.lng);
        // 500 m either side of the point, within rounding
        let height = LatLng::new(bounds.bottom, point.lng).distance_to(&LatLng::new(bounds.top, point.lng));
        assert!((height - 1000.0).abs() < 5.0, "height was {height}");
    }

    #[test]
    fn test_empty_points() {
        assert!(BoundingBox::around(&[], 10.0).is_none());
    }

    #[test]
    fn test_distance_one_degree_lat() {
        let d = LatLng::new(0.0, 0.0).distance_to(&LatLng::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0);
    }
}
