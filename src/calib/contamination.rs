//! Flux a neighbor leaks into (or out of) a calibration aperture.

use std::f64::consts::PI;

use crate::domain::{NeighborInfo, Point};

/// Second moments of a neighbor's light profile (pixels²).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondMoments {
    pub mxx: f64,
    pub myy: f64,
    pub mxy: f64,
}

impl SecondMoments {
    /// Round profile of standard deviation `sigma`.
    pub fn round(sigma: f64) -> Self {
        Self {
            mxx: sigma * sigma,
            myy: sigma * sigma,
            mxy: 0.0,
        }
    }

    fn det(&self) -> f64 {
        self.mxx * self.myy - self.mxy * self.mxy
    }
}

/// Fraction of a Gaussian profile beyond `nsigma`.
fn gaussian_tail(nsigma: f64) -> f64 {
    libm::erfc(nsigma / std::f64::consts::SQRT_2) / 2.0
}

/// Same for a Moffat profile with β = 2.5, matched to the Gaussian core.
fn moffat_tail(nsigma: f64) -> f64 {
    let n = nsigma * 0.6547;
    let n2 = n * n;
    (-2.0 * n + (PI - 2.0 * n.atan()) * (1.0 + n2)) / (1.0 + n2) / (2.0 * PI)
}

/// Contamination of an aperture of radius `aperture_radius` by a neighbor
/// at `offset` from the aperture center.
///
/// The neighbor's distance to the aperture edge is expressed in units of its
/// own width, and the fraction beyond the edge is the larger of the Gaussian
/// and Moffat estimates. When the neighbor sits inside the aperture the
/// fraction inside is used instead.
///
/// `None` for degenerate moments.
pub fn neighbor_contamination(
    offset: Point,
    moments: SecondMoments,
    neighbor_flux: f64,
    aperture_radius: f64,
) -> Option<NeighborInfo> {
    let det = moments.det();
    if !(det > 0.0 && det.is_finite()) {
        return None;
    }
    let distance = offset.norm();
    let inside = distance < aperture_radius;
    let to_edge = if distance > 0.0 {
        let scale = ((distance - aperture_radius) / distance).abs();
        Point::new(offset.x * scale, offset.y * scale)
    } else {
        Point::new(aperture_radius, 0.0)
    };

    let q = moments.myy * to_edge.x * to_edge.x - 2.0 * moments.mxy * to_edge.x * to_edge.y
        + moments.mxx * to_edge.y * to_edge.y;
    let nsigma = (q / det).max(0.0).sqrt();

    let (mut gaussian, mut moffat) = (gaussian_tail(nsigma), moffat_tail(nsigma));
    if inside {
        gaussian = 1.0 - gaussian;
        moffat = 1.0 - moffat;
    }
    Some(NeighborInfo {
        distance,
        flux: neighbor_flux,
        contamination: gaussian.max(moffat) * neighbor_flux,
        nsigma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tails_are_half_at_the_edge() {
        assert_relative_eq!(gaussian_tail(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(moffat_tail(0.0), 0.5, epsilon = 1e-9);
        assert!(moffat_tail(4.0) > gaussian_tail(4.0));
    }

    #[test]
    fn neighbor_two_sigma_outside() {
        let info = neighbor_contamination(
            Point::new(17.0, 0.0),
            SecondMoments::round(1.0),
            1000.0,
            15.0,
        )
        .unwrap();
        assert_relative_eq!(info.distance, 17.0);
        assert_relative_eq!(info.nsigma, 2.0, epsilon = 1e-12);
        // Moffat wings dominate: ~5.4% of the neighbor flux.
        assert!(info.contamination > 50.0 && info.contamination < 60.0, "{}", info.contamination);
    }

    #[test]
    fn neighbor_inside_counts_the_enclosed_part() {
        let info = neighbor_contamination(
            Point::new(0.0, 13.0),
            SecondMoments::round(1.0),
            1000.0,
            15.0,
        )
        .unwrap();
        assert_relative_eq!(info.nsigma, 2.0, epsilon = 1e-12);
        assert!(info.contamination > 970.0);

        let center = neighbor_contamination(Point::default(), SecondMoments::round(1.0), 10.0, 15.0)
            .unwrap();
        assert!(center.contamination > 9.9);
    }

    #[test]
    fn degenerate_moments_give_nothing() {
        let flat = SecondMoments {
            mxx: 1.0,
            myy: 1.0,
            mxy: 1.0,
        };
        assert!(neighbor_contamination(Point::new(20.0, 0.0), flat, 1.0, 15.0).is_none());
    }
}
