//! The `calibration.list` table: one row per (star, exposure).

use log::warn;

use crate::error::AppError;
use crate::io::{DictTable, measurement_fields};
use crate::lc::LightCurve;

pub const CALIBRATION_COLUMNS: [&str; 28] = [
    "x", "y", "flux", "error", "sky", "skyerror", "xerror", "yerror", "name", "mjd", "seeing",
    "exptime", "phratio", "mag", "mage", "ra", "dec", "ix", "iy", "img", "star", "chi2pdf", "satur",
    "nsatur", "neid", "neif", "neic", "neins",
];

const DESCRIPTIONS: [(&str, &str); 11] = [
    ("ra", "initial"),
    ("dec", "initial"),
    ("ix", "initial x"),
    ("iy", "initial y"),
    ("img", "image number"),
    ("star", "star number in the catalog"),
    ("chi2pdf", "chi2 pdf of total PSF photometry"),
    ("satur", "1 if some pixels are saturated"),
    ("nsatur", "number of saturated pixels"),
    ("neid", "distance to nearest neighbor"),
    ("neic", "flux contamination due to nearest neighbor"),
];

/// Calibration table of the fitted curves.
///
/// Curves of objects without catalog information are skipped.
pub fn calibration_table<'a>(
    catalog_name: &str,
    band: &str,
    n_images: usize,
    curves: impl IntoIterator<Item = &'a LightCurve>,
) -> Result<DictTable, AppError> {
    let mut table = DictTable::new(&CALIBRATION_COLUMNS);
    for (column, description) in DESCRIPTIONS {
        table.describe(column, description);
    }
    table.set_global("CALIBCATALOG", catalog_name);

    let mut n_stars = 0usize;
    for lc in curves {
        let Some(info) = lc.object().kind.catalog() else {
            continue;
        };
        n_stars += 1;
        let magnitude = info.magnitude(band);
        let chi2pdf = lc.chi2ndf().to_string();
        for (img, f) in lc.fiducials().iter().enumerate() {
            let mut row = measurement_fields(f);
            row.extend([
                magnitude.mag.to_string(),
                magnitude.error.to_string(),
                info.ra.to_string(),
                info.dec.to_string(),
                info.x.to_string(),
                info.y.to_string(),
                (img + 1).to_string(),
                info.id.to_string(),
                chi2pdf.clone(),
                u8::from(f.has_saturated_pixels).to_string(),
                f.n_saturated_pixels.to_string(),
                info.neighbor.distance.to_string(),
                info.neighbor.flux.to_string(),
                info.neighbor.contamination.to_string(),
                info.neighbor.nsigma.to_string(),
            ]);
            table.push_row(row)?;
        }
    }
    table.set_global("NSTARS", n_stars);
    table.set_global("NIMAGES", n_images);
    if n_stars == 0 {
        warn!("calibration table without any star");
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::{BandMagnitude, CatalogInfo, ObjectKind, Point, RefObject};
    use crate::lc::PhotStar;
    use crate::testutil::blank_exposure;

    #[test]
    fn one_row_per_star_and_exposure() {
        let mut info = CatalogInfo {
            id: 7,
            x: 10.0,
            y: 12.0,
            ..CatalogInfo::default()
        };
        info.magnitudes.insert("r".into(), BandMagnitude { mag: 18.5, error: 0.02 });
        let star = RefObject::new(
            "calibstar1",
            Point::new(10.0, 12.0),
            ObjectKind::CalibrationStar(info),
        );
        let mut lc = LightCurve::new(Arc::new(star));
        lc.push_back(Arc::new(blank_exposure("e1", 55000.0)), PhotStar::default());
        lc.push_back(Arc::new(blank_exposure("e2", 55001.0)), PhotStar::default());
        let transient = LightCurve::new(Arc::new(RefObject::new(
            "sn",
            Point::default(),
            ObjectKind::Transient,
        )));

        let table = calibration_table("cat.list", "r", 2, [&lc, &transient]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.global("NSTARS"), Some("1"));
        assert_eq!(table.global("CALIBCATALOG"), Some("cat.list"));
        assert_eq!(table.number(1, "img").unwrap(), 2.0);
        assert_eq!(table.number(0, "mag").unwrap(), 18.5);
        assert_eq!(table.number(0, "star").unwrap(), 7.0);
        assert_eq!(table.value(1, "name"), Some("e2"));
    }
}
