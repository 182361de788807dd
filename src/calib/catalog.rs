//! Calibration stars from an external catalog.
//!
//! The catalog is a dictionary table with, per star, its position in the
//! reference image (`x`, `y`), optional `ra`/`dec` and magnitudes `m<band>`
//! with errors `em<band>` for any of the `u g r i z` bands.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, info};

use crate::calib::{SecondMoments, neighbor_contamination};
use crate::domain::{BandMagnitude, CatalogInfo, MISSING_MAGNITUDE, ObjectKind, Point, RefObject};
use crate::error::AppError;
use crate::image::Exposure;
use crate::io::DictTable;

pub const CATALOG_BANDS: [&str; 5] = ["u", "g", "r", "i", "z"];

/// Settings of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibConfig {
    pub catalog: PathBuf,
    /// First and last selected star to fit (1-based, inclusive).
    pub first_star: usize,
    pub last_star: usize,
    pub max_images: Option<usize>,
    /// Fainter stars are skipped; defaults per band.
    pub mag_limit: Option<f64>,
    /// Fit at the catalog positions instead of refining them.
    pub fixed_positions: bool,
    /// Seeing (pixels) the contamination estimate is computed for.
    pub calibration_seeing: f64,
    /// Neighbors farther than this (pixels) are ignored.
    pub neighbor_radius: f64,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::new(),
            first_star: 1,
            last_star: 1000,
            max_images: None,
            mag_limit: None,
            fixed_positions: false,
            calibration_seeing: 3.1,
            neighbor_radius: 50.0,
        }
    }
}

impl CalibConfig {
    pub fn aperture_radius(&self) -> f64 {
        5.0 * self.calibration_seeing
    }

    pub fn mag_limit_for(&self, band: &str) -> f64 {
        self.mag_limit.unwrap_or(match band {
            "g" | "r" | "i" | "z" => 21.0,
            _ => 99.0,
        })
    }
}

/// A catalog row kept for calibration.
#[derive(Debug, Clone)]
struct CatalogRow {
    /// 1-based row number.
    id: usize,
    position: Point,
    ra: f64,
    dec: f64,
    magnitudes: BTreeMap<String, BandMagnitude>,
    flux: f64,
}

fn read_rows(catalog: &DictTable, band: &str) -> Result<Vec<CatalogRow>, AppError> {
    let mag_key = format!("m{band}");
    if catalog.column_index(&mag_key).is_none() {
        return Err(AppError::input(format!(
            "Catalog does not have magnitudes in band {band} ({mag_key})."
        )));
    }
    let optional = |row: usize, column: &str| -> Result<Option<f64>, AppError> {
        match catalog.column_index(column) {
            Some(_) => catalog.number(row, column).map(Some),
            None => Ok(None),
        }
    };

    let mut rows = Vec::with_capacity(catalog.len());
    for r in 0..catalog.len() {
        let mut magnitudes = BTreeMap::new();
        for b in CATALOG_BANDS {
            if let Some(mag) = optional(r, &format!("m{b}"))? {
                let error = optional(r, &format!("em{b}"))?.unwrap_or(MISSING_MAGNITUDE);
                magnitudes.insert(b.to_string(), BandMagnitude { mag, error });
            }
        }
        let mag = catalog.number(r, &mag_key)?;
        rows.push(CatalogRow {
            id: r + 1,
            position: Point::new(catalog.number(r, "x")?, catalog.number(r, "y")?),
            ra: optional(r, "ra")?.unwrap_or(0.0),
            dec: optional(r, "dec")?.unwrap_or(0.0),
            magnitudes,
            flux: 10f64.powf(-0.4 * mag),
        });
    }
    Ok(rows)
}

/// Nearest other catalog star within `radius`.
fn nearest_neighbor(rows: &[CatalogRow], index: usize, radius: f64) -> Option<&CatalogRow> {
    let here = rows[index].position;
    rows.iter()
        .enumerate()
        .filter(|(k, _)| *k != index)
        .map(|(_, row)| (row, (row.position - here).norm()))
        .filter(|(_, d)| *d <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(row, _)| row)
}

/// Objects to fit for the catalog stars that land in the reference image.
///
/// Stars are counted in catalog order once they pass the magnitude cut and
/// fall inside the reference frame; only those numbered within
/// `[first_star, last_star]` are returned, named `calibstar<count>`.
pub fn select_calibration_objects(
    catalog: &DictTable,
    reference: &Exposure,
    config: &CalibConfig,
) -> Result<Vec<RefObject>, AppError> {
    let band = reference.band.as_str();
    if band.is_empty() {
        return Err(AppError::input(format!("Reference exposure {} has no band.", reference.name)));
    }
    let rows = read_rows(catalog, band)?;
    let mag_limit = config.mag_limit_for(band);
    let frame = reference.frame();
    let moments = SecondMoments::round(config.calibration_seeing);

    let mut count = 0usize;
    let mut objects = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let mag = row.magnitudes.get(band).map_or(MISSING_MAGNITUDE, |m| m.mag);
        if mag > mag_limit || !frame.contains(row.position) {
            continue;
        }
        count += 1;
        if count < config.first_star || count > config.last_star {
            debug!("skipping star number {count}");
            continue;
        }

        let neighbor = nearest_neighbor(&rows, index, config.neighbor_radius)
            .and_then(|n| {
                let offset = n.position - row.position;
                neighbor_contamination(offset, moments, n.flux, config.aperture_radius())
            })
            .unwrap_or_default();

        let info = CatalogInfo {
            id: row.id,
            ra: row.ra,
            dec: row.dec,
            x: row.position.x,
            y: row.position.y,
            magnitudes: row.magnitudes.clone(),
            neighbor,
        };
        let kind = if config.fixed_positions {
            ObjectKind::FixedPosition { catalog: Some(info) }
        } else {
            ObjectKind::CalibrationStar(info)
        };
        let mut object = RefObject::new(format!("calibstar{count}"), row.position, kind);
        object.ra = Some(row.ra);
        object.dec = Some(row.dec);
        object.band = band.to_string();
        objects.push(object);
    }

    info!(
        "{} catalog entries, {count} stars in {} (band {band}, mag <= {mag_limit}), {} selected",
        rows.len(),
        reference.name,
        objects.len()
    );
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::blank_exposure;

    fn catalog() -> DictTable {
        let mut t = DictTable::new(&["x", "y", "ra", "dec", "mr", "emr", "mg"]);
        t.push_row(["10", "10", "150.0", "2.0", "18.0", "0.01", "18.5"]).unwrap();
        t.push_row(["14", "10", "150.1", "2.0", "19.0", "0.02", "19.5"]).unwrap();
        t.push_row(["40", "40", "150.2", "2.1", "22.5", "0.05", "23.0"]).unwrap();
        t.push_row(["500", "500", "151.0", "3.0", "17.0", "0.01", "17.5"]).unwrap();
        t.push_row(["50", "20", "150.3", "2.2", "20.0", "0.03", "20.5"]).unwrap();
        t
    }

    #[test]
    fn selects_bright_stars_inside_the_reference() {
        let reference = blank_exposure("ref", 55000.0);
        let objects = select_calibration_objects(&catalog(), &reference, &CalibConfig::default())
            .unwrap();
        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["calibstar1", "calibstar2", "calibstar3"]);

        let info = objects[0].kind.catalog().unwrap();
        assert_eq!(info.id, 1);
        assert_eq!(info.magnitude("r").mag, 18.0);
        assert_eq!(info.magnitude("z").mag, MISSING_MAGNITUDE);
        assert_eq!(info.neighbor.distance, 4.0);
        assert!(info.neighbor.contamination > 0.0);

        // The faint star is too faint to fit but still contaminates.
        let far = objects[2].kind.catalog().unwrap();
        assert_eq!(far.id, 5);
        assert!((far.neighbor.distance - 500f64.sqrt()).abs() < 1e-12);
        assert!(far.neighbor.contamination < info.neighbor.contamination);
        assert!(objects[0].kind.fit_plan().refine_position);
    }

    #[test]
    fn star_range_and_fixed_positions() {
        let reference = blank_exposure("ref", 55000.0);
        let config = CalibConfig {
            first_star: 2,
            last_star: 2,
            fixed_positions: true,
            mag_limit: Some(30.0),
            ..CalibConfig::default()
        };
        let objects = select_calibration_objects(&catalog(), &reference, &config).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "calibstar2");
        assert!(!objects[0].kind.fit_plan().refine_position);
    }

    #[test]
    fn missing_band_is_an_input_error() {
        let mut reference = blank_exposure("ref", 55000.0);
        reference.band = "i".to_string();
        let err = select_calibration_objects(&catalog(), &reference, &CalibConfig::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
