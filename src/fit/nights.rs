//! Grouping exposures into observing nights.
//!
//! A night is identified by the UT calendar date of `mjd − boundary`, so that
//! with the default 12h boundary every exposure taken between noon and noon
//! lands in the same night.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use nalgebra::DMatrix;

use crate::error::AppError;

/// MJD of 1970-01-01T00:00:00 UTC.
pub const MJD_UNIX_EPOCH: f64 = 40587.0;

/// Calendar night of an exposure.
pub fn night_of(mjd: f64, boundary_hours: f64) -> Option<NaiveDate> {
    let seconds = (mjd - MJD_UNIX_EPOCH) * 86_400.0 - boundary_hours * 3_600.0;
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|t| t.date_naive())
}

/// Exposures × nights indicator matrix; rows of unfit exposures are zero.
///
/// Returns the matrix and the night dates, in increasing order.
pub fn build_night_design(
    mjds: &[f64],
    fitted: &[bool],
    boundary_hours: f64,
) -> Result<(DMatrix<f64>, Vec<NaiveDate>), AppError> {
    if mjds.len() != fitted.len() {
        return Err(AppError::input(format!(
            "{} dates for {} fit flags.",
            mjds.len(),
            fitted.len()
        )));
    }
    let mut nights: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (e, (&mjd, &ok)) in mjds.iter().zip(fitted).enumerate() {
        if !ok {
            continue;
        }
        let night = night_of(mjd, boundary_hours)
            .ok_or_else(|| AppError::input(format!("Date {mjd} is out of range.")))?;
        nights.entry(night).or_default().push(e);
    }

    let mut design = DMatrix::zeros(mjds.len(), nights.len());
    for (n, members) in nights.values().enumerate() {
        for &e in members {
            design[(e, n)] = 1.0;
        }
    }
    Ok((design, nights.into_keys().collect()))
}
