//! Formatted terminal output.
//!
//! Formatting lives here so the fitting code stays free of presentation.

use crate::fit::{FitReport, NightFit, ObjectOutcome, StopReason};
use crate::io::Lc2Fit;

/// One line per object of a `fit` or `calibrate` run.
pub fn format_fit_summary(outcomes: &[ObjectOutcome]) -> String {
    let mut out = String::new();
    let n_ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
    out.push_str(&format!("=== simphot: {n_ok}/{} objects fitted ===\n", outcomes.len()));

    push_line(
        &mut out,
        format!(
            "{:<20} {:>7} {:>7} {:>7} {:>10} {:>5} {:>9} {:>9}",
            "object", "fluxes", "galaxy", "skipped", "chi2/ndf", "iter", "dx", "dy"
        ),
    );
    push_line(
        &mut out,
        format!(
            "{:-<20} {:-<7} {:-<7} {:-<7} {:-<10} {:-<5} {:-<9} {:-<9}",
            "", "", "", "", "", "", "", ""
        ),
    );
    for o in outcomes {
        match &o.result {
            Ok(r) => push_line(&mut out, format_report(&o.name, r)),
            Err(e) => push_line(&mut out, format!("{:<20} failed: {e}", truncate(&o.name, 20))),
        }
    }
    out
}

fn format_report(name: &str, r: &FitReport) -> String {
    format!(
        "{:<20} {:>7} {:>7} {:>7} {:>10.3} {:>5} {:>9.4} {:>9.4}",
        truncate(name, 20),
        r.n_fitted,
        r.n_galaxy_only,
        r.n_skipped,
        r.chi2ndf,
        r.iterations,
        r.offset.x,
        r.offset.y
    )
}

/// Per-night fluxes of one light curve.
pub fn format_night_summary(lc: &Lc2Fit, fit: &NightFit, dates: &[f64]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== simphot fitnight: {} exposures, {} nights, {} outliers, chi2/ndf {:.3} ({}) ===\n",
        fit.kept.len() + fit.outliers.len(),
        fit.night_fluxes.len(),
        fit.outliers.len(),
        fit.chi2ndf,
        stop_label(fit.stop)
    ));
    push_line(&mut out, format!("{:>14} {:>14} {:>12}", "date", "flux", "error"));
    push_line(&mut out, format!("{:-<14} {:-<14} {:-<12}", "", "", ""));
    for (night, date) in dates.iter().enumerate() {
        push_line(
            &mut out,
            format!(
                "{date:>14.5} {:>14.3} {:>12.3}",
                fit.night_fluxes[night],
                fit.night_error(night)
            ),
        );
    }
    if !fit.outliers.is_empty() {
        out.push_str("\nRemoved exposures:\n");
        for o in &fit.outliers {
            let date = lc.dates.get(o.index).copied().unwrap_or(f64::NAN);
            push_line(
                &mut out,
                format!("  #{:<4} {date:>14.5} {:>14.3} {:>6.2} sigma", o.index, o.flux, o.nsigma),
            );
        }
    }
    out
}

fn stop_label(stop: StopReason) -> &'static str {
    match stop {
        StopReason::NoDegreesOfFreedom => "no degrees of freedom",
        StopReason::GoodFit => "good fit",
        StopReason::OutlierCap => "outlier cap reached",
        StopReason::NoSignificantOutlier => "no significant outlier",
    }
}

fn push_line(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
