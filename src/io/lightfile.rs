//! Light-file parsing.
//!
//! A light file lists the objects to fit, the exposures to fit them on and the
//! geometric/photometric reference:
//!
//! ```text
//! # comment
//! OBJECTS
//! 1021.5 877.2 NAME=sn05a TYPE=0 BAND=r DATE_MIN=53600 DATE_MAX=53700
//! IMAGES
//! 711234p
//! 711298p
//! PHOREF
//! 710001p
//! ```
//!
//! A line containing one of `OBJECTS`, `IMAGES` or `PHOREF` switches section.

use std::fs;
use std::path::Path;

use crate::domain::{ObjectKind, Point, RefObject};
use crate::error::AppError;

/// Parsed light file. Exposures are referenced by name only.
#[derive(Debug, Clone, PartialEq)]
pub struct LightFile {
    /// Geometric and photometric reference exposure.
    pub reference: String,
    /// Exposures to fit, in file order, reference included.
    pub images: Vec<String>,
    pub objects: Vec<RefObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Objects,
    Images,
    Reference,
}

impl LightFile {
    pub fn read(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::input(format!("Failed to read light file '{}': {e}", path.display()))
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse light-file text; `source` only labels error messages.
    pub fn parse(text: &str, source: &str) -> Result<Self, AppError> {
        let mut section = Section::None;
        let mut reference: Option<String> = None;
        let mut images: Vec<String> = Vec::new();
        let mut objects = Vec::new();

        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let err = |msg: String| AppError::input(format!("{source}:{line_no}: {msg}"));

            let line = raw.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains("OBJECTS") {
                section = Section::Objects;
                continue;
            }
            if line.contains("IMAGES") {
                section = Section::Images;
                continue;
            }
            if line.contains("PHOREF") {
                section = Section::Reference;
                continue;
            }

            match section {
                Section::None => return Err(err(format!("line outside of any section: '{line}'"))),
                Section::Objects => {
                    let object = parse_object(line).map_err(err)?;
                    objects.push(object);
                }
                Section::Images => {
                    let name = image_name(line);
                    if images.iter().any(|im| im == name) {
                        return Err(err(format!("image {name} appears twice")));
                    }
                    images.push(name.to_string());
                }
                Section::Reference => {
                    let name = image_name(line);
                    if let Some(previous) = &reference {
                        return Err(err(format!("second PHOREF {name} (already {previous})")));
                    }
                    if !images.iter().any(|im| im == name) {
                        images.push(name.to_string());
                    }
                    reference = Some(name.to_string());
                }
            }
        }

        let reference = reference.ok_or_else(|| {
            AppError::input(format!("light file '{source}' does not contain a PHOREF line"))
        })?;

        Ok(Self {
            reference,
            images,
            objects,
        })
    }
}

fn image_name(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or(line)
}

/// `X Y KEY=VALUE...`
fn parse_object(line: &str) -> Result<RefObject, String> {
    let mut words = line.split_whitespace();
    let x = parse_number(words.next(), "X")?;
    let y = parse_number(words.next(), "Y")?;

    let mut name: Option<String> = None;
    let mut kind = ObjectKind::Transient;
    let mut band = String::new();
    let mut mjd_min = -1.0e30;
    let mut mjd_max = 1.0e30;
    let mut ra = None;
    let mut dec = None;

    for word in words {
        let (key, value) = word
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{word}'"))?;
        match key.to_ascii_uppercase().as_str() {
            "NAME" => name = Some(value.to_string()),
            "TYPE" => {
                let code: i64 = value.parse().map_err(|_| format!("invalid TYPE '{value}'"))?;
                kind = ObjectKind::from_type_code(code).ok_or_else(|| {
                    format!("unknown object TYPE {code}")
                })?;
            }
            "BAND" => band = value.to_string(),
            "DATE_MIN" => mjd_min = parse_number(Some(value), "DATE_MIN")?,
            "DATE_MAX" => mjd_max = parse_number(Some(value), "DATE_MAX")?,
            "RA" => ra = Some(parse_number(Some(value), "RA")?),
            "DEC" => dec = Some(parse_number(Some(value), "DEC")?),
            other => return Err(format!("unknown key '{other}'")),
        }
    }

    let name = name.ok_or_else(|| "object without NAME".to_string())?;
    if mjd_min > mjd_max {
        return Err(format!("{name}: DATE_MIN {mjd_min} is after DATE_MAX {mjd_max}"));
    }

    let mut object = RefObject::new(name, Point::new(x, y), kind);
    object.band = band;
    object.mjd_min = mjd_min;
    object.mjd_max = mjd_max;
    object.ra = ra;
    object.dec = dec;
    Ok(object)
}

fn parse_number(word: Option<&str>, what: &str) -> Result<f64, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    let v: f64 = word.parse().map_err(|_| format!("invalid {what} '{word}'"))?;
    if !v.is_finite() {
        return Err(format!("non-finite {what}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# a comment

OBJECTS
100.5 200.25 NAME=sn01 TYPE=0 BAND=r DATE_MIN=55000 DATE_MAX=55100 RA=150.1 DEC=2.2
10 20 NAME=star7 TYPE=1
IMAGES
e1
e2 extra words are ignored
PHOREF
ref
";

    #[test]
    fn parses_sections_and_objects() {
        let lf = LightFile::parse(SAMPLE, "sample").unwrap();
        assert_eq!(lf.reference, "ref");
        assert_eq!(lf.images, vec!["e1", "e2", "ref"]);
        assert_eq!(lf.objects.len(), 2);

        let sn = &lf.objects[0];
        assert_eq!(sn.name, "sn01");
        assert_eq!(sn.position, Point::new(100.5, 200.25));
        assert_eq!(sn.kind, ObjectKind::Transient);
        assert_eq!(sn.band, "r");
        assert_eq!((sn.mjd_min, sn.mjd_max), (55000.0, 55100.0));
        assert_eq!(sn.ra, Some(150.1));

        assert_eq!(lf.objects[1].kind.type_code(), 1);
        assert!(lf.objects[1].in_window(1.0e6));
    }

    #[test]
    fn reference_already_listed_is_not_added_twice() {
        let text = "IMAGES\nref\ne1\nPHOREF\nref\n";
        let lf = LightFile::parse(text, "t").unwrap();
        assert_eq!(lf.images, vec!["ref", "e1"]);
    }

    #[test]
    fn missing_reference_is_fatal() {
        let err = LightFile::parse("IMAGES\ne1\n", "t").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("PHOREF"));
    }

    #[test]
    fn duplicate_image_reports_its_line() {
        let err = LightFile::parse("IMAGES\ne1\ne1\nPHOREF\nref\n", "t").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().starts_with("t:3:"), "{}", err.message());
    }

    #[test]
    fn object_syntax_errors() {
        for bad in [
            "OBJECTS\n1 2 NAME=a TYPE=2\nPHOREF\nref\n",
            "OBJECTS\n1 2 NAME=a COLOR=red\nPHOREF\nref\n",
            "OBJECTS\n1 NAME=a\nPHOREF\nref\n",
            "OBJECTS\n1 2 TYPE=0\nPHOREF\nref\n",
            "OBJECTS\n1 2 NAME=a DATE_MIN=10 DATE_MAX=5\nPHOREF\nref\n",
        ] {
            let err = LightFile::parse(bad, "t").unwrap_err();
            assert!(err.message().starts_with("t:2:"), "{}", err.message());
        }
    }
}
