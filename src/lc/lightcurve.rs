//! Light curves: the measurements of one object across exposures.

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::{DMatrix, Matrix2};

use crate::domain::{Point, RefObject};
use crate::error::{AppError, EXIT_INPUT};
use crate::image::{Exposure, ExposureStore, PixelBlock};
use crate::io::LightFile;
use crate::lc::{Fiducial, PhotStar};

/// Result of the last simultaneous fit of a light curve.
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub chi2: f64,
    pub ndf: usize,
    /// Refined object position in the reference image.
    pub position: Point,
    /// Covariance of the position offset (reference pixels), when refined.
    pub position_covariance: Option<Matrix2<f64>>,
    /// One row/column per Fiducial; zero for unfit exposures.
    pub flux_covariance: DMatrix<f64>,
    /// Flux block (one row per Fiducial) first, then galaxy pixels, then position.
    pub parameter_covariance: DMatrix<f64>,
    pub galaxy: Option<PixelBlock>,
    pub iterations: usize,
    pub n_pixels: usize,
}

impl FitSummary {
    pub fn chi2ndf(&self) -> f64 {
        if self.ndf == 0 { 0.0 } else { self.chi2 / self.ndf as f64 }
    }
}

#[derive(Debug, Clone)]
pub struct LightCurve {
    object: Arc<RefObject>,
    fiducials: Vec<Fiducial>,
    pub fit: Option<FitSummary>,
}

impl LightCurve {
    pub fn new(object: Arc<RefObject>) -> Self {
        Self {
            object,
            fiducials: Vec::new(),
            fit: None,
        }
    }

    pub fn object(&self) -> &Arc<RefObject> {
        &self.object
    }

    pub fn fiducials(&self) -> &[Fiducial] {
        &self.fiducials
    }

    pub fn fiducials_mut(&mut self) -> &mut [Fiducial] {
        &mut self.fiducials
    }

    pub fn len(&self) -> usize {
        self.fiducials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fiducials.is_empty()
    }

    /// Append a measurement unless this exposure already has one.
    ///
    /// Returns `false` (and leaves the curve untouched) on a duplicate.
    pub fn push_back(&mut self, exposure: Arc<Exposure>, star: PhotStar) -> bool {
        if self.fiducials.iter().any(|f| f.name() == exposure.name) {
            warn!(
                "{}: exposure {} already in the light curve, skipped",
                self.object.name, exposure.name
            );
            return false;
        }
        self.fiducials.push(Fiducial::new(exposure, star));
        true
    }

    /// Reduced χ² of the last fit, 0 when unfit or without degrees of freedom.
    pub fn chi2ndf(&self) -> f64 {
        self.fit.as_ref().map_or(0.0, FitSummary::chi2ndf)
    }

    /// Dates, fluxes and the flux covariance block, one entry per Fiducial.
    pub fn compute_mat_vec(&self) -> (Vec<f64>, Vec<f64>, DMatrix<f64>) {
        let n = self.fiducials.len();
        let dates = self.fiducials.iter().map(Fiducial::mjd).collect();
        let fluxes = self.fiducials.iter().map(|f| f.star.flux).collect();
        let covariance = match &self.fit {
            Some(fit) if fit.flux_covariance.nrows() == n && fit.flux_covariance.ncols() == n => {
                fit.flux_covariance.clone()
            }
            _ => DMatrix::zeros(n, n),
        };
        (dates, fluxes, covariance)
    }

    /// Fiducials that carry a fitted flux.
    pub fn fitted(&self) -> impl Iterator<Item = &Fiducial> {
        self.fiducials.iter().filter(|f| f.fitted && f.star.flux != 0.0)
    }
}

/// All light curves of one run, sharing exposures and objects.
#[derive(Debug, Clone)]
pub struct LightCurveList {
    pub ref_image: Arc<Exposure>,
    pub images: Vec<Arc<Exposure>>,
    pub objects: Vec<Arc<RefObject>>,
    pub curves: Vec<LightCurve>,
}

impl LightCurveList {
    pub fn new(ref_image: Arc<Exposure>) -> Self {
        Self {
            ref_image,
            images: Vec::new(),
            objects: Vec::new(),
            curves: Vec::new(),
        }
    }

    /// Register an exposure. An exposure may only appear once.
    pub fn push_image(&mut self, exposure: Arc<Exposure>) -> Result<(), AppError> {
        if self.images.iter().any(|im| im.name == exposure.name) {
            return Err(AppError::new(
                EXIT_INPUT,
                format!("Image {} appears twice in the exposure list.", exposure.name),
            ));
        }
        self.images.push(exposure);
        Ok(())
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.images.iter().any(|im| im.name == name)
    }

    /// Add an object with one (unfit) Fiducial per registered image.
    pub fn add_object(&mut self, object: RefObject) -> usize {
        let object = Arc::new(object);
        let mut curve = LightCurve::new(Arc::clone(&object));
        for image in &self.images {
            let star = PhotStar {
                sky: image.sky,
                varsky: image.sky_variance,
                ..PhotStar::default()
            };
            curve.push_back(Arc::clone(image), star);
        }
        self.objects.push(object);
        self.curves.push(curve);
        self.curves.len() - 1
    }

    /// Photometric zero point fluxes are expressed in.
    pub fn zero_point(&self) -> f64 {
        self.ref_image.zero_point
    }

    /// Load every exposure named by the light file and build one curve per object.
    pub fn from_light_file(light: &LightFile, store: &dyn ExposureStore) -> Result<Self, AppError> {
        let reference = store.load(&light.reference)?;
        let mut list = LightCurveList::new(Arc::clone(&reference));
        for name in &light.images {
            let exposure = if *name == reference.name {
                Arc::clone(&reference)
            } else {
                store.load(name)?
            };
            list.push_image(exposure)?;
        }
        if !list.has_image(&reference.name) {
            list.push_image(reference)?;
        }
        for object in &light.objects {
            list.add_object(object.clone());
        }
        debug!(
            "light curve list: {} images, {} objects, reference {}",
            list.images.len(),
            list.objects.len(),
            list.ref_image.name
        );
        Ok(list)
    }
}
