//! LBPH (local binary pattern histogram) gallery recognizer.
//!
//! The model requires integer labels; the gallery is keyed by string
//! identities. [`Lbph::train`] rebuilds the label table from the gallery's
//! listed order on every call and seals it inside the returned
//! [`TrainedModel`] together with the sample histograms — the positional
//! label never crosses this module's API, so a model can never be paired
//! with a mapping from a different training run.

use crate::types::{FaceTemplate, Prediction};
use image::GrayImage;
use ndarray::Array1;
use std::f32::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("cannot train on an empty gallery")]
    EmptyGallery,
    #[error("raster {width}x{height} is too small for the configured LBP grid")]
    RasterTooSmall { width: u32, height: u32 },
}

/// LBP operator and spatial-histogram parameters.
///
/// Defaults are the classical operating point: radius-1, 8-neighbor
/// circular LBP over an 8×8 cell grid.
#[derive(Debug, Clone)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self { radius: 1, neighbors: 8, grid_x: 8, grid_y: 8 }
    }
}

/// LBPH trainer. Stateless apart from its parameters; every call to
/// [`train`](Self::train) produces a fresh model from the full gallery.
#[derive(Debug, Clone, Default)]
pub struct Lbph {
    params: LbphParams,
}

impl Lbph {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }

    /// Train a model over the gallery, in the gallery's listed order.
    ///
    /// Fails with [`RecognizerError::EmptyGallery`] for an empty slice —
    /// recognition against an empty gallery is a caller error, never a
    /// silent "no match".
    pub fn train(&self, gallery: &[FaceTemplate]) -> Result<TrainedModel, RecognizerError> {
        if gallery.is_empty() {
            return Err(RecognizerError::EmptyGallery);
        }

        let mut histograms = Vec::with_capacity(gallery.len());
        let mut identities = Vec::with_capacity(gallery.len());
        for template in gallery {
            histograms.push(spatial_histogram(&template.pixels, &self.params)?);
            identities.push(template.identity.clone());
        }

        tracing::debug!(samples = identities.len(), "trained LBPH model");

        Ok(TrainedModel { params: self.params.clone(), histograms, identities })
    }
}

/// A trained model and its identity table, produced and consumed as one
/// inseparable pair. Only valid for the gallery snapshot it was trained
/// on; rebuild after any gallery mutation.
#[derive(Debug)]
pub struct TrainedModel {
    params: LbphParams,
    histograms: Vec<Array1<f32>>,
    identities: Vec<String>,
}

impl TrainedModel {
    /// Nearest-neighbor classification by chi-square histogram distance.
    ///
    /// Always returns the best enrolled identity with its distance;
    /// acceptance thresholding is the caller's policy.
    pub fn classify(&self, probe: &GrayImage) -> Result<Prediction, RecognizerError> {
        let probe_hist = spatial_histogram(probe, &self.params)?;

        let mut best_idx = 0usize;
        let mut best_dist = f32::INFINITY;
        for (i, hist) in self.histograms.iter().enumerate() {
            let d = chi_square(&probe_hist, hist);
            if d < best_dist {
                best_dist = d;
                best_idx = i;
            }
        }

        Ok(Prediction {
            identity: self.identities[best_idx].clone(),
            distance: best_dist,
        })
    }

    /// Number of gallery samples this model was trained on.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Alternative chi-square distance between two histograms:
/// `2 * Σ (a-b)² / (a+b)`.
///
/// This is the scale classical LBPH implementations report: with
/// unit-mass cell histograms, two fully disjoint cells are 4 apart, so
/// the total is bounded by `4 * grid_x * grid_y` (256 at the default
/// grid) and unrelated rasters land well above the default acceptance
/// threshold of 80.
fn chi_square(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    2.0 * a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let s = x + y;
            if s > 0.0 {
                (x - y) * (x - y) / s
            } else {
                0.0
            }
        })
        .sum::<f32>()
}

/// Bilinear sample of a grayscale raster at fractional coordinates,
/// clamped to the image bounds.
fn bilinear(img: &GrayImage, sx: f32, sy: f32) -> f32 {
    let (w, h) = img.dimensions();
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;
    let sx = sx.clamp(0.0, max_x);
    let sy = sy.clamp(0.0, max_y);

    let x0 = sx.floor();
    let y0 = sy.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let tx = sx - x0;
    let ty = sy - y0;

    let p = |x: f32, y: f32| img.get_pixel(x as u32, y as u32)[0] as f32;

    let top = p(x0, y0) * (1.0 - tx) + p(x1, y0) * tx;
    let bottom = p(x0, y1) * (1.0 - tx) + p(x1, y1) * tx;
    top * (1.0 - ty) + bottom * ty
}

/// Circular LBP codes for the raster interior (borders of `radius`
/// pixels are excluded, matching the operator's support).
fn lbp_codes(img: &GrayImage, params: &LbphParams) -> Vec<u32> {
    let (w, h) = img.dimensions();
    let r = params.radius;
    let lw = w - 2 * r;
    let lh = h - 2 * r;
    let rf = r as f32;

    let mut codes = Vec::with_capacity((lw * lh) as usize);
    for y in r..(h - r) {
        for x in r..(w - r) {
            let center = img.get_pixel(x, y)[0] as f32;
            let mut code = 0u32;
            for n in 0..params.neighbors {
                let theta = 2.0 * PI * n as f32 / params.neighbors as f32;
                let sx = x as f32 + rf * theta.cos();
                let sy = y as f32 - rf * theta.sin();
                if bilinear(img, sx, sy) >= center {
                    code |= 1 << n;
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Grid-of-cells LBP histogram, each cell normalized to unit mass.
fn spatial_histogram(img: &GrayImage, params: &LbphParams) -> Result<Array1<f32>, RecognizerError> {
    let (w, h) = img.dimensions();
    let r = params.radius;
    if w <= 2 * r || h <= 2 * r {
        return Err(RecognizerError::RasterTooSmall { width: w, height: h });
    }

    let lw = w - 2 * r;
    let lh = h - 2 * r;
    let cell_w = lw / params.grid_x;
    let cell_h = lh / params.grid_y;
    if cell_w == 0 || cell_h == 0 {
        return Err(RecognizerError::RasterTooSmall { width: w, height: h });
    }

    let codes = lbp_codes(img, params);
    let bins = 1usize << params.neighbors;
    let cells = (params.grid_x * params.grid_y) as usize;
    let mut hist = vec![0f32; cells * bins];

    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let cell = (gy * params.grid_x + gx) as usize;
            let base = cell * bins;
            for cy in 0..cell_h {
                for cx in 0..cell_w {
                    let px = gx * cell_w + cx;
                    let py = gy * cell_h + cy;
                    let code = codes[(py * lw + px) as usize];
                    hist[base + code as usize] += 1.0;
                }
            }
            // Normalize each cell to unit mass so cells contribute
            // equally regardless of raster size.
            let mass = (cell_w * cell_h) as f32;
            for v in &mut hist[base..base + bins] {
                *v /= mass;
            }
        }
    }

    Ok(Array1::from(hist))
}
