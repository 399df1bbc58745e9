//! Post-processing for each model type.

use std::collections::BTreeMap;
use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use super::{DispatchArgs, Inference, InferenceError, InferenceWrapper, Network, Tensor};

const BACKGROUND: [u8; 3] = [0, 0, 0];
const STRESS: [u8; 3] = [255, 0, 0];
const LEAF: [u8; 3] = [0, 255, 0];

fn head(outputs: &[Tensor], index: usize) -> Result<&Tensor, InferenceError> {
    let tensor = outputs.get(index).ok_or_else(|| {
        InferenceError::MalformedOutput(format!(
            "expected at least {} output heads, got {}",
            index + 1,
            outputs.len()
        ))
    })?;
    tensor.check()?;
    Ok(tensor)
}

fn class_of(tensor: &Tensor) -> Result<u32, InferenceError> {
    tensor
        .argmax()
        .map(|i| i as u32)
        .ok_or_else(|| InferenceError::MalformedOutput("empty output head".to_string()))
}

/// Maps a stress ratio to a severity bucket from 0 (healthy) to 4.
pub fn severity_from_ratio(ratio: f64) -> u8 {
    if ratio < 0.001 {
        0
    } else if ratio <= 0.05 {
        1
    } else if ratio <= 0.1 {
        2
    } else if ratio <= 0.15 {
        3
    } else {
        4
    }
}

/// Disease and severity classification from a two-headed network.
pub struct ClassificationWrapper {
    network: Box<dyn Network>,
}

impl ClassificationWrapper {
    pub fn new(network: Box<dyn Network>) -> Self {
        Self { network }
    }
}

impl InferenceWrapper for ClassificationWrapper {
    fn infer(&self, image: &[u8], _args: &DispatchArgs) -> Result<Inference, InferenceError> {
        let outputs = self.network.forward(image)?;
        Ok(Inference::Classification {
            disease: class_of(head(&outputs, 0)?)?,
            severity: class_of(head(&outputs, 1)?)?,
        })
    }
}

/// One-class check that the image shows a coffee leaf. Class 0 is the leaf.
pub struct CoffeeLeafOccWrapper {
    network: Box<dyn Network>,
}

impl CoffeeLeafOccWrapper {
    pub fn new(network: Box<dyn Network>) -> Self {
        Self { network }
    }
}

impl InferenceWrapper for CoffeeLeafOccWrapper {
    fn infer(&self, image: &[u8], _args: &DispatchArgs) -> Result<Inference, InferenceError> {
        let outputs = self.network.forward(image)?;
        Ok(Inference::Validity {
            valid: class_of(head(&outputs, 0)?)? == 0,
        })
    }
}

/// Stress segmentation from a 3-channel score map
/// (background, leaf, stress).
pub struct SegmentationWrapper {
    network: Box<dyn Network>,
}

impl SegmentationWrapper {
    pub fn new(network: Box<dyn Network>) -> Self {
        Self { network }
    }
}

impl InferenceWrapper for SegmentationWrapper {
    fn infer(&self, image: &[u8], args: &DispatchArgs) -> Result<Inference, InferenceError> {
        let outputs = self.network.forward(image)?;
        let map = ScoreMap::from_tensor(head(&outputs, 0)?)?;

        let stress_ratio = map.stress_ratio();
        let mask = if args.generate_mask {
            Some(map.encode_mask()?)
        } else {
            None
        };

        Ok(Inference::Segmentation {
            stress_ratio,
            severity: severity_from_ratio(stress_ratio),
            mask,
        })
    }
}

/// A score map rescaled to 0..=255, stored channel-major.
struct ScoreMap {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ScoreMap {
    fn from_tensor(tensor: &Tensor) -> Result<Self, InferenceError> {
        let (height, width) = match tensor.shape.as_slice() {
            [1, 3, h, w] | [3, h, w] => (*h, *w),
            other => {
                return Err(InferenceError::MalformedOutput(format!(
                    "segmentation head must be [1,3,H,W] or [3,H,W], got {:?}",
                    other
                )))
            }
        };

        let min = tensor.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = tensor.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        let data = tensor
            .data
            .iter()
            .map(|v| if range > 0.0 { (v - min) * (255.0 / range) } else { 0.0 })
            .collect();

        Ok(Self {
            height,
            width,
            data,
        })
    }

    fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Background, leaf and stress scores of one pixel.
    fn scores(&self, pixel: usize) -> [f32; 3] {
        let plane = self.plane();
        [
            self.data[pixel],
            self.data[plane + pixel],
            self.data[2 * plane + pixel],
        ]
    }

    /// Stress pixels over stress plus leaf pixels, or 0 if there are none.
    fn stress_ratio(&self) -> f64 {
        let (mut stress, mut leaf) = (0u64, 0u64);
        for pixel in 0..self.plane() {
            let [background, l, s] = self.scores(pixel);
            if s > background && s > l {
                stress += 1;
            } else if l > background && l > s {
                leaf += 1;
            }
        }
        if stress + leaf == 0 {
            return 0.0;
        }
        stress as f64 / (stress + leaf) as f64
    }

    /// Colours each pixel by its winning class. Pixels without a strict
    /// winner keep their raw scores and, away from the border, take the most
    /// common colour of their 3x3 neighbourhood.
    fn mask_pixels(&self) -> Vec<[u8; 3]> {
        let mut pixels: Vec<[u8; 3]> = (0..self.plane())
            .map(|pixel| {
                let [background, leaf, stress] = self.scores(pixel);
                colour([stress as u8, leaf as u8, background as u8])
            })
            .collect();

        for y in 1..self.height.saturating_sub(1) {
            for x in 1..self.width.saturating_sub(1) {
                let index = y * self.width + x;
                if is_class_colour(pixels[index]) {
                    continue;
                }
                pixels[index] = self.neighbourhood_majority(&pixels, y, x);
            }
        }
        pixels
    }

    /// Most frequent colour around `(y, x)`; the lowest colour wins ties.
    fn neighbourhood_majority(&self, pixels: &[[u8; 3]], y: usize, x: usize) -> [u8; 3] {
        let mut counts: BTreeMap<[u8; 3], usize> = BTreeMap::new();
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                *counts.entry(pixels[ny * self.width + nx]).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .fold((pixels[y * self.width + x], 0), |best, (c, n)| {
                if n > best.1 {
                    (c, n)
                } else {
                    best
                }
            })
            .0
    }

    fn encode_mask(&self) -> Result<Vec<u8>, InferenceError> {
        let raw: Vec<u8> = self.mask_pixels().into_iter().flatten().collect();
        let image = RgbImage::from_raw(self.width as u32, self.height as u32, raw).ok_or_else(
            || InferenceError::MalformedOutput("mask dimensions do not match data".to_string()),
        )?;

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

/// `raw` is ordered (stress, leaf, background).
fn colour(raw: [u8; 3]) -> [u8; 3] {
    let [stress, leaf, background] = raw;
    if background > stress && background > leaf {
        BACKGROUND
    } else if stress > leaf && stress > background {
        STRESS
    } else if leaf > stress && leaf > background {
        LEAF
    } else {
        raw
    }
}

fn is_class_colour(pixel: [u8; 3]) -> bool {
    pixel == BACKGROUND || pixel == STRESS || pixel == LEAF
}
