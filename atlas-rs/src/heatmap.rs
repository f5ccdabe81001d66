//! PNG heatmap of a similarity matrix

use crate::similarity::SimilarityMatrix;
use anyhow::{bail, Context, Error};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use log::{info, warn};
use std::path::Path;

const NAN_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BLUE: [f64; 3] = [33.0, 102.0, 172.0];
const WHITE: [f64; 3] = [247.0, 247.0, 247.0];
const RED: [f64; 3] = [178.0, 24.0, 43.0];

fn mix(from: [f64; 3], to: [f64; 3], t: f64) -> Rgb<u8> {
    let c = |i: usize| (from[i] + (to[i] - from[i]) * t).round().clamp(0.0, 255.0) as u8;
    Rgb([c(0), c(1), c(2)])
}

/// Diverging color for a correlation: blue at -1, white at 0, red at 1. Values outside
/// [-1, 1] are clamped and NaN is gray.
pub fn correlation_color(value: f64) -> Rgb<u8> {
    if value.is_nan() {
        return NAN_COLOR;
    }
    let v = value.clamp(-1.0, 1.0);
    if v < 0.0 {
        mix(WHITE, BLUE, -v)
    } else {
        mix(WHITE, RED, v)
    }
}

/// Largest image, in pixels, the renderer will allocate
pub const MAX_PIXELS: u64 = 1 << 28;

/// Labels longer than this are cut and end in `..`
pub const MAX_LABEL_CHARS: usize = 32;

/// Pixel geometry of a labeled heatmap. Row labels sit in a left margin of width `left`,
/// column labels run bottom to top in a top margin of height `top`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeatmapLayout {
    /// side of one matrix cell
    pub cell_size: u32,
    /// glyph magnification; a glyph is `8 * scale` pixels square
    pub scale: u32,
    /// blank border around the labels
    pub pad: u32,
    /// x of the first column
    pub left: u32,
    /// y of the first row
    pub top: u32,
    /// image width
    pub width: u32,
    /// image height
    pub height: u32,
}

impl HeatmapLayout {
    /// Lay out `sim` with `cell_size` pixel cells. Fails when the image would not fit.
    pub fn new(sim: &SimilarityMatrix, cell_size: u32) -> Result<HeatmapLayout, Error> {
        if cell_size == 0 {
            bail!("heatmap cell size must be positive");
        }
        let (rows, cols) = sim.values.dim();
        let widest = |labels: &[String]| labels.iter().map(|l| label_chars(l).len()).max().unwrap_or(0);
        let scale = (cell_size / 12).clamp(1, 4);
        let layout = Self::checked(
            rows,
            cols,
            widest(sim.row_labels.as_slice()),
            widest(sim.col_labels.as_slice()),
            cell_size,
            scale,
        )
            .with_context(|| format!("a {rows}x{cols} heatmap with {cell_size} pixel cells does not fit in an image"))?;
        if u64::from(layout.width) * u64::from(layout.height) > MAX_PIXELS {
            bail!(
                "a {}x{} pixel heatmap exceeds the limit of {} pixels",
                layout.width,
                layout.height,
                MAX_PIXELS
            );
        }
        Ok(layout)
    }

    fn checked(
        rows: usize,
        cols: usize,
        row_chars: usize,
        col_chars: usize,
        cell_size: u32,
        scale: u32,
    ) -> Option<HeatmapLayout> {
        let span = |n: usize, size: u32| u32::try_from(n).ok()?.checked_mul(size);
        let glyph = 8 * scale;
        let pad = 4 * scale;
        let left = span(row_chars, glyph)?.checked_add(2 * pad)?;
        let top = span(col_chars, glyph)?.checked_add(2 * pad)?;
        Some(HeatmapLayout {
            cell_size,
            scale,
            pad,
            left,
            top,
            width: span(cols, cell_size)?.checked_add(left)?.checked_add(pad)?,
            height: span(rows, cell_size)?.checked_add(top)?.checked_add(pad)?,
        })
    }

    fn glyph(&self) -> u32 {
        8 * self.scale
    }

    /// Top left pixel of matrix cell `(row, col)`
    pub fn cell_origin(&self, row: usize, col: usize) -> (u32, u32) {
        (
            self.left + col as u32 * self.cell_size,
            self.top + row as u32 * self.cell_size,
        )
    }
}

fn label_chars(label: &str) -> Vec<char> {
    let mut chars = label.chars().collect::<Vec<_>>();
    if chars.len() > MAX_LABEL_CHARS {
        chars.truncate(MAX_LABEL_CHARS - 2);
        chars.extend(['.', '.']);
    }
    chars
}

fn glyph_rows(c: char) -> [u8; 8] {
    BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')).unwrap_or_default()
}

fn fill(img: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            if x + dx < img.width() && y + dy < img.height() {
                img.put_pixel(x + dx, y + dy, color);
            }
        }
    }
}

/// Draw `label` left to right with its top left corner at `(x, y)`
fn draw_label(img: &mut RgbImage, label: &str, x: u32, y: u32, scale: u32) {
    for (k, c) in label_chars(label).into_iter().enumerate() {
        for (gy, bits) in glyph_rows(c).into_iter().enumerate() {
            for gx in 0..8 {
                if bits & (1 << gx) != 0 {
                    let px = x + (k as u32 * 8 + gx) * scale;
                    fill(img, px, y + gy as u32 * scale, scale, TEXT_COLOR);
                }
            }
        }
    }
}

/// Draw `label` bottom to top, rotated a quarter turn, with its bottom left corner at `(x, bottom)`
fn draw_label_vertical(img: &mut RgbImage, label: &str, x: u32, bottom: u32, scale: u32) {
    for (k, c) in label_chars(label).into_iter().enumerate() {
        for (gy, bits) in glyph_rows(c).into_iter().enumerate() {
            for gx in 0..8 {
                if bits & (1 << gx) != 0 {
                    let along = (k as u32 * 8 + gx + 1) * scale;
                    if let Some(py) = bottom.checked_sub(along) {
                        fill(img, x + gy as u32 * scale, py, scale, TEXT_COLOR);
                    }
                }
            }
        }
    }
}

/// Render one `cell_size` x `cell_size` block per matrix cell, rows top to bottom, with the row
/// labels on the left and the column labels on top
pub fn render_heatmap(sim: &SimilarityMatrix, cell_size: u32) -> Result<RgbImage, Error> {
    let layout = HeatmapLayout::new(sim, cell_size)?;
    let mut img = RgbImage::from_pixel(layout.width, layout.height, BACKGROUND);
    for ((i, j), &v) in sim.values.indexed_iter() {
        let (x, y) = layout.cell_origin(i, j);
        fill(&mut img, x, y, cell_size, correlation_color(v));
    }

    let offset = cell_size.saturating_sub(layout.glyph()) / 2;
    for (i, label) in sim.row_labels.iter().enumerate() {
        let (_, y) = layout.cell_origin(i, 0);
        draw_label(&mut img, label, layout.pad, y + offset, layout.scale);
    }
    for (j, label) in sim.col_labels.iter().enumerate() {
        let (x, _) = layout.cell_origin(0, j);
        draw_label_vertical(&mut img, label, x + offset, layout.top - layout.pad, layout.scale);
    }
    Ok(img)
}

/// Write the heatmap as a PNG. Returns `false` without writing when the matrix has no cells.
pub fn write_heatmap(sim: &SimilarityMatrix, cell_size: u32, path: impl AsRef<Path>) -> Result<bool, Error> {
    let path = path.as_ref();
    if sim.is_empty() {
        warn!(
            "similarity of {} and {} has no cells, skipping {}",
            sim.row_name,
            sim.col_name,
            path.display()
        );
        return Ok(false);
    }
    let img = render_heatmap(sim, cell_size)?;
    img.save(path).with_context(|| path.display().to_string())?;
    info!("wrote {}x{} heatmap to {}", img.width(), img.height(), path.display());
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};

    fn sim(values: Array2<f64>) -> SimilarityMatrix {
        let (r, c) = values.dim();
        SimilarityMatrix {
            row_name: "query".into(),
            col_name: "reference".into(),
            row_labels: (0..r).map(|i| i.to_string()).collect(),
            col_labels: (0..c).map(|j| format!("g{j}")).collect(),
            features: vec![],
            values,
        }
    }

    #[test]
    fn test_colors() {
        assert_eq!(correlation_color(1.0), Rgb([178, 24, 43]));
        assert_eq!(correlation_color(-1.0), Rgb([33, 102, 172]));
        assert_eq!(correlation_color(0.0), Rgb([247, 247, 247]));
        assert_eq!(correlation_color(7.0), correlation_color(1.0));
        assert_eq!(correlation_color(f64::NAN), NAN_COLOR);
    }

    fn has_text(img: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> bool {
        xs.flat_map(|x| ys.clone().map(move |y| (x, y)))
            .any(|(x, y)| *img.get_pixel(x, y) == TEXT_COLOR)
    }

    #[test]
    fn test_layout() -> Result<(), Error> {
        let s = sim(array![[1.0, f64::NAN, -1.0], [0.0, 0.5, -0.5]]);
        let layout = HeatmapLayout::new(&s, 12)?;
        // one-character row labels, two-character column labels, 8 pixel glyphs
        assert_eq!((layout.scale, layout.pad), (1, 4));
        assert_eq!((layout.left, layout.top), (16, 24));
        assert_eq!((layout.width, layout.height), (16 + 3 * 12 + 4, 24 + 2 * 12 + 4));
        assert_eq!(layout.cell_origin(1, 2), (40, 36));

        let big = HeatmapLayout::new(&s, 48)?;
        assert_eq!((big.scale, big.left, big.top), (4, 64, 96));

        assert!(HeatmapLayout::new(&s, 0).is_err());
        assert!(HeatmapLayout::new(&sim(array![[0.5]]), u32::MAX).is_err());
        assert!(HeatmapLayout::new(&sim(array![[0.5]]), 100_000).is_err());
        Ok(())
    }

    #[test]
    fn test_long_labels() {
        assert_eq!(label_chars("T cell").len(), 6);
        let long = label_chars(&"x".repeat(40));
        assert_eq!(long.len(), MAX_LABEL_CHARS);
        assert_eq!(long[MAX_LABEL_CHARS - 2..], ['.', '.']);
        assert_eq!(glyph_rows('\u{e9}'), glyph_rows('?'));
    }

    #[test]
    fn test_render_and_write() -> Result<(), Error> {
        let s = sim(array![[1.0, f64::NAN, -1.0], [0.0, 0.5, -0.5]]);
        let img = render_heatmap(&s, 12)?;
        assert_eq!(img.dimensions(), (56, 52));
        assert_eq!(*img.get_pixel(16, 24), correlation_color(1.0));
        assert_eq!(*img.get_pixel(16 + 12 + 5, 24 + 5), NAN_COLOR);
        assert_eq!(*img.get_pixel(55 - 4, 51 - 4), correlation_color(-0.5));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*img.get_pixel(55, 30), BACKGROUND);

        // row labels "0" and "1" left of their rows, column label "g0" above its column
        assert!(has_text(&img, 4..12, 26..34));
        assert!(has_text(&img, 4..12, 38..46));
        assert!(has_text(&img, 18..26, 4..20));
        assert!(!has_text(&img, 16..52, 24..48));

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("similarity.png");
        assert!(write_heatmap(&s, 12, &path)?);
        let reloaded = image::open(&path)?.to_rgb8();
        assert_eq!(reloaded, img);

        let empty_path = dir.path().join("empty.png");
        assert!(!write_heatmap(&sim(Array2::zeros((0, 3))), 4, &empty_path)?);
        assert!(!empty_path.exists());
        Ok(())
    }
}
