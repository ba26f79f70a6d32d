use std::path::Path;

use anyhow::{ensure, Context};
use glam::{UVec3, Vec4};
use image::{GrayImage, Rgb, RgbImage};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Display window mapping values to gray levels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub center: f32,
    pub width: f32,
}

impl Window {
    pub fn new(center: f32, width: f32) -> Self {
        Self { center, width }
    }

    fn gray(&self, value: f32) -> u8 {
        let low = self.center - 0.5 * self.width;
        let t = ((value - low) / self.width.max(f32::EPSILON)).clamp(0.0, 1.0);
        (t * 255.0).round() as u8
    }
}

fn slice_range(size: UVec3, slice: u32, len: usize) -> anyhow::Result<std::ops::Range<usize>> {
    ensure!(slice < size.z, "slice {} out of range (depth {})", slice, size.z);
    let per_slice = size.x as usize * size.y as usize;
    let start = slice as usize * per_slice;
    ensure!(
        start + per_slice <= len,
        "volume holds {} voxels, slice {} needs {}",
        len,
        slice,
        start + per_slice
    );
    Ok(start..start + per_slice)
}

/// Writes one slice of a scalar volume (`x` fastest) as a windowed grayscale PNG.
pub fn write_slice_png(
    values: &[f32],
    size: UVec3,
    slice: u32,
    window: Window,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let range = slice_range(size, slice, values.len())?;
    let pixels: Vec<u8> = values[range].iter().map(|&v| window.gray(v)).collect();
    let img = GrayImage::from_raw(size.x, size.y, pixels)
        .context("slice buffer does not match its dimensions")?;
    img.save(path.as_ref())
        .with_context(|| format!("writing {}", path.as_ref().display()))?;
    info!("Wrote {}", path.as_ref().display());
    Ok(())
}

/// Blends 0/255 masks over a windowed background slice, one color per mask.
pub fn write_overlay_png(
    background: &[f32],
    masks: &[(&[u8], Vec4)],
    size: UVec3,
    slice: u32,
    window: Window,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let range = slice_range(size, slice, background.len())?;
    let mut img = RgbImage::new(size.x, size.y);
    for (i, &value) in background[range.clone()].iter().enumerate() {
        let mut rgb = [window.gray(value) as f32 / 255.0; 3];
        for (mask, color) in masks {
            let covered = mask.get(range.start + i).copied().unwrap_or(0) as f32 / 255.0;
            let alpha = covered * color.w;
            for (c, channel) in rgb.iter_mut().enumerate() {
                *channel = *channel * (1.0 - alpha) + color[c] * alpha;
            }
        }
        let x = i as u32 % size.x;
        let y = i as u32 / size.x;
        img.put_pixel(x, y, Rgb(rgb.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)));
    }
    img.save(path.as_ref())
        .with_context(|| format!("writing {}", path.as_ref().display()))?;
    info!("Wrote {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_maps_its_range_onto_gray_levels() {
        let window = Window::new(40.0, 400.0);
        assert_eq!(window.gray(-160.0), 0);
        assert_eq!(window.gray(240.0), 255);
        assert_eq!(window.gray(40.0), 128);
    }

    #[test]
    fn slices_outside_the_volume_are_rejected() {
        let size = UVec3::new(2, 2, 2);
        assert!(slice_range(size, 2, 8).is_err());
        assert!(slice_range(size, 1, 7).is_err());
        assert_eq!(slice_range(size, 1, 8).unwrap(), 4..8);
    }
}
