use image::RgbImage;

use crate::{
    screen_block::{ScreenBlock, ScreenPoint, ScreenSize},
    util::Color,
};

/// Linear RGB pixels, row-major with the bottom row first.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBuffer {
    size: ScreenSize,
    pixels: Vec<Color>,
}

impl FrameBuffer {
    pub fn new(size: ScreenSize) -> FrameBuffer {
        FrameBuffer {
            size,
            pixels: vec![Color::new(0.0, 0.0, 0.0); size.x as usize * size.y as usize],
        }
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixel(&self, point: ScreenPoint) -> Color {
        self.pixels[self.index(point)]
    }

    pub fn set_pixel(&mut self, point: ScreenPoint, color: Color) {
        let index = self.index(point);
        self.pixels[index] = color;
    }

    /// Copies a tile rendered into a tightly packed buffer (same layout as the frame buffer).
    pub fn copy_tile(&mut self, tile: &ScreenBlock, colors: &[Color]) {
        debug_assert!(colors.len() >= tile.area());
        debug_assert!(tile.max.x <= self.size.x && tile.max.y <= self.size.y);
        let width = tile.width() as usize;
        for (row, y) in (tile.min.y..tile.max.y).enumerate() {
            let start = self.index(ScreenPoint::new(tile.min.x, y));
            self.pixels[start..start + width].copy_from_slice(&colors[row * width..(row + 1) * width]);
        }
    }

    /// Converts to an 8 bit image with the usual top-down row order.
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_fn(self.size.x, self.size.y, |x, y| {
            color_to_image(self.pixel(ScreenPoint::new(x, self.size.y - 1 - y)))
        })
    }

    fn index(&self, point: ScreenPoint) -> usize {
        debug_assert!(point.x < self.size.x && point.y < self.size.y);
        point.y as usize * self.size.x as usize + point.x as usize
    }
}

/// Maps a 0-1 f32 rgb pixel to pixel type compatible with module image.
pub fn color_to_image(color: Color) -> image::Rgb<u8> {
    image::Rgb([
        (color.r * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.g * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.b * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
