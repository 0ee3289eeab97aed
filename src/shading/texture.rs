use bon::bon;
use image::RgbImage;

use crate::{geometry::TexturePoint, scene::SceneError, util::Color};

use super::Texture;

/// Mapping of texture coordinates outside of 0-1.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Wrap {
    #[default]
    Repeat,
    Clamp,
}

impl Wrap {
    fn apply(self, coord: f32) -> f32 {
        match self {
            Wrap::Repeat => coord.rem_euclid(1.0),
            Wrap::Clamp => coord.clamp(0.0, 1.0),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    Nearest,
    /// Bilinear interpolation of the four closest texels.
    Linear,
}

/// How the texel combines with the shaded color.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TextureMode {
    #[default]
    Modulate,
    Replace,
}

/// RGB image addressed by texture coordinates.
/// `(0, 0)` is the center of the bottom left texel, `(1, 1)` of the top right one.
#[derive(Clone, Debug)]
pub struct Texture2D {
    image: RgbImage,
    wrap_s: Wrap,
    wrap_t: Wrap,
    filter: Filter,
    mode: TextureMode,
}

#[bon]
impl Texture2D {
    #[builder]
    pub fn new(
        image: RgbImage,
        #[builder(default)] wrap_s: Wrap,
        #[builder(default)] wrap_t: Wrap,
        #[builder(default)] filter: Filter,
        #[builder(default)] mode: TextureMode,
    ) -> Result<Self, SceneError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SceneError::EmptyTexture);
        }
        Ok(Texture2D {
            image,
            wrap_s,
            wrap_t,
            filter,
            mode,
        })
    }
}

impl Texture2D {
    pub fn sample(&self, tex_coord: TexturePoint) -> Color {
        let max_s = (self.image.width() - 1) as f32;
        let max_t = (self.image.height() - 1) as f32;
        let s = self.wrap_s.apply(tex_coord.x) * max_s;
        let t = self.wrap_t.apply(tex_coord.y) * max_t;

        match self.filter {
            Filter::Nearest => self.texel(s.round() as u32, t.round() as u32),
            Filter::Linear => {
                let (s0, t0) = (s.floor(), t.floor());
                let (ds, dt) = (s - s0, t - t0);
                let (s0, t0) = (s0 as u32, t0 as u32);
                let s1 = (s0 + 1).min(self.image.width() - 1);
                let t1 = (t0 + 1).min(self.image.height() - 1);

                let lower = self.texel(s0, t0) * (1.0 - ds) + self.texel(s1, t0) * ds;
                let upper = self.texel(s0, t1) * (1.0 - ds) + self.texel(s1, t1) * ds;
                lower * (1.0 - dt) + upper * dt
            }
        }
    }

    /// Texel in texture orientation, `t = 0` is the last image row.
    fn texel(&self, s: u32, t: u32) -> Color {
        let s = s.min(self.image.width() - 1);
        let row = self.image.height() - 1 - t.min(self.image.height() - 1);
        let [r, g, b] = self.image.get_pixel(s, row).0;
        Color::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }
}

impl Texture for Texture2D {
    fn apply(&self, color: Color, tex_coord: TexturePoint) -> Color {
        let texel = self.sample(tex_coord);
        match self.mode {
            TextureMode::Modulate => color * texel,
            TextureMode::Replace => texel,
        }
    }
}
