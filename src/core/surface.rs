/// Software RGBA surfaces backing the main canvas and every sub-canvas.
use anyhow::{ensure, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;

/// An RGBA colour. Config values arrive as CSS-style strings (`"white"`,
/// `"#20a0ff"`) and are parsed on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    pub const TRANSPARENT: Colour = Colour::rgba(0, 0, 0, 0);
    pub const WHITE: Colour = Colour::rgb(255, 255, 255);
    pub const BLACK: Colour = Colour::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Colour {
        Colour { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Colour {
        Colour { r, g, b, a }
    }

    /// Parse a named colour or a `#rgb` / `#rrggbb` / `#rrggbbaa` hex value.
    pub fn parse(raw: &str) -> Option<Colour> {
        let trimmed = raw.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            return Colour::from_hex(hex);
        }
        let named = match trimmed.to_ascii_lowercase().as_str() {
            "white" => Colour::WHITE,
            "black" => Colour::BLACK,
            "red" => Colour::rgb(255, 0, 0),
            "green" => Colour::rgb(0, 128, 0),
            "lime" => Colour::rgb(0, 255, 0),
            "blue" => Colour::rgb(0, 0, 255),
            "navy" => Colour::rgb(0, 0, 128),
            "yellow" => Colour::rgb(255, 255, 0),
            "cyan" | "aqua" => Colour::rgb(0, 255, 255),
            "magenta" | "fuchsia" => Colour::rgb(255, 0, 255),
            "grey" | "gray" => Colour::rgb(128, 128, 128),
            "silver" => Colour::rgb(192, 192, 192),
            "maroon" => Colour::rgb(128, 0, 0),
            "olive" => Colour::rgb(128, 128, 0),
            "teal" => Colour::rgb(0, 128, 128),
            "purple" => Colour::rgb(128, 0, 128),
            "orange" => Colour::rgb(255, 165, 0),
            "transparent" => Colour::TRANSPARENT,
            _ => return None,
        };
        Some(named)
    }

    fn from_hex(hex: &str) -> Option<Colour> {
        let nibble = |c: u8| (c as char).to_digit(16).map(|v| v as u8);
        let bytes = hex.as_bytes();
        match bytes.len() {
            3 => {
                let r = nibble(bytes[0])?;
                let g = nibble(bytes[1])?;
                let b = nibble(bytes[2])?;
                Some(Colour::rgb(r << 4 | r, g << 4 | g, b << 4 | b))
            }
            6 | 8 => {
                let mut channels = [0u8; 4];
                channels[3] = 255;
                for (i, pair) in bytes.chunks(2).enumerate() {
                    channels[i] = nibble(pair[0])? << 4 | nibble(pair[1])?;
                }
                Some(Colour::rgba(channels[0], channels[1], channels[2], channels[3]))
            }
            _ => None,
        }
    }

    pub fn channels(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_channels(channels: [u8; 4]) -> Colour {
        Colour::rgba(channels[0], channels[1], channels[2], channels[3])
    }
}

impl<'de> Deserialize<'de> for Colour {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Colour::parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognised colour '{raw}'")))
    }
}

/// Source-over blend of `src` onto `dst`, both straight-alpha RGBA.
pub(crate) fn over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as u32;
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = dst[3] as u32;
    // alpha scaled by 255 to keep the maths in integers
    let out_a = sa * 255 + da * (255 - sa);
    if out_a == 0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let s = src[i] as u32;
        let d = dst[i] as u32;
        out[i] = ((s * sa * 255 + d * da * (255 - sa)) / out_a) as u8;
    }
    out[3] = (out_a / 255) as u8;
    out
}

/// A width × height RGBA pixel buffer with the handful of operations the
/// drawing bridge needs: clear, fill, scaled blit, whole-surface composite.
#[derive(Clone, Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// A fully transparent surface.
    pub fn new(width: u32, height: u32) -> Surface {
        Surface {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Surface> {
        ensure!(
            pixels.len() == (width as usize) * (height as usize) * 4,
            "pixel buffer is {} bytes, expected {} for {width}x{height}",
            pixels.len(),
            (width as usize) * (height as usize) * 4
        );
        Ok(Surface {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Erase every pixel to transparent.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Overwrite every pixel with `colour`.
    pub fn fill(&mut self, colour: Colour) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&colour.channels());
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, channels: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        self.pixels[offset..offset + 4].copy_from_slice(&channels);
    }

    /// Blit `source[sx,sy,sw,sh]` into `self[dx,dy,dw,dh]`, nearest-neighbour
    /// sampled and alpha blended. Destination pixels outside this surface and
    /// samples outside the source rectangle are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_image(
        &mut self,
        source: &Surface,
        sx: f64,
        sy: f64,
        sw: f64,
        sh: f64,
        dx: f64,
        dy: f64,
        dw: f64,
        dh: f64,
    ) {
        if sw <= 0.0 || sh <= 0.0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }
        let x0 = dx.floor().max(0.0) as u32;
        let y0 = dy.floor().max(0.0) as u32;
        let x1 = ((dx + dw).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((dy + dh).ceil().max(0.0) as u32).min(self.height);
        for py in y0..y1 {
            for px in x0..x1 {
                let u = sx + ((px as f64 + 0.5) - dx) * sw / dw;
                let v = sy + ((py as f64 + 0.5) - dy) * sh / dh;
                if u < sx || u >= sx + sw || v < sy || v >= sy + sh {
                    continue;
                }
                if u < 0.0 || v < 0.0 {
                    continue;
                }
                let Some(sample) = source.pixel(u.floor() as u32, v.floor() as u32) else {
                    continue;
                };
                let dst = self.pixel(px, py).unwrap_or([0, 0, 0, 0]);
                self.set_pixel(px, py, over(dst, sample));
            }
        }
    }

    /// Composite the whole of `source` onto this surface with its top-left
    /// corner at (x, y), in one operation.
    pub fn composite(&mut self, source: &Surface, x: f64, y: f64) {
        let ox = x.round() as i64;
        let oy = y.round() as i64;
        for sy in 0..source.height {
            let py = oy + sy as i64;
            if py < 0 || py >= self.height as i64 {
                continue;
            }
            for sx in 0..source.width {
                let px = ox + sx as i64;
                if px < 0 || px >= self.width as i64 {
                    continue;
                }
                let sample = source.pixel(sx, sy).unwrap_or([0, 0, 0, 0]);
                let dst = self.pixel(px as u32, py as u32).unwrap_or([0, 0, 0, 0]);
                self.set_pixel(px as u32, py as u32, over(dst, sample));
            }
        }
    }
}
