use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::widgets::Widget;

use crate::core::surface::{over, Colour, Surface};
use crate::core::viewport::{self, RenderedBox};

/// Paints the composited canvas into the terminal, two pixels per cell via
/// upper-half blocks, letterboxed on the page background colour. The widget
/// and the click mapper share the same box arithmetic, so pointer input
/// inverts exactly.
pub struct SurfaceWidget<'a> {
    surface: &'a Surface,
    background: Colour,
}

impl<'a> SurfaceWidget<'a> {
    pub fn new(surface: &'a Surface, background: Colour) -> Self {
        Self {
            surface,
            background,
        }
    }

    /// Colour under a presentation-pixel point: a canvas pixel blended over
    /// the page background, or the bare background in the letterbox bars.
    fn sample(&self, rendered: &RenderedBox, px: f64, py: f64) -> Colour {
        let (lx, ly) = viewport::map_point(
            rendered,
            self.surface.width(),
            self.surface.height(),
            px,
            py,
        );
        if lx < 0.0 || ly < 0.0 {
            return self.background;
        }
        match self.surface.pixel(lx.floor() as u32, ly.floor() as u32) {
            Some(pixel) => Colour::from_channels(over(self.background.channels(), pixel)),
            None => self.background,
        }
    }
}

impl Widget for SurfaceWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        let rendered =
            RenderedBox::content(0.0, 0.0, area.width as f64, area.height as f64 * 2.0);
        for row in 0..area.height {
            for col in 0..area.width {
                let px = col as f64 + 0.5;
                let top = self.sample(&rendered, px, row as f64 * 2.0 + 0.5);
                let bottom = self.sample(&rendered, px, row as f64 * 2.0 + 1.5);
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_symbol("▀");
                    cell.set_fg(Color::Rgb(top.r, top.g, top.b));
                    cell.set_bg(Color::Rgb(bottom.r, bottom.g, bottom.b));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKGROUND: Colour = Colour::rgb(1, 2, 3);

    fn rendered_cell(buf: &Buffer, x: u16, y: u16) -> (Color, Color) {
        let cell = buf.cell((x, y)).unwrap();
        (cell.fg, cell.bg)
    }

    #[test]
    fn canvas_pixels_land_in_the_centre_cells() {
        let mut surface = Surface::new(2, 2);
        surface.fill(Colour::rgb(200, 10, 10));
        // 4 cells x 1 row is a 4x2 pixel page: the 2x2 canvas sits centred
        // with one background column either side
        let area = Rect::new(0, 0, 4, 1);
        let mut buf = Buffer::empty(area);
        SurfaceWidget::new(&surface, BACKGROUND).render(area, &mut buf);

        let bg = Color::Rgb(1, 2, 3);
        let red = Color::Rgb(200, 10, 10);
        assert_eq!(rendered_cell(&buf, 0, 0), (bg, bg));
        assert_eq!(rendered_cell(&buf, 1, 0), (red, red));
        assert_eq!(rendered_cell(&buf, 2, 0), (red, red));
        assert_eq!(rendered_cell(&buf, 3, 0), (bg, bg));
    }

    #[test]
    fn transparent_canvas_shows_the_page_background() {
        let surface = Surface::new(2, 2);
        let area = Rect::new(0, 0, 2, 1);
        let mut buf = Buffer::empty(area);
        SurfaceWidget::new(&surface, BACKGROUND).render(area, &mut buf);
        let bg = Color::Rgb(1, 2, 3);
        assert_eq!(rendered_cell(&buf, 0, 0), (bg, bg));
        assert_eq!(rendered_cell(&buf, 1, 0), (bg, bg));
    }

    #[test]
    fn top_and_bottom_pixels_split_across_the_half_block() {
        let mut surface = Surface::new(1, 2);
        surface.set_pixel(0, 0, [255, 0, 0, 255]);
        surface.set_pixel(0, 1, [0, 0, 255, 255]);
        let area = Rect::new(0, 0, 1, 1);
        let mut buf = Buffer::empty(area);
        SurfaceWidget::new(&surface, BACKGROUND).render(area, &mut buf);
        assert_eq!(
            rendered_cell(&buf, 0, 0),
            (Color::Rgb(255, 0, 0), Color::Rgb(0, 0, 255))
        );
    }
}
