/// Mapping between presentation pixels and logical canvas coordinates.
///
/// The canvas rarely fills its on-screen box exactly: the box may be scaled,
/// padded, or have a different aspect ratio, in which case the content is
/// letterboxed on the shorter-scale axis. `map_point` inverts all of that.
/// Bounds checking is deliberately left to the caller; out-of-box inputs map
/// to coordinates outside [0, width) x [0, height).

/// The canvas's on-screen box in presentation pixels: outer offset, outer
/// size, and any padding eating into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub padding_left: f64,
    pub padding_top: f64,
    pub padding_right: f64,
    pub padding_bottom: f64,
}

impl RenderedBox {
    /// A box with no padding.
    pub fn content(left: f64, top: f64, width: f64, height: f64) -> RenderedBox {
        RenderedBox {
            left,
            top,
            width,
            height,
            padding_left: 0.0,
            padding_top: 0.0,
            padding_right: 0.0,
            padding_bottom: 0.0,
        }
    }
}

/// The effective placement of the logical canvas inside a rendered box: the
/// presentation-pixel origin of logical (0, 0) and the uniform scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasTransform {
    pub left: f64,
    pub top: f64,
    pub scale: f64,
}

pub fn transform(rendered: &RenderedBox, logical_width: u32, logical_height: u32) -> CanvasTransform {
    let content_width = rendered.width - rendered.padding_left - rendered.padding_right;
    let content_height = rendered.height - rendered.padding_top - rendered.padding_bottom;
    let x_scale = content_width / logical_width as f64;
    let y_scale = content_height / logical_height as f64;

    let mut scale = x_scale;
    let mut left = rendered.left + rendered.padding_left;
    let mut top = rendered.top + rendered.padding_top;
    if x_scale > y_scale {
        // content is pillarboxed: centre on the horizontal axis
        scale = y_scale;
        let actual_width = content_width * y_scale / x_scale;
        left += (content_width - actual_width) / 2.0;
    } else if y_scale > x_scale {
        // content is letterboxed: centre on the vertical axis
        let actual_height = content_height * x_scale / y_scale;
        top += (content_height - actual_height) / 2.0;
    }

    CanvasTransform { left, top, scale }
}

/// Convert a presentation-pixel point to logical canvas coordinates.
pub fn map_point(
    rendered: &RenderedBox,
    logical_width: u32,
    logical_height: u32,
    x: f64,
    y: f64,
) -> (f64, f64) {
    let t = transform(rendered, logical_width, logical_height);
    ((x - t.left) / t.scale, (y - t.top) / t.scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_box_maps_one_to_one() {
        let rendered = RenderedBox::content(0.0, 0.0, 100.0, 50.0);
        assert_eq!(map_point(&rendered, 100, 50, 10.0, 20.0), (10.0, 20.0));
    }

    #[test]
    fn uniform_scaling_divides_out() {
        let rendered = RenderedBox::content(0.0, 0.0, 200.0, 100.0);
        assert_eq!(map_point(&rendered, 100, 50, 20.0, 10.0), (10.0, 5.0));
    }

    #[test]
    fn offset_and_padding_are_subtracted() {
        let rendered = RenderedBox {
            left: 10.0,
            top: 20.0,
            width: 120.0,
            height: 70.0,
            padding_left: 10.0,
            padding_top: 10.0,
            padding_right: 10.0,
            padding_bottom: 10.0,
        };
        // content box is 100x50 at (20, 30)
        assert_eq!(map_point(&rendered, 100, 50, 20.0, 30.0), (0.0, 0.0));
        assert_eq!(map_point(&rendered, 100, 50, 70.0, 55.0), (50.0, 25.0));
    }

    #[test]
    fn pillarbox_centres_horizontally() {
        // logical 100x100 shown in a 200x100 box: scale 1, content centred
        // with a 50px bar either side
        let rendered = RenderedBox::content(0.0, 0.0, 200.0, 100.0);
        assert_eq!(map_point(&rendered, 100, 100, 50.0, 0.0), (0.0, 0.0));
        assert_eq!(map_point(&rendered, 100, 100, 149.0, 99.0), (99.0, 99.0));
        // left bar maps to negative x
        let (x, _) = map_point(&rendered, 100, 100, 10.0, 0.0);
        assert!(x < 0.0);
    }

    #[test]
    fn letterbox_centres_vertically() {
        // box narrower than the logical aspect: nonzero top offset, zero left
        let rendered = RenderedBox::content(0.0, 0.0, 100.0, 100.0);
        let (x, y) = map_point(&rendered, 100, 50, 0.0, 25.0);
        assert_eq!((x, y), (0.0, 0.0));
        let (_, above) = map_point(&rendered, 100, 50, 0.0, 10.0);
        assert!(above < 0.0);
        let (left_edge, _) = map_point(&rendered, 100, 50, 0.0, 30.0);
        assert_eq!(left_edge, 0.0);
    }

    #[test]
    fn points_inside_the_content_stay_in_range() {
        let rendered = RenderedBox::content(5.0, 7.0, 300.0, 200.0);
        let (lw, lh) = (160u32, 120u32);
        for (px, py) in [(5.0, 7.0), (150.0, 100.0), (304.9, 206.9)] {
            let (x, y) = map_point(&rendered, lw, lh, px, py);
            if (0.0..lw as f64).contains(&x) && (0.0..lh as f64).contains(&y) {
                continue;
            }
            // anything that falls outside must come from the letterbox bars
            let t = transform(&rendered, lw, lh);
            assert!(px < t.left || py < t.top || x >= lw as f64 || y >= lh as f64);
        }
    }
}
