//! Maps normalised detection geometry onto pixel surfaces.
//!
//! Two paths exist and are kept apart on purpose: [`display_viewport`] fits
//! the native frame inside an element of a different aspect ratio (adding
//! letterbox or pillarbox offsets), while [`native_viewport`] covers the
//! frame one-to-one with no offset. Snapshots must use the native path.

use crate::model::Detection;

/// Where the video frame lands on a drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub draw_width: f32,
    pub draw_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fits a `native_width`x`native_height` frame into an element while
/// preserving its aspect ratio.
///
/// Returns `None` while any dimension is unknown (zero), in which case the
/// caller must skip drawing.
#[must_use]
pub fn display_viewport(
    native_width: u32,
    native_height: u32,
    element_width: u32,
    element_height: u32,
) -> Option<Viewport> {
    if native_width == 0 || native_height == 0 || element_width == 0 || element_height == 0 {
        return None;
    }

    let native_w = native_width as f32;
    let native_h = native_height as f32;
    let element_w = element_width as f32;
    let element_h = element_height as f32;

    let video_aspect = native_w / native_h;
    let element_aspect = element_w / element_h;

    let (draw_width, draw_height) = if video_aspect > element_aspect {
        // Wider than the element: bars above and below.
        (element_w, element_w / video_aspect)
    } else {
        // Taller than the element: bars left and right.
        (element_h * video_aspect, element_h)
    };

    Some(Viewport {
        scale: draw_width / native_w,
        offset_x: (element_w - draw_width) / 2.0,
        offset_y: (element_h - draw_height) / 2.0,
        draw_width,
        draw_height,
    })
}

/// One-to-one viewport for drawing at the frame's own resolution.
#[must_use]
pub fn native_viewport(native_width: u32, native_height: u32) -> Option<Viewport> {
    if native_width == 0 || native_height == 0 {
        return None;
    }
    Some(Viewport {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
        draw_width: native_width as f32,
        draw_height: native_height as f32,
    })
}

impl Viewport {
    /// Maps a normalised detection to pixels. Geometry outside `[0, 1]` is
    /// clamped so the box never leaves the drawn video area.
    #[must_use]
    pub fn map(&self, detection: &Detection) -> PixelRect {
        let left = clamp_unit(detection.x);
        let top = clamp_unit(detection.y);
        let right = clamp_unit(detection.x + detection.width.max(0.0)).max(left);
        let bottom = clamp_unit(detection.y + detection.height.max(0.0)).max(top);

        PixelRect {
            x: self.offset_x + left * self.draw_width,
            y: self.offset_y + top * self.draw_height,
            width: (right - left) * self.draw_width,
            height: (bottom - top) * self.draw_height,
        }
    }

    /// True when no letterbox or pillarbox offset applies.
    #[must_use]
    pub fn is_unoffset(&self) -> bool {
        self.offset_x == 0.0 && self.offset_y == 0.0
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::{PixelRect, display_viewport, native_viewport};
    use crate::model::Detection;

    fn detection(x: f32, y: f32, width: f32, height: f32) -> Detection {
        Detection {
            x,
            y,
            width,
            height,
            label: "person".to_owned(),
            confidence: 0.9,
        }
    }

    #[test]
    fn wide_video_in_square_element_is_letterboxed() {
        let viewport = display_viewport(1920, 1080, 800, 800).unwrap();
        assert_eq!(viewport.offset_x, 0.0);
        assert!((viewport.offset_y - 175.0).abs() < 1e-3);
        assert!((viewport.draw_height - 450.0).abs() < 1e-3);
    }

    #[test]
    fn tall_video_in_wide_element_is_pillarboxed() {
        let viewport = display_viewport(1080, 1920, 1600, 900).unwrap();
        assert_eq!(viewport.offset_y, 0.0);
        assert!((viewport.draw_width - 506.25).abs() < 1e-3);
        assert!((viewport.offset_x - 546.875).abs() < 1e-3);
    }

    #[test]
    fn unknown_dimensions_skip_drawing() {
        assert!(display_viewport(0, 1080, 640, 360).is_none());
        assert!(display_viewport(1920, 0, 640, 360).is_none());
        assert!(display_viewport(1920, 1080, 0, 360).is_none());
        assert!(native_viewport(0, 0).is_none());
    }

    #[test]
    fn native_path_has_no_offset() {
        let viewport = native_viewport(1920, 1080).unwrap();
        assert!(viewport.is_unoffset());
        let PixelRect {
            x,
            y,
            width,
            height,
        } = viewport.map(&detection(0.5, 0.5, 0.1, 0.1));
        assert_eq!((x, y), (960.0, 540.0));
        assert!((width - 192.0).abs() < 0.01);
        assert!((height - 108.0).abs() < 0.01);
    }

    #[test]
    fn mapped_boxes_stay_inside_drawn_area_for_all_aspects() {
        let natives = [(1920, 1080), (1080, 1920), (640, 480), (2560, 1080), (704, 576)];
        let elements = [(320, 180), (180, 320), (500, 500), (1280, 400), (97, 53)];
        let boxes = [
            detection(0.0, 0.0, 1.0, 1.0),
            detection(0.9, 0.9, 0.5, 0.5),
            detection(-0.2, 0.4, 0.3, 0.2),
            detection(0.25, 0.25, 0.5, 0.5),
        ];

        for (nw, nh) in natives {
            for (ew, eh) in elements {
                let viewport = display_viewport(nw, nh, ew, eh).unwrap();
                for det in &boxes {
                    let rect = viewport.map(det);
                    let eps = 1e-3;
                    assert!(rect.x >= viewport.offset_x - eps);
                    assert!(rect.y >= viewport.offset_y - eps);
                    assert!(rect.x + rect.width <= viewport.offset_x + viewport.draw_width + eps);
                    assert!(rect.y + rect.height <= viewport.offset_y + viewport.draw_height + eps);
                }
            }
        }
    }
}
