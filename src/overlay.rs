//! Paints detection boxes and labels onto RGBA pixel surfaces.

use crate::mapper::{PixelRect, Viewport};
use crate::model::Detection;
use crate::theme::OverlayColors;
use anyhow::{Result, anyhow};
use image::{Rgba, RgbaImage};
use rusttype::{Font, Scale, point};

const BASE_LINE_WIDTH: f32 = 2.0;
const BASE_FONT_PX: f32 = 14.0;
const BASE_LABEL_PADDING: f32 = 2.0;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Scale applied to line width and font size so boxes stay legible both on
/// small terminal tiles and on full-resolution snapshots.
#[must_use]
pub fn size_factor(width: u32, height: u32) -> f32 {
    (width.min(height) as f32 / 500.0).max(1.0)
}

pub struct OverlayRenderer {
    font: Font<'static>,
    colors: OverlayColors,
}

impl OverlayRenderer {
    pub fn new(colors: OverlayColors) -> Result<Self> {
        let font = Font::try_from_bytes(ttf_firacode::REGULAR)
            .ok_or_else(|| anyhow!("embedded label font failed to load"))?;
        Ok(Self { font, colors })
    }

    /// Clears the whole overlay and draws the current detection set.
    ///
    /// A missing viewport (native size not known yet) leaves the overlay
    /// empty rather than drawing against stale dimensions.
    pub fn repaint(
        &self,
        canvas: &mut RgbaImage,
        viewport: Option<&Viewport>,
        detections: &[Detection],
    ) {
        clear(canvas);
        if let Some(viewport) = viewport {
            self.draw_detections(canvas, viewport, detections);
        }
    }

    /// Draws detections on top of whatever the surface already holds.
    pub fn draw_detections(
        &self,
        surface: &mut RgbaImage,
        viewport: &Viewport,
        detections: &[Detection],
    ) {
        let factor = size_factor(surface.width(), surface.height());
        for detection in detections {
            let rect = viewport.map(detection);
            self.draw_box(
                surface,
                rect,
                &detection.label,
                detection.confidence,
                factor,
            );
        }
    }

    fn draw_box(
        &self,
        surface: &mut RgbaImage,
        rect: PixelRect,
        label: &str,
        confidence: f32,
        factor: f32,
    ) {
        let stroke = opaque(self.colors.stroke);
        let line = (BASE_LINE_WIDTH * factor).round().max(1.0) as i64;

        let x0 = rect.x.floor() as i64;
        let y0 = rect.y.floor() as i64;
        let x1 = (rect.x + rect.width).ceil() as i64;
        let y1 = (rect.y + rect.height).ceil() as i64;
        let box_w = (x1 - x0).max(1);
        let box_h = (y1 - y0).max(1);

        fill_rect(surface, x0, y0, box_w, line.min(box_h), stroke);
        fill_rect(surface, x0, y1 - line, box_w, line.min(box_h), stroke);
        fill_rect(surface, x0, y0, line.min(box_w), box_h, stroke);
        fill_rect(surface, x1 - line, y0, line.min(box_w), box_h, stroke);

        let text = label_text(label, confidence);
        let font_px = BASE_FONT_PX * factor;
        let scale = Scale::uniform(font_px);
        let padding = (BASE_LABEL_PADDING * factor).round() as i64;
        let text_w = self.measure_text(&text, scale).ceil() as i64;
        let label_w = text_w + padding * 2;
        let label_h = font_px.ceil() as i64 + padding * 2;

        // Above the box when there is room, otherwise tucked inside its top edge.
        let label_y = if y0 >= label_h { y0 - label_h } else { y0 };
        fill_rect(
            surface,
            x0,
            label_y,
            label_w,
            label_h,
            opaque(self.colors.label_background),
        );

        let ascent = self.font.v_metrics(scale).ascent;
        let origin = point(
            (x0 + padding) as f32,
            (label_y + padding) as f32 + ascent,
        );
        let ink = self.colors.label_text;
        for glyph in self.font.layout(&text, scale, origin) {
            let Some(bounds) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = i64::from(bounds.min.x) + i64::from(gx);
                let py = i64::from(bounds.min.y) + i64::from(gy);
                blend_pixel(surface, px, py, ink, coverage);
            });
        }
    }

    /// Width in pixels of `text` laid out at `scale`.
    #[must_use]
    pub fn measure_text(&self, text: &str, scale: Scale) -> f32 {
        self.font
            .layout(text, scale, point(0.0, 0.0))
            .last()
            .map_or(0.0, |glyph| {
                glyph.position().x + glyph.unpositioned().h_metrics().advance_width
            })
    }
}

#[must_use]
pub fn label_text(label: &str, confidence: f32) -> String {
    let percent = (confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
    let label = label.trim();
    if label.is_empty() {
        format!("{percent}%")
    } else {
        format!("{label} {percent}%")
    }
}

pub fn clear(canvas: &mut RgbaImage) {
    for pixel in canvas.pixels_mut() {
        *pixel = TRANSPARENT;
    }
}

/// Alpha-blends `overlay` onto `dest`. Both must share dimensions; extra
/// pixels of the larger image are ignored.
pub fn composite(dest: &mut RgbaImage, overlay: &RgbaImage) {
    let width = dest.width().min(overlay.width());
    let height = dest.height().min(overlay.height());
    for y in 0..height {
        for x in 0..width {
            let src = overlay.get_pixel(x, y);
            if src[3] == 0 {
                continue;
            }
            let coverage = f32::from(src[3]) / 255.0;
            blend_pixel(
                dest,
                i64::from(x),
                i64::from(y),
                [src[0], src[1], src[2]],
                coverage,
            );
        }
    }
}

fn opaque(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], 255])
}

fn fill_rect(surface: &mut RgbaImage, x: i64, y: i64, width: i64, height: i64, color: Rgba<u8>) {
    let surface_w = i64::from(surface.width());
    let surface_h = i64::from(surface.height());
    let left = x.max(0);
    let top = y.max(0);
    let right = (x + width).min(surface_w);
    let bottom = (y + height).min(surface_h);
    if left >= right || top >= bottom {
        return;
    }
    for py in top..bottom {
        for px in left..right {
            // Bounds are clamped to the surface above.
            surface.put_pixel(px as u32, py as u32, color);
        }
    }
}

fn blend_pixel(surface: &mut RgbaImage, x: i64, y: i64, rgb: [u8; 3], coverage: f32) {
    if x < 0 || y < 0 || x >= i64::from(surface.width()) || y >= i64::from(surface.height()) {
        return;
    }
    let alpha = coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let dst = surface.get_pixel_mut(x as u32, y as u32);
    let keep = 1.0 - alpha;
    for channel in 0..3 {
        let mixed = f32::from(rgb[channel]) * alpha + f32::from(dst[channel]) * keep;
        dst[channel] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    let out_alpha = alpha + f32::from(dst[3]) / 255.0 * keep;
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::{OverlayRenderer, composite, label_text, size_factor};
    use crate::mapper::{display_viewport, native_viewport};
    use crate::model::Detection;
    use crate::theme::OverlayColors;
    use image::{Rgba, RgbaImage};

    fn person(x: f32, y: f32) -> Detection {
        Detection {
            x,
            y,
            width: 0.2,
            height: 0.2,
            label: "person".to_owned(),
            confidence: 0.87,
        }
    }

    #[test]
    fn size_factor_never_drops_below_one() {
        assert_eq!(size_factor(320, 180), 1.0);
        assert!((size_factor(1920, 1080) - 2.16).abs() < 1e-4);
    }

    #[test]
    fn labels_show_whole_percent() {
        assert_eq!(label_text("car", 0.456), "car 46%");
        assert_eq!(label_text("  ", 1.4), "100%");
    }

    #[test]
    fn repaint_clears_previous_detections() {
        let renderer = OverlayRenderer::new(OverlayColors::default()).unwrap();
        let mut canvas = RgbaImage::new(200, 120);
        let viewport = native_viewport(200, 120).unwrap();

        renderer.repaint(&mut canvas, Some(&viewport), &[person(0.4, 0.5)]);
        assert!(canvas.pixels().any(|p| p[3] != 0));

        renderer.repaint(&mut canvas, Some(&viewport), &[]);
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn repaint_without_viewport_draws_nothing() {
        let renderer = OverlayRenderer::new(OverlayColors::default()).unwrap();
        let mut canvas = RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 255]));
        renderer.repaint(&mut canvas, display_viewport(0, 0, 64, 64).as_ref(), &[person(0.1, 0.1)]);
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn stroke_lands_on_letterboxed_position() {
        let renderer = OverlayRenderer::new(OverlayColors::default()).unwrap();
        // 16:9 video in a square surface: 25 px bars above and below.
        let mut canvas = RgbaImage::new(160, 140);
        let viewport = display_viewport(1920, 1080, 160, 140).unwrap();
        let offset_y = viewport.offset_y.round() as u32;
        renderer.repaint(&mut canvas, Some(&viewport), &[person(0.5, 0.5)]);

        let top_left_y = offset_y + 45;
        assert_eq!(canvas.get_pixel(80, top_left_y)[1], 255);
        assert_eq!(canvas.get_pixel(79, top_left_y + 4)[3], 0);
    }

    #[test]
    fn composite_keeps_transparent_pixels() {
        let mut frame = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut overlay = RgbaImage::new(4, 4);
        overlay.put_pixel(1, 1, Rgba([0, 255, 0, 255]));
        composite(&mut frame, &overlay);
        assert_eq!(*frame.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*frame.get_pixel(1, 1), Rgba([0, 255, 0, 255]));
    }
}
