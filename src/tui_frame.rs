use crate::mapper::Viewport;
use crate::media::NativeFrame;
use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{Rgba, RgbaImage};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::widgets::Widget;

const UPPER_HALF: &str = "▀";
const LETTERBOX: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Pixel surface size for a tile: one column per cell, two rows per cell.
#[must_use]
pub(crate) fn surface_size(area: Rect) -> (u32, u32) {
    (u32::from(area.width), u32::from(area.height) * 2)
}

/// Scales decoded frames down to tile size. One scaler is shared by every
/// tile; its buffers grow to the largest frame seen.
pub(crate) struct FrameScaler {
    resizer: fir::Resizer,
    options: fir::ResizeOptions,
    src: Vec<u8>,
    dst: Vec<u8>,
}

impl Default for FrameScaler {
    fn default() -> Self {
        Self {
            resizer: fir::Resizer::new(),
            options: fir::ResizeOptions::new()
                .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear)),
            src: Vec::new(),
            dst: Vec::new(),
        }
    }
}

impl FrameScaler {
    /// Paints `frame` into `surface` inside `viewport` with black bars
    /// around it.
    pub(crate) fn paint(
        &mut self,
        surface: &mut RgbaImage,
        frame: &NativeFrame,
        viewport: &Viewport,
    ) -> Result<()> {
        for pixel in surface.pixels_mut() {
            *pixel = LETTERBOX;
        }

        let x0 = viewport.offset_x.round().max(0.0) as u32;
        let y0 = viewport.offset_y.round().max(0.0) as u32;
        let x1 = ((viewport.offset_x + viewport.draw_width).round() as u32).min(surface.width());
        let y1 = ((viewport.offset_y + viewport.draw_height).round() as u32).min(surface.height());
        let (width, height) = (x1.saturating_sub(x0), y1.saturating_sub(y0));
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.src.clone_from(&*frame.rgb);
        self.dst.resize(width as usize * height as usize * 3, 0);
        let src_image = fir::images::Image::from_slice_u8(
            frame.width,
            frame.height,
            self.src.as_mut_slice(),
            fir::PixelType::U8x3,
        )
        .context("frame buffer does not match its dimensions")?;
        let mut dst_image = fir::images::Image::from_slice_u8(
            width,
            height,
            self.dst.as_mut_slice(),
            fir::PixelType::U8x3,
        )
        .context("failed preparing tile buffer")?;
        self.resizer
            .resize(&src_image, &mut dst_image, Some(&self.options))
            .context("frame resize failed")?;

        for (idx, rgb) in self.dst.chunks_exact(3).enumerate() {
            let idx = idx as u32;
            surface.put_pixel(x0 + idx % width, y0 + idx / width, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        }
        Ok(())
    }
}

/// Renders an RGBA surface with upper-half blocks: the glyph takes the top
/// pixel, the cell background the bottom one.
pub(crate) struct HalfBlockImage<'a> {
    image: &'a RgbaImage,
}

impl<'a> HalfBlockImage<'a> {
    pub(crate) fn new(image: &'a RgbaImage) -> Self {
        Self { image }
    }
}

impl Widget for HalfBlockImage<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let cols = area.width.min(u16::try_from(self.image.width()).unwrap_or(u16::MAX));
        let rows = area
            .height
            .min(u16::try_from(self.image.height() / 2).unwrap_or(u16::MAX));
        for row in 0..rows {
            for col in 0..cols {
                let top = self.image.get_pixel(u32::from(col), u32::from(row) * 2);
                let bottom = self.image.get_pixel(u32::from(col), u32::from(row) * 2 + 1);
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_symbol(UPPER_HALF)
                        .set_fg(Color::Rgb(top[0], top[1], top[2]))
                        .set_bg(Color::Rgb(bottom[0], bottom[1], bottom[2]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameScaler, HalfBlockImage, surface_size};
    use crate::mapper::display_viewport;
    use crate::media::NativeFrame;
    use image::{Rgba, RgbaImage};
    use ratatui::buffer::Buffer;
    use ratatui::layout::Rect;
    use ratatui::style::Color;
    use ratatui::widgets::Widget;
    use std::sync::Arc;

    #[test]
    fn cells_carry_two_pixels() {
        let mut image = RgbaImage::new(1, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        let area = Rect::new(0, 0, 1, 1);
        let mut buf = Buffer::empty(area);
        HalfBlockImage::new(&image).render(area, &mut buf);

        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(0, 0, 255));
    }

    #[test]
    fn wide_frames_are_letterboxed() {
        let (width, height) = surface_size(Rect::new(0, 0, 40, 20));
        assert_eq!((width, height), (40, 40));
        let frame = NativeFrame {
            width: 16,
            height: 9,
            seq: 1,
            epoch: 1,
            rgb: Arc::new(vec![200; 16 * 9 * 3]),
        };
        let viewport = display_viewport(16, 9, width, height).unwrap();
        let mut surface = RgbaImage::new(width, height);
        FrameScaler::default()
            .paint(&mut surface, &frame, &viewport)
            .unwrap();

        assert_eq!(surface.get_pixel(20, 0).0, [0, 0, 0, 255]);
        assert_eq!(surface.get_pixel(20, 20).0, [200, 200, 200, 255]);
        assert_eq!(surface.get_pixel(20, 39).0, [0, 0, 0, 255]);
    }
}
