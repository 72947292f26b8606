use image::RgbImage;

use crate::rect::PixelRect;

/// A single decoded video frame with metadata.
pub struct Frame {
    /// The frame's image data. May be a crop of the full frame, see `origin`.
    pub image: RgbImage,
    /// Absolute frame number from the start of the source (0-based).
    pub frame_number: u32,
    /// Position of `image`'s top-left pixel in full-frame coordinates.
    pub origin: (u32, u32),
}

impl Frame {
    /// Translate a full-frame rectangle into `image` coordinates, if it is fully inside.
    pub fn local_rect(&self, rect: PixelRect) -> Option<PixelRect> {
        let (ox, oy) = self.origin;
        if rect.x < ox || rect.y < oy {
            return None;
        }
        let local = PixelRect::new(rect.x - ox, rect.y - oy, rect.w, rect.h);
        local
            .fits_within(self.image.width(), self.image.height())
            .then_some(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cropped_frame() -> Frame {
        Frame {
            image: RgbImage::new(100, 10),
            frame_number: 0,
            origin: (400, 300),
        }
    }

    #[test]
    fn local_rect_translates_into_crop() {
        let frame = cropped_frame();
        assert_eq!(
            frame.local_rect(PixelRect::new(400, 300, 100, 10)),
            Some(PixelRect::new(0, 0, 100, 10))
        );
        assert_eq!(
            frame.local_rect(PixelRect::new(450, 305, 10, 5)),
            Some(PixelRect::new(50, 5, 10, 5))
        );
    }

    #[test]
    fn local_rect_rejects_outside_crop() {
        let frame = cropped_frame();
        assert_eq!(frame.local_rect(PixelRect::new(399, 300, 10, 5)), None);
        assert_eq!(frame.local_rect(PixelRect::new(450, 305, 60, 5)), None);
    }
}
