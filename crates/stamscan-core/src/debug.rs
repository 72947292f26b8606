//! Optional visual diagnostics. Detection and tracking behave the same with or without them.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::analysis::tracker::Reading;
use crate::analysis::Candidate;
use crate::event::StaminaEvent;
use crate::rect::PixelRect;
use crate::video::frame::Frame;

const TEXT_SCALE: f32 = 18.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_LINE_HEIGHT: i32 = 20;

const ROI_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
const CANDIDATE_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const SELECTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FALLBACK_COLOR: Rgb<u8> = Rgb([255, 64, 0]);

/// Hooks called at the interesting points of an analysis run. All default to no-ops.
pub trait Diagnostics: Send + Sync {
    fn candidates(&self, _frame: &Frame, _roi: PixelRect, _candidates: &[Candidate]) {}

    fn selected(&self, _frame: &Frame, _rect: PixelRect, _fallback: bool) {}

    fn transition(&self, _frame: &Frame, _rect: PixelRect, _event: &StaminaEvent, _reading: Option<Reading>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}

/// Writes PNG overlays of candidates, the chosen rectangle and transitions into a directory.
pub struct DebugRenderer {
    dir: PathBuf,
    font: Option<FontVec>,
}

impl DebugRenderer {
    pub fn new(dir: &Path, font_path: Option<&Path>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create debug frames directory {}", dir.display()))?;
        info!(?dir, "debug frames directory ready");
        Ok(Self {
            dir: dir.to_path_buf(),
            font: font_path.and_then(load_font),
        })
    }

    fn save(&self, img: &RgbImage, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        img.save(&path)
            .with_context(|| format!("failed to save debug frame to {}", path.display()))?;
        debug!(?path, "saved debug frame");
        Ok(())
    }

    fn draw_lines(&self, img: &mut RgbImage, lines: &[String]) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(TEXT_SCALE);
        let mut y = 4;
        for line in lines {
            draw_text_mut(img, TEXT_COLOR, 4, y, scale, font, line);
            y += TEXT_LINE_HEIGHT;
        }
    }

    fn report(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!(error = %format!("{e:#}"), "debug overlay not written");
        }
    }
}

impl Diagnostics for DebugRenderer {
    fn candidates(&self, frame: &Frame, roi: PixelRect, candidates: &[Candidate]) {
        let mut img = frame.image.clone();
        outline(&mut img, frame, roi, ROI_COLOR);
        for c in candidates {
            outline(&mut img, frame, c.rect, CANDIDATE_COLOR);
        }
        let mut lines = vec![format!("F:{} candidates:{}", frame.frame_number, candidates.len())];
        lines.extend(candidates.iter().take(4).map(|c| c.to_string()));
        self.draw_lines(&mut img, &lines);
        self.report(self.save(&img, &format!("train_{:08}.png", frame.frame_number)));
    }

    fn selected(&self, frame: &Frame, rect: PixelRect, fallback: bool) {
        let mut img = frame.image.clone();
        let color = if fallback { FALLBACK_COLOR } else { SELECTED_COLOR };
        outline(&mut img, frame, rect, color);
        let label = if fallback { "fallback" } else { "selected" };
        self.draw_lines(&mut img, &[format!("{label} {rect}")]);
        self.report(self.save(&img, "selected.png"));
    }

    fn transition(&self, frame: &Frame, rect: PixelRect, event: &StaminaEvent, reading: Option<Reading>) {
        let mut img = frame.image.clone();
        outline(&mut img, frame, rect, SELECTED_COLOR);
        let mut lines = vec![format!("F:{} {}", event.frame_index, event.transition)];
        if let Some(r) = reading {
            lines.push(format!("fill:{:.3} avg:{:.3}", r.ratio, r.smoothed));
        }
        self.draw_lines(&mut img, &lines);
        self.report(self.save(
            &img,
            &format!("event_{:08}_{}.png", event.frame_index, event.transition),
        ));
    }
}

/// Draw a full-frame rectangle onto a frame image that may itself be a crop.
fn outline(img: &mut RgbImage, frame: &Frame, rect: PixelRect, color: Rgb<u8>) {
    let (ox, oy) = frame.origin;
    let x = rect.x as i32 - ox as i32;
    let y = rect.y as i32 - oy as i32;
    if rect.is_empty() {
        return;
    }
    draw_hollow_rect_mut(img, Rect::at(x, y).of_size(rect.w, rect.h), color);
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(?path, error = %e, "failed to read font file");
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => {
            info!(?path, "loaded debug font");
            Some(font)
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to parse font file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::event::Transition;

    fn frame(origin: (u32, u32)) -> Frame {
        Frame {
            image: RgbImage::new(64, 32),
            frame_number: 7,
            origin,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stamscan-debug-{name}-{}", std::process::id()))
    }

    #[test]
    fn outline_respects_crop_origin() {
        let f = frame((100, 50));
        let mut img = f.image.clone();
        outline(&mut img, &f, PixelRect::new(110, 60, 20, 4), SELECTED_COLOR);
        assert_eq!(*img.get_pixel(10, 10), SELECTED_COLOR);
        assert_eq!(*img.get_pixel(29, 13), SELECTED_COLOR);
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    #[traced_test]
    fn renderer_writes_overlays_without_font() {
        let dir = scratch_dir("overlays");
        let renderer = DebugRenderer::new(&dir, Some(Path::new("/nonexistent/font.ttf"))).unwrap();
        assert!(logs_contain("failed to read font file"));

        let f = frame((0, 0));
        let rect = PixelRect::new(4, 4, 30, 3);
        renderer.selected(&f, rect, true);
        renderer.transition(
            &f,
            rect,
            &StaminaEvent {
                frame_index: 7,
                transition: Transition::BecameEmpty,
            },
            None,
        );

        assert!(dir.join("selected.png").exists());
        assert!(dir.join("event_00000007_became_empty.png").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
