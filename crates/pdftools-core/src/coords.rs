//! Coordinate transformation between the rendered page and PDF space
//!
//! A click is mapped to *top-left-relative* document coordinates. The
//! vertical flip into PDF space happens later, when an element is written,
//! using the height of the page it lands on.

use crate::loader::PageSize;
use serde::{Deserialize, Serialize};

/// A point in document units, origin at the page's top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: f64,
    pub y: f64,
}

/// Convert a pointer position in screen pixels to document units.
///
/// No bounds check is applied; see [`map_click`].
pub fn to_page_space(
    click_x: f64,
    click_y: f64,
    render_origin_x: f64,
    render_origin_y: f64,
    scale: f64,
) -> (f64, f64) {
    let rel_x = click_x - render_origin_x;
    let rel_y = click_y - render_origin_y;
    (rel_x / scale, rel_y / scale)
}

/// Map a click on a page rendered at `scale` into document units.
///
/// Returns `None` when the click falls outside the page or the scale is not
/// a positive finite number, so the caller records nothing.
pub fn map_click(
    click_x: f64,
    click_y: f64,
    render_origin_x: f64,
    render_origin_y: f64,
    scale: f64,
    page: PageSize,
) -> Option<PagePoint> {
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }
    let (x, y) = to_page_space(click_x, click_y, render_origin_x, render_origin_y, scale);
    if !(0.0..=page.width).contains(&x) || !(0.0..=page.height).contains(&y) {
        return None;
    }
    Some(PagePoint { x, y })
}

/// PDF-space baseline for text placed at top-relative `y`
pub fn text_baseline_y(page_height: f64, y: f64) -> f64 {
    page_height - y
}

/// PDF-space lower edge for an image whose top edge is at top-relative `y`
pub fn image_origin_y(page_height: f64, y: f64, height: f64) -> f64 {
    page_height - y - height
}

/// Viewer zoom, clamped to configured limits and stepped in fixed increments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    scale: f64,
    min: f64,
    max: f64,
    step: f64,
}

impl Default for Zoom {
    fn default() -> Self {
        Self::new(1.0, 0.5, 2.0, 0.25)
    }
}

impl Zoom {
    pub fn new(initial: f64, min: f64, max: f64, step: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            scale: initial.clamp(min, max),
            min,
            max,
            step,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set(&mut self, scale: f64) -> f64 {
        if scale.is_finite() {
            self.scale = scale.clamp(self.min, self.max);
        }
        self.scale
    }

    pub fn zoom_in(&mut self) -> f64 {
        self.set(self.scale + self.step)
    }

    pub fn zoom_out(&mut self) -> f64 {
        self.set(self.scale - self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LETTER: PageSize = PageSize::LETTER;

    #[test]
    fn test_map_click_subtracts_origin_and_scale() {
        let point = map_click(250.0, 130.0, 50.0, 30.0, 2.0, LETTER).unwrap();
        assert_eq!(point, PagePoint { x: 100.0, y: 50.0 });
    }

    #[test]
    fn test_map_click_keeps_top_left_origin() {
        // Top of the rendered page stays y = 0; the flip is deferred
        let point = map_click(10.0, 0.0, 0.0, 0.0, 1.0, LETTER).unwrap();
        assert_eq!(point.y, 0.0);
    }

    #[test]
    fn test_map_click_rejects_outside_page() {
        assert!(map_click(-1.0, 10.0, 0.0, 0.0, 1.0, LETTER).is_none());
        assert!(map_click(10.0, -0.5, 0.0, 0.0, 1.0, LETTER).is_none());
        // 613 / 1.0 exceeds the width
        assert!(map_click(613.0, 10.0, 0.0, 0.0, 1.0, LETTER).is_none());
        // 1600 / 2.0 = 800 exceeds the height
        assert!(map_click(10.0, 1600.0, 0.0, 0.0, 2.0, LETTER).is_none());
    }

    #[test]
    fn test_map_click_accepts_edges() {
        assert!(map_click(0.0, 0.0, 0.0, 0.0, 1.0, LETTER).is_some());
        assert!(map_click(612.0, 792.0, 0.0, 0.0, 1.0, LETTER).is_some());
    }

    #[test]
    fn test_map_click_rejects_bad_scale() {
        assert!(map_click(10.0, 10.0, 0.0, 0.0, 0.0, LETTER).is_none());
        assert!(map_click(10.0, 10.0, 0.0, 0.0, -1.0, LETTER).is_none());
        assert!(map_click(10.0, 10.0, 0.0, 0.0, f64::NAN, LETTER).is_none());
    }

    #[test]
    fn test_flip_uses_destination_height() {
        let point = map_click(100.0, 100.0, 0.0, 0.0, 1.0, LETTER).unwrap();
        // Same stored point, two different destination pages
        assert_eq!(text_baseline_y(792.0, point.y), 692.0);
        assert_eq!(text_baseline_y(595.0, point.y), 495.0);
    }

    #[test]
    fn test_text_flip_edges() {
        assert_eq!(text_baseline_y(792.0, 0.0), 792.0);
        assert_eq!(text_baseline_y(792.0, 792.0), 0.0);
    }

    #[test]
    fn test_image_origin_offsets_by_height() {
        assert_eq!(image_origin_y(792.0, 0.0, 200.0), 592.0);
        assert_eq!(image_origin_y(792.0, 592.0, 200.0), 0.0);
    }

    #[test]
    fn test_zoom_clamps_and_steps() {
        let mut zoom = Zoom::default();
        assert_eq!(zoom.scale(), 1.0);
        assert_eq!(zoom.zoom_in(), 1.25);
        for _ in 0..10 {
            zoom.zoom_in();
        }
        assert_eq!(zoom.scale(), 2.0);
        for _ in 0..10 {
            zoom.zoom_out();
        }
        assert_eq!(zoom.scale(), 0.5);
        assert_eq!(zoom.set(7.0), 2.0);
        assert_eq!(zoom.set(f64::NAN), 2.0);
    }

    #[test]
    fn test_zoom_initial_is_clamped() {
        assert_eq!(Zoom::new(0.1, 0.5, 2.0, 0.25).scale(), 0.5);
    }
}
