/// Set-of-Marks annotation.
///
/// Turns a raw UI-tree dump into a numbered list of interactive elements and
/// stamps each one onto the screenshot: an outline around the element plus a
/// small badge with the mark number at its top-left corner, so the model can
/// refer to elements by integer id instead of pixel coordinates.
use crate::errors::{SeeTapError, SeeTapResult};
use crate::perception::types::{RawNode, UIElement};

/// Badge/outline color. Chosen to stand out against most app chrome.
const MARK_COLOR: [u8; 4] = [233, 30, 99, 255];
const MARK_TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Elements wider or taller than this are layout containers, not targets.
const MAX_ELEMENT_DIM: i32 = 3000;

/// Walk the dump once, in tree order, assigning sequential mark ids starting
/// at 1 to every interactive node with a valid, non-degenerate bounding box.
/// An empty result is normal for screens with no interactive elements.
pub fn mark_elements(nodes: &[RawNode]) -> Vec<UIElement> {
    let mut elements = Vec::new();
    let mut mark_id = 1u32;

    for node in nodes {
        if !node.clickable {
            continue;
        }
        let Some(bounds) = node.bounds else { continue };
        let (w, h) = (bounds.width(), bounds.height());
        if w <= 0 || h <= 0 || w >= MAX_ELEMENT_DIM || h >= MAX_ELEMENT_DIM {
            continue;
        }
        elements.push(UIElement {
            mark_id,
            bounds,
            text: node.text.clone().filter(|t| !t.trim().is_empty()),
            accessibility_label: node
                .accessibility_label
                .clone()
                .filter(|t| !t.trim().is_empty()),
            element_kind: node.element_kind.clone(),
        });
        mark_id += 1;
    }

    tracing::debug!(
        total = nodes.len(),
        marked = elements.len(),
        "UI dump walked"
    );
    elements
}

/// Resolve a mark id against the current capture's element set.
pub fn find_by_mark(elements: &[UIElement], mark_id: u32) -> Option<&UIElement> {
    elements.iter().find(|e| e.mark_id == mark_id)
}

/// Annotate `src_bytes` (PNG/JPEG) with outlines and numbered badges.
/// Returns PNG-encoded bytes. With no elements the caller should keep the
/// raw screenshot instead; this function still handles that case gracefully.
pub fn draw_marks(src_bytes: &[u8], elements: &[UIElement]) -> SeeTapResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| SeeTapError::Perception(format!("annotate load: {e}")))?;
    let mut canvas = img.to_rgba8();
    let (w, _) = canvas.dimensions();

    // Larger badges on high-res screens so the numbers survive model-side
    // image downscaling.
    let scale: u32 = if w > 1600 { 2 } else { 1 };
    let thickness: i32 = if w > 1600 { 3 } else { 2 };

    for elem in elements {
        let b = elem.bounds;
        draw_rect(&mut canvas, b.left, b.top, b.right - 1, b.bottom - 1, MARK_COLOR, thickness);
        draw_badge(
            &mut canvas,
            b.left.max(0) as u32,
            b.top.max(0) as u32,
            &elem.mark_id.to_string(),
            scale,
        );
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| SeeTapError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);

    for t in 0..thickness {
        let ty = y1 + t;
        let by = y2 - t;
        for x in x1..=x2 {
            if x >= 0 && x < iw {
                if ty >= 0 && ty < ih {
                    blend_pixel(canvas, x as u32, ty as u32, col);
                }
                if by >= 0 && by < ih {
                    blend_pixel(canvas, x as u32, by as u32, col);
                }
            }
        }
    }
    for t in 0..thickness {
        let lx = x1 + t;
        let rx = x2 - t;
        for y in y1..=y2 {
            if y >= 0 && y < ih {
                if lx >= 0 && lx < iw {
                    blend_pixel(canvas, lx as u32, y as u32, col);
                }
                if rx >= 0 && rx < iw {
                    blend_pixel(canvas, rx as u32, y as u32, col);
                }
            }
        }
    }
}

/// Filled badge with the mark number, anchored at the element's top-left.
fn draw_badge(canvas: &mut image::RgbaImage, x: u32, y: u32, label: &str, scale: u32) {
    let (w, h) = canvas.dimensions();
    let char_w = 5 * scale + 1;
    let char_h = 5 * scale;
    let pad = 2 * scale;
    let badge_w = label.len() as u32 * char_w + pad * 2;
    let badge_h = char_h + pad * 2;

    for dy in 0..badge_h {
        for dx in 0..badge_w {
            let px = x + dx;
            let py = y + dy;
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                p.0 = [MARK_COLOR[0], MARK_COLOR[1], MARK_COLOR[2], 255];
            }
        }
    }

    let step = 5 * scale + 1;
    for (i, c) in label.chars().enumerate() {
        let gx = x + pad + i as u32 * step;
        if gx + 5 * scale >= w {
            break;
        }
        draw_digit(canvas, c, gx, y + pad, MARK_TEXT_COLOR, scale);
    }
}

/// Minimal 5x5 digit renderer; `scale` multiplies each font pixel.
fn draw_digit(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let glyph = match c {
        '0'..='9' => DIGIT_FONT[(c as u8 - b'0') as usize],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        blend_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn blend_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5x5 bitmap glyphs for '0'-'9'; bit4 = leftmost pixel of each row.
const DIGIT_FONT: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::Bounds;

    fn clickable(l: i32, t: i32, r: i32, b: i32) -> RawNode {
        RawNode {
            clickable: true,
            bounds: Some(Bounds::new(l, t, r, b)),
            ..Default::default()
        }
    }

    #[test]
    fn mark_ids_are_contiguous_from_one() {
        let nodes = vec![
            clickable(0, 0, 100, 50),
            RawNode { clickable: false, bounds: Some(Bounds::new(0, 0, 10, 10)), ..Default::default() },
            clickable(100, 100, 300, 200),
            clickable(50, 400, 950, 520),
        ];
        let elements = mark_elements(&nodes);
        let ids: Vec<u32> = elements.iter().map(|e| e.mark_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn degenerate_and_oversized_boxes_are_skipped() {
        let nodes = vec![
            clickable(10, 10, 10, 50),       // zero width
            clickable(10, 10, 50, 10),       // zero height
            clickable(0, 0, 4000, 100),      // wider than sanity ceiling
            clickable(20, 20, 120, 70),      // valid
            RawNode { clickable: true, bounds: None, ..Default::default() },
        ];
        let elements = mark_elements(&nodes);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].mark_id, 1);
        assert_eq!(elements[0].bounds.center(), (70, 45));
    }

    #[test]
    fn empty_dump_yields_empty_list() {
        assert!(mark_elements(&[]).is_empty());
    }

    #[test]
    fn find_by_mark_resolves_only_current_ids() {
        let elements = mark_elements(&[clickable(0, 0, 100, 100)]);
        assert!(find_by_mark(&elements, 1).is_some());
        assert!(find_by_mark(&elements, 2).is_none());
    }

    #[test]
    fn draw_marks_produces_png() {
        let img = image::DynamicImage::new_rgba8(200, 200);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let elements = mark_elements(&[clickable(20, 20, 120, 80)]);
        let out = draw_marks(&png, &elements).unwrap();
        let annotated = image::load_from_memory(&out).unwrap().to_rgba8();
        // Outline pixel at the element's top edge carries the mark color.
        let p = annotated.get_pixel(60, 20);
        assert_eq!((p[0], p[1], p[2]), (MARK_COLOR[0], MARK_COLOR[1], MARK_COLOR[2]));
    }
}
