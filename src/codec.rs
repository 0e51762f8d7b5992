//! Barcode codec: mint, validate, format and render product codes.
//!
//! Independent of the capture pipeline. Used to create codes for products
//! that have no physical label yet and to display scanned ones.
//!
//! Key design goals:
//! - **Generated codes are valid EAN-13**: internal-use `2xx` prefix + random
//!   body + computed check digit
//! - **Generation always terminates**: bounded retries, then a time-salted linear search
//! - **Rendering never fails**: any problem degrades to a placeholder box

use base64::Engine as _;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use rand::Rng;
use std::collections::HashSet;
use std::io::Cursor;
use tracing::{debug, warn};

use crate::error::{Result, ScanError};
use crate::symbology::{self, check_digit, Symbology};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// In-store restricted range; never collides with manufacturer-assigned codes.
pub const INTERNAL_PREFIX: &str = "200";
/// Random attempts before falling back to the time-salted construction.
pub const GENERATION_ATTEMPTS: usize = 100;

const BODY_DIGITS: u32 = 9;
const BODY_SPACE: u64 = 1_000_000_000;

/// Quiet zone on each side, in modules.
const QUIET_ZONE_MODULES: u32 = 10;
const MAX_IMAGE_SIDE: u32 = 8192;

// EAN element patterns, 7 modules each, MSB first.
const L_CODES: [u8; 10] = [
    0b0001101, 0b0011001, 0b0010011, 0b0111101, 0b0100011, 0b0110001, 0b0101111, 0b0111011,
    0b0110111, 0b0001011,
];
const G_CODES: [u8; 10] = [
    0b0100111, 0b0110011, 0b0011011, 0b0100001, 0b0011101, 0b0111001, 0b0000101, 0b0010001,
    0b0001001, 0b0010111,
];
const R_CODES: [u8; 10] = [
    0b1110010, 0b1100110, 0b1101100, 0b1000010, 0b1011100, 0b1001110, 0b1010000, 0b1000100,
    0b1001000, 0b1110100,
];
/// Left-half parity for EAN-13, indexed by the first digit. Bit set = G code.
const PARITY: [u8; 10] = [
    0b000000, 0b001011, 0b001101, 0b001110, 0b010011, 0b011001, 0b011100, 0b010101, 0b010110,
    0b011010,
];

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate a fresh internal EAN-13 not present in `existing`.
pub fn generate_code(existing: &HashSet<String>) -> String {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    generate_code_with(existing, &mut rand::thread_rng(), now_ms)
}

/// Generation with an explicit RNG and clock, for deterministic callers.
pub fn generate_code_with<R: Rng + ?Sized>(
    existing: &HashSet<String>,
    rng: &mut R,
    now_ms: u64,
) -> String {
    for _ in 0..GENERATION_ATTEMPTS {
        let body: String = (0..BODY_DIGITS)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        let code = with_check_digit(&body);
        if !existing.contains(&code) {
            return code;
        }
    }

    warn!(
        attempts = GENERATION_ATTEMPTS,
        existing = existing.len(),
        "Code generation collided repeatedly, using time-salted fallback"
    );
    time_salted_code(existing, now_ms)
}

/// Walk the body space starting from the clock. At most `existing.len()`
/// steps can collide, so `existing.len() + 1` steps find a free code
/// whenever one exists; a completely full prefix range returns the salt.
fn time_salted_code(existing: &HashSet<String>, now_ms: u64) -> String {
    let salt = now_ms % BODY_SPACE;
    let max_steps = (existing.len() as u64).saturating_add(1).min(BODY_SPACE);

    for offset in 0..max_steps {
        let body = format!("{:09}", (salt + offset) % BODY_SPACE);
        let code = with_check_digit(&body);
        if !existing.contains(&code) {
            return code;
        }
    }

    warn!("Internal code range exhausted");
    with_check_digit(&format!("{salt:09}"))
}

fn with_check_digit(body: &str) -> String {
    let data = format!("{INTERNAL_PREFIX}{body}");
    let digits: Vec<u8> = data.bytes().map(|b| b - b'0').collect();
    let check = check_digit(&digits);
    format!("{data}{check}")
}

// ---------------------------------------------------------------------------
// Validation and formatting
// ---------------------------------------------------------------------------

/// True iff `code` is 13 digits whose last digit is the weighted mod-10
/// checksum of the first 12.
pub fn validate(code: &str) -> bool {
    symbology::ean13_checksum_matches(code)
}

/// Strip everything but digits.
pub fn unformat(code: &str) -> String {
    code.chars().filter(char::is_ascii_digit).collect()
}

/// Group digits for human readability.
///
/// - 13 digits: `3-4-4-2` (`200 1234 5678 95`)
/// - 12 digits: `1-5-5-1` (UPC-A print layout)
/// - 8 digits: `4-4`
///
/// Other inputs come back trimmed and otherwise unchanged. Already-formatted
/// input is normalized first, so formatting is idempotent.
pub fn format(code: &str) -> String {
    let digits = unformat(code);
    let groups: &[usize] = match digits.len() {
        13 => &[3, 4, 4, 2],
        12 => &[1, 5, 5, 1],
        8 => &[4, 4],
        _ => return code.trim().to_string(),
    };

    let mut out = String::with_capacity(digits.len() + groups.len());
    let mut start = 0;
    for (i, len) in groups.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&digits[start..start + len]);
        start += len;
    }
    out
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn push_pattern(modules: &mut Vec<bool>, pattern: u8, width: u32) {
    for bit in (0..width).rev() {
        modules.push(pattern & (1 << bit) != 0);
    }
}

/// Encode a code into its bar modules (`true` = dark).
///
/// EAN-13 → 95 modules, EAN-8 → 67, UPC-A is encoded as EAN-13 with a
/// leading zero.
pub fn encode_modules(code: &str) -> Result<Vec<bool>> {
    if !symbology::is_all_digits(code) {
        return Err(ScanError::InvalidCode(format!("non-digit input: {code:?}")));
    }
    let d: Vec<u8> = code.bytes().map(|b| b - b'0').collect();

    match Symbology::from_length(d.len()) {
        Some(Symbology::Ean13) => Ok(encode_ean13(&d)),
        Some(Symbology::UpcA) => {
            let mut padded = Vec::with_capacity(13);
            padded.push(0);
            padded.extend_from_slice(&d);
            Ok(encode_ean13(&padded))
        }
        Some(Symbology::Ean8) => Ok(encode_ean8(&d)),
        None => Err(ScanError::InvalidCode(format!(
            "unsupported length {}",
            d.len()
        ))),
    }
}

fn encode_ean13(d: &[u8]) -> Vec<bool> {
    let mut m = Vec::with_capacity(95);
    push_pattern(&mut m, 0b101, 3);
    let parity = PARITY[d[0] as usize];
    for (i, &digit) in d[1..7].iter().enumerate() {
        let use_g = parity & (1 << (5 - i)) != 0;
        let code = if use_g {
            G_CODES[digit as usize]
        } else {
            L_CODES[digit as usize]
        };
        push_pattern(&mut m, code, 7);
    }
    push_pattern(&mut m, 0b01010, 5);
    for &digit in &d[7..13] {
        push_pattern(&mut m, R_CODES[digit as usize], 7);
    }
    push_pattern(&mut m, 0b101, 3);
    m
}

fn encode_ean8(d: &[u8]) -> Vec<bool> {
    let mut m = Vec::with_capacity(67);
    push_pattern(&mut m, 0b101, 3);
    for &digit in &d[..4] {
        push_pattern(&mut m, L_CODES[digit as usize], 7);
    }
    push_pattern(&mut m, 0b01010, 5);
    for &digit in &d[4..] {
        push_pattern(&mut m, R_CODES[digit as usize], 7);
    }
    push_pattern(&mut m, 0b101, 3);
    m
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Output sizing. `width` is the width of one bar module in pixels and
/// `height` the bar height; both are multiplied by `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 2,
            height: 80,
            scale: 1.0,
        }
    }
}

struct Layout {
    module_px: u32,
    bar_px: u32,
    text_px: u32,
    quiet_px: u32,
    total_w: u32,
    total_h: u32,
}

fn layout(modules: usize, opts: &RenderOptions) -> Result<Layout> {
    if !opts.scale.is_finite() || opts.scale <= 0.0 || opts.width == 0 || opts.height == 0 {
        return Err(ScanError::Render(format!("invalid render options {opts:?}")));
    }
    let module_px = ((opts.width as f32 * opts.scale).round() as u32).max(1);
    let bar_px = ((opts.height as f32 * opts.scale).round() as u32).max(1);
    // Digits are drawn 8px tall per text step.
    let text_px = 8 * module_px.clamp(1, 4) + 4;
    let quiet_px = QUIET_ZONE_MODULES * module_px;
    let total_w = (modules as u32)
        .checked_mul(module_px)
        .and_then(|w| w.checked_add(2 * quiet_px))
        .ok_or_else(|| ScanError::Render("image too wide".into()))?;
    let total_h = bar_px + text_px;
    if total_w > MAX_IMAGE_SIDE || total_h > MAX_IMAGE_SIDE {
        return Err(ScanError::Render(format!(
            "image too large ({total_w}x{total_h})"
        )));
    }
    Ok(Layout {
        module_px,
        bar_px,
        text_px,
        quiet_px,
        total_w,
        total_h,
    })
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render `code` as SVG markup. Never fails: anything that can't be drawn as
/// bars comes back as a placeholder box showing the raw text.
pub fn render(code: &str, opts: &RenderOptions) -> String {
    match try_render_svg(code, opts) {
        Ok(svg) => svg,
        Err(e) => {
            debug!(error = %e, "Barcode render degraded to placeholder");
            placeholder_svg(code, opts)
        }
    }
}

fn try_render_svg(code: &str, opts: &RenderOptions) -> Result<String> {
    let modules = encode_modules(code)?;
    let l = layout(modules.len(), opts)?;

    let mut bars = String::new();
    let mut i = 0;
    while i < modules.len() {
        if !modules[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < modules.len() && modules[i] {
            i += 1;
        }
        let x = l.quiet_px + start as u32 * l.module_px;
        let w = (i - start) as u32 * l.module_px;
        bars.push_str(&format!(
            r#"<rect x="{x}" y="0" width="{w}" height="{}"/>"#,
            l.bar_px
        ));
    }

    Ok(format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r##"<rect width="{w}" height="{h}" fill="#ffffff"/>"##,
            r##"<g fill="#000000">{bars}</g>"##,
            r#"<text x="{cx}" y="{ty}" font-family="monospace" font-size="{fs}" text-anchor="middle">{label}</text>"#,
            "</svg>"
        ),
        w = l.total_w,
        h = l.total_h,
        bars = bars,
        cx = l.total_w / 2,
        ty = l.bar_px + l.text_px - 2,
        fs = l.text_px - 4,
        label = esc(&format(code)),
    ))
}

/// Plain box with the raw value, used when bars can't be drawn.
pub fn placeholder_svg(code: &str, opts: &RenderOptions) -> String {
    let scale = if opts.scale.is_finite() && opts.scale > 0.0 {
        opts.scale.min(10.0)
    } else {
        1.0
    };
    let w = ((200.0 * scale).round() as u32).max(40);
    let h = ((opts.height.clamp(20, 400) as f32 * scale).round() as u32).max(20);
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r##"<rect x="1" y="1" width="{iw}" height="{ih}" fill="#f5f5f5" stroke="#999999" stroke-dasharray="4 2"/>"##,
            r##"<text x="{cx}" y="{cy}" font-family="monospace" font-size="14" text-anchor="middle" fill="#333333">{label}</text>"##,
            "</svg>"
        ),
        w = w,
        h = h,
        iw = w - 2,
        ih = h - 2,
        cx = w / 2,
        cy = h / 2 + 5,
        label = esc(code.trim()),
    )
}

/// Render `code` as a `data:image/png;base64,` URL for `<img>` tags and
/// label printers. Falls back to a placeholder SVG data URL on failure.
pub fn render_png_data_url(code: &str, opts: &RenderOptions) -> String {
    match try_render_png(code, opts) {
        Ok(png) => format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ),
        Err(e) => {
            debug!(error = %e, "PNG barcode render degraded to placeholder");
            format!(
                "data:image/svg+xml;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(placeholder_svg(code, opts))
            )
        }
    }
}

fn try_render_png(code: &str, opts: &RenderOptions) -> Result<Vec<u8>> {
    let modules = encode_modules(code)?;
    let l = layout(modules.len(), opts)?;

    let mut img = GrayImage::from_pixel(l.total_w, l.total_h, Luma([255]));
    for (i, &dark) in modules.iter().enumerate() {
        if !dark {
            continue;
        }
        let x0 = l.quiet_px + i as u32 * l.module_px;
        for x in x0..x0 + l.module_px {
            for y in 0..l.bar_px {
                img.put_pixel(x, y, Luma([0]));
            }
        }
    }

    draw_text(&mut img, &format(code), l.bar_px + 2, l.module_px.clamp(1, 4));

    let mut encoded = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|e| ScanError::Render(format!("png encode: {e}")))?;
    Ok(encoded)
}

/// Draw `text` centered horizontally at `top` using the 8x8 bitmap font.
fn draw_text(img: &mut GrayImage, text: &str, top: u32, max_step: u32) {
    let chars = text.chars().count().max(1) as u32;
    let step = (img.width() / (8 * chars)).clamp(1, max_step.max(1));
    let glyph_w = 8 * step;
    let text_w = glyph_w * chars;
    let left = img.width().saturating_sub(text_w) / 2;

    for (n, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch) else {
            continue;
        };
        let gx = left + n as u32 * glyph_w;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..step {
                    for dx in 0..step {
                        let x = gx + col * step + dx;
                        let y = top + row as u32 * step + dy;
                        if x < img.width() && y < img.height() {
                            img.put_pixel(x, y, Luma([0]));
                        }
                    }
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
