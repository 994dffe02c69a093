//! Fonts for the content renderer
//!
//! Glyph outlines come from the font program embedded in the PDF when
//! ttf-parser can read it (TrueType and OpenType). Fonts that are not
//! embedded, or whose program is bare CFF or Type 1, are drawn with a
//! substitute face: an installed system font on native targets, otherwise a
//! face bundled with the crate. Substitute glyphs are squeezed to the
//! widths the PDF declares so text keeps its layout.

use crate::loader::{obj_to_f64, resolve};
use lopdf::{Dictionary, Document, Object, Stream};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tiny_skia::{Path, PathBuilder};
use ttf_parser::{Face, GlyphId, OutlineBuilder, PlatformId};
use tracing::debug;

/// Helvetica advance widths for codes 32..=126, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

/// WinAnsi codes 0x80..=0x9F that differ from Latin-1
const WIN_ANSI_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž', '\u{8F}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9D}', 'ž', 'Ÿ',
];

/// Generic family of a font, used to pick a substitute face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Family {
    Sans,
    Serif,
    Mono,
}

impl Family {
    fn of(base_font: &str) -> Self {
        let name = base_font.to_ascii_lowercase();
        if name.contains("courier") || name.contains("mono") {
            Family::Mono
        } else if name.contains("times") || (name.contains("serif") && !name.contains("sans")) {
            Family::Serif
        } else {
            Family::Sans
        }
    }
}

/// Where a font's outlines come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaceSource {
    Embedded,
    System,
    Bundled,
}

#[derive(Debug, Clone)]
enum FaceData {
    Owned(Arc<Vec<u8>>),
    Static(&'static [u8]),
}

impl FaceData {
    fn bytes(&self) -> &[u8] {
        match self {
            FaceData::Owned(data) => data,
            FaceData::Static(data) => data,
        }
    }
}

/// A font resource ready for drawing
#[derive(Debug)]
pub(crate) struct LoadedFont {
    base_font: String,
    /// Type0 fonts with two-byte codes
    two_byte: bool,
    /// Per-code advance, 1/1000 em
    widths: HashMap<u16, f64>,
    default_width: Option<f64>,
    /// Type3 glyph space to text space factor, 1/1000 em
    width_scale: f64,
    to_unicode: HashMap<u16, String>,
    differences: HashMap<u8, String>,
    cid_to_gid: Option<Vec<u16>>,
    face: FaceData,
    source: FaceSource,
    glyphs: RefCell<HashMap<u16, Option<Path>>>,
}

impl LoadedFont {
    /// Read a `/Font` dictionary. Never fails: unreadable parts fall back to
    /// a substitute face and standard metrics.
    pub(crate) fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let subtype = name_of(doc, dict, b"Subtype").unwrap_or_default();
        let base_font = name_of(doc, dict, b"BaseFont")
            .map(|name| strip_subset_prefix(&name).to_string())
            .unwrap_or_else(|| "Helvetica".to_string());
        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_stream().ok())
            .and_then(|stream| stream_data(stream))
            .map(|data| parse_to_unicode(&data))
            .unwrap_or_default();

        let mut font = if subtype == "Type0" {
            Self::composite(doc, dict, base_font)
        } else {
            Self::simple(doc, dict, base_font, subtype == "Type3")
        };
        font.to_unicode = to_unicode;
        debug!(font = %font.base_font, source = ?font.source, "Loaded font");
        font
    }

    /// Helvetica stand-in for a `Tf` naming a missing resource
    pub(crate) fn fallback() -> Self {
        let (face, source) = substitute_face(Family::Sans, "Helvetica");
        Self::new("Helvetica".to_string(), false, face, source)
    }

    fn new(base_font: String, two_byte: bool, face: FaceData, source: FaceSource) -> Self {
        Self {
            base_font,
            two_byte,
            widths: HashMap::new(),
            default_width: None,
            width_scale: 1.0,
            to_unicode: HashMap::new(),
            differences: HashMap::new(),
            cid_to_gid: None,
            face,
            source,
            glyphs: RefCell::new(HashMap::new()),
        }
    }

    fn simple(doc: &Document, dict: &Dictionary, base_font: String, type3: bool) -> Self {
        let descriptor = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok());
        let (face, source) = descriptor
            .and_then(|descriptor| embedded_face(doc, descriptor))
            .map(|data| (FaceData::Owned(Arc::new(data)), FaceSource::Embedded))
            .unwrap_or_else(|| substitute_face(Family::of(&base_font), &base_font));

        let mut font = Self::new(base_font, false, face, source);
        font.default_width = descriptor
            .and_then(|descriptor| descriptor.get(b"MissingWidth").ok())
            .and_then(|obj| obj_to_f64(resolve(doc, obj)))
            .filter(|width| *width > 0.0);

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|obj| obj_to_f64(resolve(doc, obj)))
            .unwrap_or(0.0)
            .max(0.0) as u16;
        if let Some(widths) = dict
            .get(b"Widths")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_array().ok())
        {
            for (offset, width) in widths.iter().enumerate() {
                let Some(code) = u16::try_from(offset)
                    .ok()
                    .and_then(|offset| first_char.checked_add(offset))
                else {
                    break;
                };
                if let Some(width) = obj_to_f64(resolve(doc, width)) {
                    font.widths.insert(code, width.max(0.0));
                }
            }
        }

        if type3 {
            font.width_scale = dict
                .get(b"FontMatrix")
                .ok()
                .and_then(|obj| resolve(doc, obj).as_array().ok())
                .and_then(|matrix| matrix.first())
                .and_then(obj_to_f64)
                .map(|a| a * 1000.0)
                .unwrap_or(1.0);
        }

        if let Some(encoding) = dict
            .get(b"Encoding")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
        {
            font.differences = parse_differences(doc, encoding);
        }
        font
    }

    fn composite(doc: &Document, dict: &Dictionary, base_font: String) -> Self {
        let descendant = dict
            .get(b"DescendantFonts")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_array().ok())
            .and_then(|fonts| fonts.first())
            .and_then(|obj| resolve(doc, obj).as_dict().ok());
        let embedded = descendant
            .and_then(|cid_font| cid_font.get(b"FontDescriptor").ok())
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
            .and_then(|descriptor| embedded_face(doc, descriptor));
        let (face, source) = match embedded {
            Some(data) => (FaceData::Owned(Arc::new(data)), FaceSource::Embedded),
            None => substitute_face(Family::of(&base_font), &base_font),
        };

        let mut font = Self::new(base_font, true, face, source);
        font.default_width = Some(1000.0);
        if let Some(cid_font) = descendant {
            if let Some(dw) = cid_font.get(b"DW").ok().and_then(|obj| obj_to_f64(resolve(doc, obj))) {
                font.default_width = Some(dw.max(0.0));
            }
            if let Some(w) = cid_font.get(b"W").ok().and_then(|obj| resolve(doc, obj).as_array().ok()) {
                font.widths = parse_cid_widths(doc, w);
            }
            font.cid_to_gid = cid_font
                .get(b"CIDToGIDMap")
                .ok()
                .and_then(|obj| resolve(doc, obj).as_stream().ok())
                .and_then(|stream| stream_data(stream))
                .map(|data| {
                    data.chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect()
                });
        }
        font
    }

    pub(crate) fn source(&self) -> FaceSource {
        self.source
    }

    /// Character codes of a string operand
    pub(crate) fn codes(&self, bytes: &[u8]) -> Vec<u16> {
        if self.two_byte {
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            bytes.iter().map(|&b| u16::from(b)).collect()
        }
    }

    /// Word spacing applies to the single-byte code 32 only
    pub(crate) fn is_word_space(&self, code: u16) -> bool {
        !self.two_byte && code == 32
    }

    /// Horizontal advance of `code` in text space units (1/1000 em)
    pub(crate) fn width(&self, code: u16) -> f64 {
        if let Some(width) = self.widths.get(&code) {
            return width * self.width_scale;
        }
        if self.widths.is_empty() && !self.two_byte {
            if let Some(width) = standard_width(&self.base_font, code) {
                return width;
            }
        }
        if let Some(width) = self.default_width {
            return width;
        }
        self.face_advance(code).unwrap_or(500.0)
    }

    /// Outline of `code` in em units, baseline origin, y up
    pub(crate) fn glyph(&self, code: u16) -> Option<Path> {
        if let Some(cached) = self.glyphs.borrow().get(&code) {
            return cached.clone();
        }
        let path = self.build_glyph(code);
        self.glyphs.borrow_mut().insert(code, path.clone());
        path
    }

    fn build_glyph(&self, code: u16) -> Option<Path> {
        let face = Face::parse(self.face.bytes(), 0).ok()?;
        let glyph = self.glyph_id(&face, code)?;
        let units = f32::from(face.units_per_em().max(1));

        // Substitutes are squeezed to the declared advance
        let mut x_scale = 1.0 / units;
        if self.source != FaceSource::Embedded {
            if let Some(advance) = face.glyph_hor_advance(glyph).filter(|a| *a > 0) {
                let declared = self.width(code) as f32 / 1000.0;
                let natural = f32::from(advance) / units;
                if declared > 0.0 {
                    x_scale *= (declared / natural).clamp(0.5, 2.0);
                }
            }
        }

        let mut builder = GlyphPathBuilder {
            builder: PathBuilder::new(),
            x_scale,
            y_scale: 1.0 / units,
        };
        face.outline_glyph(glyph, &mut builder)?;
        builder.builder.finish()
    }

    fn glyph_id(&self, face: &Face, code: u16) -> Option<GlyphId> {
        if self.two_byte && self.source == FaceSource::Embedded {
            let gid = match &self.cid_to_gid {
                Some(map) => *map.get(usize::from(code))?,
                None => code,
            };
            return Some(GlyphId(gid));
        }
        if self.source == FaceSource::Embedded {
            if let Some(name) = u8::try_from(code).ok().and_then(|c| self.differences.get(&c)) {
                if let Some(glyph) = face.glyph_index_by_name(name) {
                    return Some(glyph);
                }
            }
        }
        if let Some(glyph) = self
            .unicode(code)
            .and_then(|text| text.chars().next())
            .and_then(|ch| face.glyph_index(ch))
        {
            return Some(glyph);
        }
        if self.source == FaceSource::Embedded {
            return symbolic_glyph(face, code);
        }
        None
    }

    /// Text a code stands for, from ToUnicode or the simple-font encoding
    pub(crate) fn unicode(&self, code: u16) -> Option<String> {
        if let Some(text) = self.to_unicode.get(&code) {
            return Some(text.clone());
        }
        if self.two_byte {
            return None;
        }
        let byte = u8::try_from(code).ok()?;
        if let Some(name) = self.differences.get(&byte) {
            return glyph_name_char(name).map(String::from);
        }
        win_ansi_char(byte).map(String::from)
    }

    fn face_advance(&self, code: u16) -> Option<f64> {
        let face = Face::parse(self.face.bytes(), 0).ok()?;
        let glyph = self.glyph_id(&face, code)?;
        let advance = face.glyph_hor_advance(glyph)?;
        Some(f64::from(advance) * 1000.0 / f64::from(face.units_per_em().max(1)))
    }
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    x_scale: f32,
    y_scale: f32,
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x * self.x_scale, y * self.y_scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x * self.x_scale, y * self.y_scale);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            x1 * self.x_scale,
            y1 * self.y_scale,
            x * self.x_scale,
            y * self.y_scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            x1 * self.x_scale,
            y1 * self.y_scale,
            x2 * self.x_scale,
            y2 * self.y_scale,
            x * self.x_scale,
            y * self.y_scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Symbolic TrueType lookup through the (3,0) or (1,0) cmap
fn symbolic_glyph(face: &Face, code: u16) -> Option<GlyphId> {
    let cmap = face.tables().cmap?;
    for subtable in cmap.subtables {
        let code = u32::from(code);
        let candidates = match (subtable.platform_id, subtable.encoding_id) {
            (PlatformId::Windows, 0) => [code, 0xF000 + code],
            (PlatformId::Macintosh, 0) => [code, code],
            _ => continue,
        };
        if let Some(glyph) = candidates.iter().find_map(|&c| subtable.glyph_index(c)) {
            return Some(glyph);
        }
    }
    None
}

fn name_of(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let name = resolve(doc, dict.get(key).ok()?).as_name().ok()?;
    Some(String::from_utf8_lossy(name).into_owned())
}

/// `ABCDEF+Helvetica` -> `Helvetica`
fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

pub(crate) fn stream_data(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

/// TrueType or OpenType program from a font descriptor
fn embedded_face(doc: &Document, descriptor: &Dictionary) -> Option<Vec<u8>> {
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        let Some(stream) = descriptor
            .get(key)
            .ok()
            .and_then(|obj| resolve(doc, obj).as_stream().ok())
        else {
            continue;
        };
        let data = stream_data(stream)?;
        if Face::parse(&data, 0).is_ok() {
            return Some(data);
        }
    }
    None
}

#[cfg(not(target_arch = "wasm32"))]
fn system_face(family: Family, base_font: &str) -> Option<Arc<Vec<u8>>> {
    system::face_for(family, base_font)
}

#[cfg(target_arch = "wasm32")]
fn system_face(_: Family, _: &str) -> Option<Arc<Vec<u8>>> {
    None
}

fn substitute_face(family: Family, base_font: &str) -> (FaceData, FaceSource) {
    if let Some(data) = system_face(family, base_font) {
        return (FaceData::Owned(data), FaceSource::System);
    }
    let data = match family {
        Family::Mono => epaint_default_fonts::HACK_REGULAR,
        Family::Sans | Family::Serif => epaint_default_fonts::UBUNTU_LIGHT,
    };
    (FaceData::Static(data), FaceSource::Bundled)
}

fn standard_width(base_font: &str, code: u16) -> Option<f64> {
    let name = base_font.to_ascii_lowercase();
    if name.starts_with("courier") {
        return Some(600.0);
    }
    if name.starts_with("helvetica") || name.starts_with("arial") {
        let index = usize::from(code.checked_sub(32)?);
        return HELVETICA_WIDTHS.get(index).map(|&w| f64::from(w));
    }
    None
}

fn win_ansi_char(byte: u8) -> Option<char> {
    match byte {
        0x80..=0x9F => Some(WIN_ANSI_HIGH[usize::from(byte - 0x80)]),
        0x20..=0x7E | 0xA0..=0xFF => Some(char::from(byte)),
        _ => None,
    }
}

/// Unicode value of a standard glyph name
fn glyph_name_char(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("uni").filter(|hex| hex.len() == 4) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return ch.is_ascii_alphabetic().then_some(ch);
    }
    let ch = match name {
        "space" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "asciicircum" => '^',
        "underscore" => '_',
        "grave" => '`',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "asciitilde" => '~',
        "quoteleft" => '‘',
        "quoteright" => '’',
        "quotedblleft" => '“',
        "quotedblright" => '”',
        "endash" => '–',
        "emdash" => '—',
        "bullet" => '•',
        "ellipsis" => '…',
        _ => return None,
    };
    Some(ch)
}

/// `/Differences [code /name /name code /name ...]`
fn parse_differences(doc: &Document, encoding: &Dictionary) -> HashMap<u8, String> {
    let mut out = HashMap::new();
    let Some(items) = encoding
        .get(b"Differences")
        .ok()
        .and_then(|obj| resolve(doc, obj).as_array().ok())
    else {
        return out;
    };
    let mut code: Option<u32> = None;
    for item in items {
        match resolve(doc, item) {
            Object::Name(name) => {
                if let Some(current) = code {
                    if let Ok(byte) = u8::try_from(current) {
                        out.insert(byte, String::from_utf8_lossy(name).into_owned());
                    }
                    code = Some(current + 1);
                }
            }
            other => {
                code = obj_to_f64(other).filter(|v| *v >= 0.0).map(|v| v as u32);
            }
        }
    }
    out
}

/// CIDFont `/W`: `c [w1 w2 ...]` or `c_first c_last w`
fn parse_cid_widths(doc: &Document, items: &[Object]) -> HashMap<u16, f64> {
    let mut out = HashMap::new();
    let mut i = 0;
    while i + 1 < items.len() {
        let Some(first) = obj_to_f64(resolve(doc, &items[i])).map(|v| v as u32) else {
            i += 1;
            continue;
        };
        match resolve(doc, &items[i + 1]) {
            Object::Array(widths) => {
                for (offset, width) in widths.iter().enumerate() {
                    let cid = first.saturating_add(offset as u32);
                    if let (Ok(cid), Some(width)) = (u16::try_from(cid), obj_to_f64(resolve(doc, width))) {
                        out.insert(cid, width.max(0.0));
                    }
                }
                i += 2;
            }
            last => {
                let (Some(last), Some(width)) = (
                    obj_to_f64(last).map(|v| v as u32),
                    items.get(i + 2).and_then(|w| obj_to_f64(resolve(doc, w))),
                ) else {
                    break;
                };
                for cid in first..=last.min(u32::from(u16::MAX)) {
                    if let Ok(cid) = u16::try_from(cid) {
                        out.insert(cid, width.max(0.0));
                    }
                }
                i += 3;
            }
        }
    }
    out
}

#[derive(Debug, PartialEq)]
enum CmapToken {
    Hex(Vec<u8>),
    Word(String),
    Open,
    Close,
}

fn cmap_tokens(data: &[u8]) -> Vec<CmapToken> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'<' => {
                let end = data[i + 1..].iter().position(|&b| b == b'>').map(|p| i + 1 + p);
                let Some(end) = end else { break };
                let digits: Vec<u8> = data[i + 1..end]
                    .iter()
                    .copied()
                    .filter(u8::is_ascii_hexdigit)
                    .collect();
                let bytes = digits
                    .chunks(2)
                    .filter_map(|pair| {
                        let text = std::str::from_utf8(pair).ok()?;
                        let value = u8::from_str_radix(text, 16).ok()?;
                        Some(if pair.len() == 1 { value << 4 } else { value })
                    })
                    .collect();
                tokens.push(CmapToken::Hex(bytes));
                i = end + 1;
            }
            b'[' => {
                tokens.push(CmapToken::Open);
                i += 1;
            }
            b']' => {
                tokens.push(CmapToken::Close);
                i += 1;
            }
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < data.len()
                    && !data[i].is_ascii_whitespace()
                    && !matches!(data[i], b'<' | b'[' | b']' | b'%')
                {
                    i += 1;
                }
                tokens.push(CmapToken::Word(String::from_utf8_lossy(&data[start..i]).into_owned()));
            }
        }
    }
    tokens
}

fn code_value(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [b] => Some(u16::from(*b)),
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// `bfchar` and `bfrange` entries of a ToUnicode CMap
pub(crate) fn parse_to_unicode(data: &[u8]) -> HashMap<u16, String> {
    let tokens = cmap_tokens(data);
    let mut map = HashMap::new();
    let mut i = 0;
    let mut in_char = false;
    let mut in_range = false;
    while i < tokens.len() {
        match &tokens[i] {
            CmapToken::Word(word) => {
                in_char = word == "beginbfchar";
                in_range = word == "beginbfrange";
                i += 1;
            }
            CmapToken::Hex(src) if in_char => {
                if let (Some(code), Some(CmapToken::Hex(dst))) = (code_value(src), tokens.get(i + 1)) {
                    map.insert(code, utf16_text(dst));
                }
                i += 2;
            }
            CmapToken::Hex(lo) if in_range => {
                let (Some(CmapToken::Hex(hi)), Some(dst)) = (tokens.get(i + 1), tokens.get(i + 2)) else {
                    break;
                };
                let (Some(lo), Some(hi)) = (code_value(lo), code_value(hi)) else {
                    i += 3;
                    continue;
                };
                match dst {
                    CmapToken::Hex(start) => {
                        for (offset, code) in (lo..=hi).enumerate() {
                            let mut target = start.clone();
                            if let Some(last) = target.last_mut() {
                                *last = last.wrapping_add(offset as u8);
                            }
                            map.insert(code, utf16_text(&target));
                        }
                        i += 3;
                    }
                    CmapToken::Open => {
                        let mut j = i + 3;
                        let mut code = lo;
                        while let Some(CmapToken::Hex(target)) = tokens.get(j) {
                            if code <= hi {
                                map.insert(code, utf16_text(target));
                            }
                            code = code.saturating_add(1);
                            j += 1;
                        }
                        i = j + 1;
                    }
                    _ => i += 3,
                }
            }
            _ => i += 1,
        }
    }
    map
}

/// Installed fonts standing in for non-embedded ones
#[cfg(not(target_arch = "wasm32"))]
mod system {
    use super::Family;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, OnceLock};

    /// Extra font directories, separated like `PATH`
    pub(crate) const FONT_DIR_ENV: &str = "PDFTOOLS_FONT_DIR";

    const MAX_DEPTH: usize = 4;

    type FaceCache = Mutex<HashMap<(Family, bool), Option<Arc<Vec<u8>>>>>;

    static FILES: OnceLock<HashMap<String, PathBuf>> = OnceLock::new();
    static FACES: OnceLock<FaceCache> = OnceLock::new();

    fn candidates(family: Family, bold: bool) -> &'static [&'static str] {
        match (family, bold) {
            (Family::Sans, false) => &[
                "liberationsans-regular.ttf",
                "arial.ttf",
                "helvetica.ttf",
                "dejavusans.ttf",
                "freesans.ttf",
            ],
            (Family::Sans, true) => &[
                "liberationsans-bold.ttf",
                "arialbd.ttf",
                "arial bold.ttf",
                "dejavusans-bold.ttf",
                "freesansbold.ttf",
            ],
            (Family::Serif, false) => &[
                "liberationserif-regular.ttf",
                "times new roman.ttf",
                "times.ttf",
                "dejavuserif.ttf",
                "freeserif.ttf",
            ],
            (Family::Serif, true) => &[
                "liberationserif-bold.ttf",
                "timesbd.ttf",
                "times new roman bold.ttf",
                "dejavuserif-bold.ttf",
                "freeserifbold.ttf",
            ],
            (Family::Mono, false) => &[
                "liberationmono-regular.ttf",
                "cour.ttf",
                "courier new.ttf",
                "dejavusansmono.ttf",
                "freemono.ttf",
            ],
            (Family::Mono, true) => &[
                "liberationmono-bold.ttf",
                "courbd.ttf",
                "courier new bold.ttf",
                "dejavusansmono-bold.ttf",
                "freemonobold.ttf",
            ],
        }
    }

    fn font_dirs() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(extra) = std::env::var_os(FONT_DIR_ENV) {
            dirs.extend(std::env::split_paths(&extra).filter(|p| !p.as_os_str().is_empty()));
        }

        #[cfg(target_os = "windows")]
        {
            dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
            if let Some(windir) = std::env::var_os("WINDIR") {
                dirs.push(PathBuf::from(windir).join("Fonts"));
            }
        }

        #[cfg(target_os = "linux")]
        {
            dirs.push(PathBuf::from("/usr/share/fonts"));
            dirs.push(PathBuf::from("/usr/local/share/fonts"));
            if let Some(home) = std::env::var_os("HOME") {
                dirs.push(PathBuf::from(&home).join(".fonts"));
                dirs.push(PathBuf::from(home).join(".local/share/fonts"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            dirs.push(PathBuf::from("/System/Library/Fonts"));
            dirs.push(PathBuf::from("/Library/Fonts"));
            if let Some(home) = std::env::var_os("HOME") {
                dirs.push(PathBuf::from(home).join("Library/Fonts"));
            }
        }

        dirs
    }

    /// Lower-cased file name to path, first directory wins
    fn index() -> &'static HashMap<String, PathBuf> {
        FILES.get_or_init(|| {
            let mut files = HashMap::new();
            for dir in font_dirs() {
                collect(&dir, 0, &mut files);
            }
            tracing::debug!(fonts = files.len(), "Indexed system fonts");
            files
        })
    }

    fn collect(dir: &std::path::Path, depth: usize, files: &mut HashMap<String, PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < MAX_DEPTH {
                    collect(&path, depth + 1, files);
                }
            } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.entry(name.to_ascii_lowercase()).or_insert(path);
            }
        }
    }

    pub(crate) fn face_for(family: Family, base_font: &str) -> Option<Arc<Vec<u8>>> {
        let bold = base_font.to_ascii_lowercase().contains("bold");
        let cache = FACES.get_or_init(|| Mutex::new(HashMap::new()));
        if let Ok(guard) = cache.lock() {
            if let Some(entry) = guard.get(&(family, bold)) {
                return entry.clone();
            }
        }

        let files = index();
        let loaded = candidates(family, bold)
            .iter()
            .filter_map(|name| files.get(*name))
            .filter_map(|path| std::fs::read(path).ok())
            .find(|bytes| ttf_parser::Face::parse(bytes, 0).is_ok())
            .map(Arc::new);

        if let Ok(mut guard) = cache.lock() {
            guard.insert((family, bold), loaded.clone());
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_helvetica_uses_standard_widths() {
        let doc = Document::with_version("1.7");
        let font = LoadedFont::from_dict(
            &doc,
            &dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" },
        );
        assert_eq!(font.width(u16::from(b'W')), 944.0);
        assert_eq!(font.width(u16::from(b' ')), 278.0);
        assert!(font.is_word_space(32));
        assert!(matches!(font.source(), FaceSource::System | FaceSource::Bundled));
    }

    #[test]
    fn test_widths_array_overrides_standard_metrics() {
        let doc = Document::with_version("1.7");
        let font = LoadedFont::from_dict(
            &doc,
            &dictionary! {
                "Subtype" => "TrueType",
                "BaseFont" => "ABCDEF+Arial",
                "FirstChar" => 65,
                "Widths" => vec![Object::Integer(700), Object::Integer(710)],
            },
        );
        assert_eq!(font.width(65), 700.0);
        assert_eq!(font.width(66), 710.0);
        assert_eq!(font.base_font, "Arial");
    }

    #[test]
    fn test_substitute_face_draws_latin_glyphs() {
        let font = LoadedFont::fallback();
        let path = font.glyph(u16::from(b'A')).expect("outline for A");
        let bounds = path.bounds();
        // Cap height sits well inside one em
        assert!(bounds.top() >= -0.05 && bounds.bottom() <= 1.0);
        assert!(bounds.width() > 0.2);
        assert!(font.glyph(u16::from(b' ')).is_none());
    }

    #[test]
    fn test_differences_map_glyph_names() {
        let doc = Document::with_version("1.7");
        let font = LoadedFont::from_dict(
            &doc,
            &dictionary! {
                "Subtype" => "Type1",
                "BaseFont" => "Times-Roman",
                "Encoding" => dictionary! {
                    "Differences" => vec![
                        Object::Integer(1),
                        Object::Name(b"H".to_vec()),
                        Object::Name(b"uni00E9".to_vec()),
                        Object::Name(b"quoteright".to_vec()),
                    ],
                },
            },
        );
        assert_eq!(font.unicode(1).as_deref(), Some("H"));
        assert_eq!(font.unicode(2).as_deref(), Some("é"));
        assert_eq!(font.unicode(3).as_deref(), Some("’"));
        assert_eq!(font.unicode(0x92).as_deref(), Some("’"));
        assert_eq!(font.unicode(u16::from(b'z')).as_deref(), Some("z"));
    }

    #[test]
    fn test_to_unicode_char_and_range() {
        let cmap = b"/CIDInit /ProcSet findresource begin
            2 beginbfchar
            <0003> <0020>
            <0024> <00410042>
            endbfchar
            2 beginbfrange
            <0044> <0046> <0061>
            <0050> <0051> [<0078> <0079>]
            endbfrange
            endcmap";
        let map = parse_to_unicode(cmap);
        assert_eq!(map.get(&3).map(String::as_str), Some(" "));
        assert_eq!(map.get(&0x24).map(String::as_str), Some("AB"));
        assert_eq!(map.get(&0x45).map(String::as_str), Some("b"));
        assert_eq!(map.get(&0x46).map(String::as_str), Some("c"));
        assert_eq!(map.get(&0x51).map(String::as_str), Some("y"));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_cid_widths_both_forms() {
        let doc = Document::with_version("1.7");
        let w = vec![
            Object::Integer(1),
            Object::Array(vec![Object::Integer(500), Object::Integer(600)]),
            Object::Integer(10),
            Object::Integer(12),
            Object::Integer(250),
        ];
        let widths = parse_cid_widths(&doc, &w);
        assert_eq!(widths.get(&1), Some(&500.0));
        assert_eq!(widths.get(&2), Some(&600.0));
        assert_eq!(widths.get(&11), Some(&250.0));
        assert_eq!(widths.len(), 5);
    }

    #[test]
    fn test_composite_font_codes_are_two_bytes() {
        let doc = Document::with_version("1.7");
        let font = LoadedFont::from_dict(
            &doc,
            &dictionary! {
                "Subtype" => "Type0",
                "BaseFont" => "NotoSans",
                "Encoding" => "Identity-H",
                "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                    "Subtype" => "CIDFontType2",
                    "DW" => 800,
                })],
            },
        );
        assert_eq!(font.codes(&[0x00, 0x41, 0x01, 0x02, 0x07]), vec![0x41, 0x0102]);
        assert_eq!(font.width(0x41), 800.0);
        assert!(!font.is_word_space(32));
    }

    #[test]
    fn test_subset_prefix_and_family() {
        assert_eq!(strip_subset_prefix("EOODIA+Poetica"), "Poetica");
        assert_eq!(strip_subset_prefix("Not+Subset"), "Not+Subset");
        assert_eq!(Family::of("Courier-Bold"), Family::Mono);
        assert_eq!(Family::of("Times-Italic"), Family::Serif);
        assert_eq!(Family::of("DejaVuSans"), Family::Sans);
    }
}
