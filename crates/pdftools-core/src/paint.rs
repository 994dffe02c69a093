//! Content stream interpreter for the built-in renderer
//!
//! Paths are filled with the nonzero or even-odd rule and stroked with the
//! current line style; `W`/`W*` clip through a coverage mask. Text is drawn
//! glyph by glyph from [`LoadedFont`] outlines. Image and form XObjects are
//! composited through the CTM. Shadings and inline images are skipped.

use crate::fonts::{stream_data, LoadedFont};
use crate::loader::{obj_to_f64, resolve};
use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;
use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path, PathBuilder,
    Pixmap, PixmapPaint, Stroke, StrokeDash, Transform,
};
use tracing::{debug, warn};

/// Nesting limit for form XObjects drawing other forms
const MAX_FORM_DEPTH: usize = 12;

/// Largest decoded image side
const MAX_IMAGE_SIDE: u32 = 16_384;

/// Palette lookups past the end read black
static NO_ENTRY: [u8; 4] = [0; 4];

/// Affine transform `[a b c d e f]` as in PDF operands
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix(pub(crate) [f64; 6]);

impl Matrix {
    pub(crate) const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f64, ty: f64) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let mut values = [0.0; 6];
        for (slot, obj) in values.iter_mut().zip(operands) {
            *slot = obj_to_f64(obj)?;
        }
        values.iter().all(|v| v.is_finite()).then_some(Matrix(values))
    }

    /// Apply `self` first, then `next`
    pub(crate) fn then(&self, next: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = next.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn to_transform(self) -> Transform {
        let [a, b, c, d, e, f] = self.0.map(|v| v as f32);
        Transform::from_row(a, b, c, d, e, f)
    }
}

#[derive(Clone)]
struct TextState {
    font: Option<Rc<LoadedFont>>,
    size: f64,
    char_spacing: f64,
    word_spacing: f64,
    /// `Tz` / 100
    h_scale: f64,
    leading: f64,
    rise: f64,
    render_mode: i64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill: [u8; 3],
    stroke: [u8; 3],
    fill_alpha: f32,
    stroke_alpha: f32,
    blend: BlendMode,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    dash: Option<(Vec<f32>, f32)>,
    clip: Option<Rc<Mask>>,
    text: TextState,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            fill: [0, 0, 0],
            stroke: [0, 0, 0],
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            blend: BlendMode::SourceOver,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            dash: None,
            clip: None,
            text: TextState::default(),
        }
    }

    fn stroke_style(&self, width_scale: f32) -> Stroke {
        let mut stroke = Stroke {
            width: (self.line_width * width_scale).max(0.0),
            miter_limit: self.miter_limit.max(1.0),
            line_cap: self.line_cap,
            line_join: self.line_join,
            ..Stroke::default()
        };
        if let Some((pattern, phase)) = &self.dash {
            let mut pattern: Vec<f32> = pattern.iter().map(|p| p.abs() * width_scale).collect();
            if pattern.len() % 2 == 1 {
                pattern.extend_from_within(..);
            }
            stroke.dash = StrokeDash::new(pattern, phase * width_scale);
        }
        stroke
    }
}

fn paint_for(color: [u8; 3], alpha: f32, blend: BlendMode) -> Paint<'static> {
    let [r, g, b] = color;
    let mut paint = Paint::default();
    paint.set_color(Color::from_rgba8(r, g, b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8));
    paint.blend_mode = blend;
    paint.anti_alias = true;
    paint
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FontKey {
    Object(ObjectId),
    Inline(Vec<u8>),
}

pub(crate) struct Painter<'a> {
    doc: &'a Document,
    pixmap: &'a mut Pixmap,
    /// Page space to device pixels
    base: Matrix,
    state: GraphicsState,
    saved: Vec<GraphicsState>,
    /// Current path in user space
    path: PathBuilder,
    start: (f32, f32),
    current: Option<(f32, f32)>,
    pending_clip: Option<FillRule>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    fonts: HashMap<FontKey, Rc<LoadedFont>>,
    images: HashMap<ObjectId, Option<Rc<Pixmap>>>,
    pub(crate) skipped: usize,
}

impl<'a> Painter<'a> {
    pub(crate) fn new(doc: &'a Document, pixmap: &'a mut Pixmap, base: Matrix) -> Self {
        Self {
            doc,
            pixmap,
            base,
            state: GraphicsState::new(Matrix::IDENTITY),
            saved: Vec::new(),
            path: PathBuilder::new(),
            start: (0.0, 0.0),
            current: None,
            pending_clip: None,
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            fonts: HashMap::new(),
            images: HashMap::new(),
            skipped: 0,
        }
    }

    pub(crate) fn run(&mut self, content: &[u8], resources: &Dictionary, depth: usize) {
        let operations = match Content::decode(content) {
            Ok(content) => content.operations,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable content stream");
                return;
            }
        };
        for op in &operations {
            self.apply(op, resources, depth);
        }
    }

    fn device(&self) -> Matrix {
        self.state.ctm.then(&self.base)
    }

    fn apply(&mut self, op: &Operation, resources: &Dictionary, depth: usize) {
        let numbers: Vec<f64> = op.operands.iter().filter_map(obj_to_f64).collect();
        let floats: Vec<f32> = numbers.iter().map(|&v| v as f32).collect();
        match op.operator.as_str() {
            "q" => self.saved.push(self.state.clone()),
            "Q" => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(&op.operands) {
                    self.state.ctm = m.then(&self.state.ctm);
                }
            }

            // Colour
            "g" | "rg" | "k" | "sc" | "scn" => {
                if let Some(color) = device_color(&numbers) {
                    self.state.fill = color;
                }
            }
            "G" | "RG" | "K" | "SC" | "SCN" => {
                if let Some(color) = device_color(&numbers) {
                    self.state.stroke = color;
                }
            }
            "cs" => self.state.fill = [0, 0, 0],
            "CS" => self.state.stroke = [0, 0, 0],

            // Line style
            "w" => {
                if let [width] = floats[..] {
                    self.state.line_width = width.max(0.0);
                }
            }
            "J" => {
                if let [cap] = numbers[..] {
                    self.state.line_cap = line_cap(cap as i64);
                }
            }
            "j" => {
                if let [join] = numbers[..] {
                    self.state.line_join = line_join(join as i64);
                }
            }
            "M" => {
                if let [limit] = floats[..] {
                    self.state.miter_limit = limit;
                }
            }
            "d" => self.state.dash = dash_of(&op.operands),
            "gs" => {
                if let Some(name) = op.operands.first().and_then(|name| name.as_name().ok()) {
                    self.apply_ext_gstate(resources, name);
                }
            }

            // Path construction
            "m" => {
                if let [x, y] = floats[..] {
                    self.path.move_to(x, y);
                    self.start = (x, y);
                    self.current = Some((x, y));
                }
            }
            "l" => {
                if let [x, y] = floats[..] {
                    self.ensure_started();
                    self.path.line_to(x, y);
                    self.current = Some((x, y));
                }
            }
            "c" => {
                if let [x1, y1, x2, y2, x3, y3] = floats[..] {
                    self.ensure_started();
                    self.path.cubic_to(x1, y1, x2, y2, x3, y3);
                    self.current = Some((x3, y3));
                }
            }
            "v" => {
                if let (&[x2, y2, x3, y3], Some((x1, y1))) = (&floats[..], self.current) {
                    self.path.cubic_to(x1, y1, x2, y2, x3, y3);
                    self.current = Some((x3, y3));
                }
            }
            "y" => {
                if let [x1, y1, x3, y3] = floats[..] {
                    self.ensure_started();
                    self.path.cubic_to(x1, y1, x3, y3, x3, y3);
                    self.current = Some((x3, y3));
                }
            }
            "h" => {
                if self.current.is_some() {
                    self.path.close();
                    self.current = Some(self.start);
                }
            }
            "re" => {
                if let [x, y, w, h] = floats[..] {
                    self.path.move_to(x, y);
                    self.path.line_to(x + w, y);
                    self.path.line_to(x + w, y + h);
                    self.path.line_to(x, y + h);
                    self.path.close();
                    self.start = (x, y);
                    self.current = Some((x, y));
                }
            }

            // Path painting
            "f" | "F" => self.finish_path(Some(FillRule::Winding), false, false),
            "f*" => self.finish_path(Some(FillRule::EvenOdd), false, false),
            "S" => self.finish_path(None, true, false),
            "s" => self.finish_path(None, true, true),
            "B" => self.finish_path(Some(FillRule::Winding), true, false),
            "B*" => self.finish_path(Some(FillRule::EvenOdd), true, false),
            "b" => self.finish_path(Some(FillRule::Winding), true, true),
            "b*" => self.finish_path(Some(FillRule::EvenOdd), true, true),
            "n" => self.finish_path(None, false, false),
            "W" => self.pending_clip = Some(FillRule::Winding),
            "W*" => self.pending_clip = Some(FillRule::EvenOdd),

            // Text
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "ET" => {}
            "Tc" => {
                if let [spacing] = numbers[..] {
                    self.state.text.char_spacing = spacing;
                }
            }
            "Tw" => {
                if let [spacing] = numbers[..] {
                    self.state.text.word_spacing = spacing;
                }
            }
            "Tz" => {
                if let [percent] = numbers[..] {
                    self.state.text.h_scale = percent / 100.0;
                }
            }
            "TL" => {
                if let [leading] = numbers[..] {
                    self.state.text.leading = leading;
                }
            }
            "Ts" => {
                if let [rise] = numbers[..] {
                    self.state.text.rise = rise;
                }
            }
            "Tr" => {
                if let [mode] = numbers[..] {
                    self.state.text.render_mode = mode as i64;
                }
            }
            "Tf" => {
                let name = op.operands.first().and_then(|name| name.as_name().ok());
                if let (Some(name), Some(size)) = (name, op.operands.get(1).and_then(obj_to_f64)) {
                    self.state.text.font = Some(self.font(resources, name));
                    self.state.text.size = size;
                }
            }
            "Td" => {
                if let [tx, ty] = numbers[..] {
                    self.next_line(tx, ty);
                }
            }
            "TD" => {
                if let [tx, ty] = numbers[..] {
                    self.state.text.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(&op.operands) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "T*" => self.next_line(0.0, -self.state.text.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    self.show_text(bytes);
                }
            }
            "'" => {
                self.next_line(0.0, -self.state.text.leading);
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    self.show_text(bytes);
                }
            }
            "\"" => {
                if let [Some(aw), Some(ac)] = [op.operands.first(), op.operands.get(1)].map(|o| o.and_then(obj_to_f64)) {
                    self.state.text.word_spacing = aw;
                    self.state.text.char_spacing = ac;
                }
                self.next_line(0.0, -self.state.text.leading);
                if let Some(Object::String(bytes, _)) = op.operands.get(2) {
                    self.show_text(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => self.show_text(bytes),
                            other => {
                                if let Some(adjust) = obj_to_f64(other) {
                                    let text = &self.state.text;
                                    let tx = -adjust / 1000.0 * text.size * text.h_scale;
                                    self.text_matrix = Matrix::translate(tx, 0.0).then(&self.text_matrix);
                                }
                            }
                        }
                    }
                }
            }

            // XObjects
            "Do" => {
                let id = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| self.xobject_id(resources, name));
                match id {
                    Some(id) => self.draw_xobject(id, resources, depth),
                    None => self.skipped += 1,
                }
            }
            "BI" | "sh" => self.skipped += 1,
            _ => {}
        }
    }

    /// `l` and curves with no current point start at their own origin
    fn ensure_started(&mut self) {
        if self.current.is_none() {
            self.path.move_to(0.0, 0.0);
            self.current = Some((0.0, 0.0));
        }
    }

    fn finish_path(&mut self, fill: Option<FillRule>, stroke: bool, close: bool) {
        if close && self.current.is_some() {
            self.path.close();
        }
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        self.current = None;
        let clip = self.pending_clip.take();
        let Some(path) = builder.finish() else {
            return;
        };
        let transform = self.device().to_transform();
        let state = &self.state;

        if let Some(rule) = fill {
            let paint = paint_for(state.fill, state.fill_alpha, state.blend);
            self.pixmap
                .fill_path(&path, &paint, rule, transform, state.clip.as_deref());
        }
        if stroke {
            let paint = paint_for(state.stroke, state.stroke_alpha, state.blend);
            self.pixmap.stroke_path(
                &path,
                &paint,
                &state.stroke_style(1.0),
                transform,
                state.clip.as_deref(),
            );
        }
        if let Some(rule) = clip {
            self.clip_to(&path, rule, transform);
        }
    }

    fn clip_to(&mut self, path: &Path, rule: FillRule, transform: Transform) {
        match self.state.clip.as_mut() {
            Some(mask) => Rc::make_mut(mask).intersect_path(path, rule, true, transform),
            None => {
                if let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) {
                    mask.fill_path(path, rule, true, transform);
                    self.state.clip = Some(Rc::new(mask));
                }
            }
        }
    }

    fn apply_ext_gstate(&mut self, resources: &Dictionary, name: &[u8]) {
        let doc = self.doc;
        let Some(params) = resources
            .get(b"ExtGState")
            .ok()
            .and_then(|states| resolve(doc, states).as_dict().ok())
            .and_then(|states| states.get(name).ok())
            .and_then(|state| resolve(doc, state).as_dict().ok())
        else {
            return;
        };
        let number = |key: &[u8]| params.get(key).ok().and_then(|v| obj_to_f64(resolve(doc, v)));

        if let Some(alpha) = number(b"ca") {
            self.state.fill_alpha = alpha.clamp(0.0, 1.0) as f32;
        }
        if let Some(alpha) = number(b"CA") {
            self.state.stroke_alpha = alpha.clamp(0.0, 1.0) as f32;
        }
        if let Some(width) = number(b"LW") {
            self.state.line_width = width.max(0.0) as f32;
        }
        if let Some(cap) = number(b"LC") {
            self.state.line_cap = line_cap(cap as i64);
        }
        if let Some(join) = number(b"LJ") {
            self.state.line_join = line_join(join as i64);
        }
        if let Some(limit) = number(b"ML") {
            self.state.miter_limit = limit as f32;
        }
        if let Some(mode) = params.get(b"BM").ok().map(|bm| resolve(doc, bm)) {
            let name = match mode {
                Object::Array(modes) => modes.first().and_then(|m| m.as_name().ok()),
                other => other.as_name().ok(),
            };
            if let Some(name) = name {
                self.state.blend = blend_mode(name);
            }
        }
    }

    fn font(&mut self, resources: &Dictionary, name: &[u8]) -> Rc<LoadedFont> {
        let doc = self.doc;
        let entry = resources
            .get(b"Font")
            .ok()
            .and_then(|fonts| resolve(doc, fonts).as_dict().ok())
            .and_then(|fonts| fonts.get(name).ok());
        let key = match entry {
            Some(Object::Reference(id)) => FontKey::Object(*id),
            _ => FontKey::Inline(name.to_vec()),
        };
        if let Some(font) = self.fonts.get(&key) {
            return font.clone();
        }
        let font = match entry.and_then(|entry| resolve(doc, entry).as_dict().ok()) {
            Some(dict) => LoadedFont::from_dict(doc, dict),
            None => {
                warn!(font = %String::from_utf8_lossy(name), "Font resource missing; using Helvetica");
                LoadedFont::fallback()
            }
        };
        debug!(font = %String::from_utf8_lossy(name), source = ?font.source(), "Loaded font");
        let font = Rc::new(font);
        self.fonts.insert(key, font.clone());
        font
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show_text(&mut self, bytes: &[u8]) {
        let text = self.state.text.clone();
        let font = match text.font {
            Some(font) => font,
            None => {
                let font = Rc::new(LoadedFont::fallback());
                self.state.text.font = Some(font.clone());
                font
            }
        };
        // 3 is invisible, 7 only adds to the clip
        let (fill, stroke) = match text.render_mode {
            0 | 4 => (true, false),
            1 | 5 => (false, true),
            2 | 6 => (true, true),
            _ => (false, false),
        };
        let device = self.device();
        let glyph_scale = Matrix([text.size * text.h_scale, 0.0, 0.0, text.size, 0.0, text.rise]);
        // Line width is in user space; glyph paths are in em units
        let stroke_scale = if text.size.abs() > f64::EPSILON {
            (1.0 / text.size.abs()) as f32
        } else {
            1.0
        };

        for code in font.codes(bytes) {
            if fill || stroke {
                if let Some(glyph) = font.glyph(code) {
                    let transform = glyph_scale
                        .then(&self.text_matrix)
                        .then(&device)
                        .to_transform();
                    let state = &self.state;
                    if fill {
                        let paint = paint_for(state.fill, state.fill_alpha, state.blend);
                        self.pixmap.fill_path(
                            &glyph,
                            &paint,
                            FillRule::Winding,
                            transform,
                            state.clip.as_deref(),
                        );
                    }
                    if stroke {
                        let paint = paint_for(state.stroke, state.stroke_alpha, state.blend);
                        self.pixmap.stroke_path(
                            &glyph,
                            &paint,
                            &state.stroke_style(stroke_scale),
                            transform,
                            state.clip.as_deref(),
                        );
                    }
                }
            }

            let mut advance = font.width(code) / 1000.0 * text.size + text.char_spacing;
            if font.is_word_space(code) {
                advance += text.word_spacing;
            }
            self.text_matrix = Matrix::translate(advance * text.h_scale, 0.0).then(&self.text_matrix);
        }
    }

    fn xobject_id(&self, resources: &Dictionary, name: &[u8]) -> Option<ObjectId> {
        let xobjects = resources.get(b"XObject").ok()?;
        let xobjects = resolve(self.doc, xobjects).as_dict().ok()?;
        xobjects.get(name).and_then(Object::as_reference).ok()
    }

    fn draw_xobject(&mut self, id: ObjectId, resources: &Dictionary, depth: usize) {
        let doc = self.doc;
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            self.skipped += 1;
            return;
        };
        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => {
                let fill = self.state.fill;
                // Stencils take the current fill colour, so they are not cached
                let stencil = stream.dict.get(b"ImageMask").and_then(Object::as_bool).unwrap_or(false);
                let image = if stencil {
                    decode_image(doc, stream, fill).map(Rc::new)
                } else {
                    self.images
                        .entry(id)
                        .or_insert_with(|| decode_image(doc, stream, fill).map(Rc::new))
                        .clone()
                };
                match image {
                    Some(image) => self.draw_image(&image),
                    None => self.skipped += 1,
                }
            }
            Ok(b"Form") => self.draw_form(stream, resources, depth),
            _ => self.skipped += 1,
        }
    }

    fn draw_form(&mut self, stream: &Stream, resources: &Dictionary, depth: usize) {
        if depth >= MAX_FORM_DEPTH {
            warn!(depth, "Form XObjects nested too deeply");
            return;
        }
        let doc = self.doc;
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| resolve(doc, m).as_array().ok())
            .and_then(|m| Matrix::from_operands(m))
            .unwrap_or(Matrix::IDENTITY);
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve(doc, r).as_dict().ok())
            .unwrap_or(resources)
            .clone();

        let outer_state = self.state.clone();
        let outer_depth = self.saved.len();
        let outer_path = std::mem::replace(&mut self.path, PathBuilder::new());
        let outer_text = (self.text_matrix, self.line_matrix);

        self.state.ctm = matrix.then(&self.state.ctm);
        if let Some(bbox) = stream
            .dict
            .get(b"BBox")
            .ok()
            .and_then(|b| resolve(doc, b).as_array().ok())
            .and_then(|b| rect_path(b))
        {
            let transform = self.device().to_transform();
            self.clip_to(&bbox, FillRule::Winding, transform);
        }
        self.run(&content, &form_resources, depth + 1);

        self.saved.truncate(outer_depth);
        self.state = outer_state;
        self.path = outer_path;
        (self.text_matrix, self.line_matrix) = outer_text;
    }

    /// Map the image's pixel grid onto the unit square, row 0 at the top
    fn draw_image(&mut self, image: &Pixmap) {
        let (w, h) = (f64::from(image.width()), f64::from(image.height()));
        let unit = Matrix([1.0 / w, 0.0, 0.0, -1.0 / h, 0.0, 1.0]);
        let transform = unit.then(&self.device()).to_transform();
        let paint = PixmapPaint {
            opacity: self.state.fill_alpha,
            blend_mode: self.state.blend,
            quality: FilterQuality::Bilinear,
        };
        self.pixmap
            .draw_pixmap(0, 0, image.as_ref(), &paint, transform, self.state.clip.as_deref());
    }
}

fn line_cap(value: i64) -> LineCap {
    match value {
        1 => LineCap::Round,
        2 => LineCap::Square,
        _ => LineCap::Butt,
    }
}

fn line_join(value: i64) -> LineJoin {
    match value {
        1 => LineJoin::Round,
        2 => LineJoin::Bevel,
        _ => LineJoin::Miter,
    }
}

/// `[on off ...] phase d`; an empty array is a solid line
fn dash_of(operands: &[Object]) -> Option<(Vec<f32>, f32)> {
    let pattern: Vec<f32> = operands
        .first()?
        .as_array()
        .ok()?
        .iter()
        .filter_map(obj_to_f64)
        .map(|v| v as f32)
        .collect();
    if pattern.is_empty() || pattern.iter().all(|v| *v == 0.0) {
        return None;
    }
    let phase = operands.get(1).and_then(obj_to_f64).unwrap_or(0.0) as f32;
    Some((pattern, phase))
}

fn blend_mode(name: &[u8]) -> BlendMode {
    match name {
        b"Multiply" => BlendMode::Multiply,
        b"Screen" => BlendMode::Screen,
        b"Overlay" => BlendMode::Overlay,
        b"Darken" => BlendMode::Darken,
        b"Lighten" => BlendMode::Lighten,
        b"ColorDodge" => BlendMode::ColorDodge,
        b"ColorBurn" => BlendMode::ColorBurn,
        b"HardLight" => BlendMode::HardLight,
        b"SoftLight" => BlendMode::SoftLight,
        b"Difference" => BlendMode::Difference,
        b"Exclusion" => BlendMode::Exclusion,
        b"Hue" => BlendMode::Hue,
        b"Saturation" => BlendMode::Saturation,
        b"Color" => BlendMode::Color,
        b"Luminosity" => BlendMode::Luminosity,
        _ => BlendMode::SourceOver,
    }
}

fn rect_path(values: &[Object]) -> Option<Path> {
    let [x0, y0, x1, y1] = [0, 1, 2, 3].map(|i| values.get(i).and_then(obj_to_f64));
    let (x0, y0, x1, y1) = (x0? as f32, y0? as f32, x1? as f32, y1? as f32);
    let rect = tiny_skia::Rect::from_ltrb(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))?;
    Some(PathBuilder::from_rect(rect))
}

/// Colour from operand count: 1 gray, 3 RGB, 4 CMYK, all in 0..=1
fn device_color(values: &[f64]) -> Option<[u8; 3]> {
    let to_byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match *values {
        [gray] => {
            let g = to_byte(gray);
            Some([g, g, g])
        }
        [r, g, b] => Some([to_byte(r), to_byte(g), to_byte(b)]),
        [c, m, y, k] => Some(cmyk_to_rgb(to_byte(c), to_byte(m), to_byte(y), to_byte(k))),
        _ => None,
    }
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let white = 255 - u16::from(k);
    let channel = |v: u8| ((255 - u16::from(v)) * white / 255) as u8;
    [channel(c), channel(m), channel(y)]
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").map(|f| resolve(doc, f)) {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

fn dimension(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<u32> {
    let value = obj_to_f64(resolve(doc, dict.get(key).ok()?))?;
    (value >= 1.0 && value <= f64::from(MAX_IMAGE_SIDE)).then_some(value as u32)
}

/// How image samples turn into colour
#[derive(Debug, Clone, PartialEq)]
enum SampleSpace {
    Device(usize),
    /// Base components and palette bytes
    Indexed(usize, Vec<u8>),
}

/// Components per sample of a device colour space
fn color_components(doc: &Document, color_space: &Object) -> Option<usize> {
    match resolve(doc, color_space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => Some(1),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => match items.first().and_then(|n| n.as_name().ok()) {
            Some(b"ICCBased") => {
                let profile = resolve(doc, items.get(1)?).as_stream().ok()?;
                let n = obj_to_f64(resolve(doc, profile.dict.get(b"N").ok()?))? as usize;
                matches!(n, 1 | 3 | 4).then_some(n)
            }
            Some(b"CalGray") => Some(1),
            Some(b"CalRGB") => Some(3),
            _ => None,
        },
        _ => None,
    }
}

fn sample_space(doc: &Document, color_space: &Object) -> Option<SampleSpace> {
    if let Some(n) = color_components(doc, color_space) {
        return Some(SampleSpace::Device(n));
    }
    let items = resolve(doc, color_space).as_array().ok()?;
    if items.first().and_then(|n| n.as_name().ok())? != b"Indexed" {
        return None;
    }
    let base = color_components(doc, items.get(1)?)?;
    let palette = match resolve(doc, items.get(3)?) {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(stream) => stream_data(stream)?,
        _ => return None,
    };
    Some(SampleSpace::Indexed(base, palette))
}

/// Unpack `bits`-per-sample rows into one byte per sample; rows are byte aligned
fn unpack_samples(data: &[u8], width: usize, height: usize, per_pixel: usize, bits: u8) -> Option<Vec<u8>> {
    let per_row = width * per_pixel;
    match bits {
        8 => {
            let needed = per_row * height;
            (data.len() >= needed).then(|| data[..needed].to_vec())
        }
        16 => {
            let needed = per_row * height * 2;
            (data.len() >= needed).then(|| data[..needed].iter().step_by(2).copied().collect())
        }
        1 | 2 | 4 => {
            let row_bytes = (per_row * usize::from(bits)).div_ceil(8);
            if data.len() < row_bytes * height {
                return None;
            }
            let mask = (1u8 << bits) - 1;
            let mut out = Vec::with_capacity(per_row * height);
            for row in data.chunks_exact(row_bytes).take(height) {
                for i in 0..per_row {
                    let bit = i * usize::from(bits);
                    let shift = 8 - usize::from(bits) - bit % 8;
                    out.push((row[bit / 8] >> shift) & mask);
                }
            }
            Some(out)
        }
        _ => None,
    }
}

fn to_pixmap(image: &RgbaImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height())?;
    for (src, dst) in image.as_raw().chunks_exact(4).zip(pixmap.data_mut().chunks_exact_mut(4)) {
        let alpha = u16::from(src[3]);
        let premul = |c: u8| ((u16::from(c) * alpha + 127) / 255) as u8;
        dst.copy_from_slice(&[premul(src[0]), premul(src[1]), premul(src[2]), src[3]]);
    }
    Some(pixmap)
}

/// Decode an image XObject, or `None` when its encoding is unsupported.
/// Stencil masks paint `fill` where the mask is set.
fn decode_image(doc: &Document, stream: &Stream, fill: [u8; 3]) -> Option<Pixmap> {
    let dict = &stream.dict;
    let width = dimension(doc, dict, b"Width")?;
    let height = dimension(doc, dict, b"Height")?;
    let filters = filter_names(doc, dict);
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|b| obj_to_f64(resolve(doc, b)))
        .unwrap_or(8.0) as u8;

    if dict.get(b"ImageMask").and_then(Object::as_bool).unwrap_or(false) {
        let data = stream_data(stream)?;
        let samples = unpack_samples(&data, width as usize, height as usize, 1, 1)?;
        let inverted = dict
            .get(b"Decode")
            .ok()
            .and_then(|d| resolve(doc, d).as_array().ok())
            .and_then(|d| d.first().and_then(obj_to_f64))
            .is_some_and(|first| first == 1.0);
        let [r, g, b] = fill;
        let pixels = samples
            .iter()
            .flat_map(|&bit| {
                let painted = (bit == 0) != inverted;
                if painted { [r, g, b, 255] } else { [0, 0, 0, 0] }
            })
            .collect();
        return to_pixmap(&RgbaImage::from_raw(width, height, pixels)?);
    }

    let mut image = if filters.iter().any(|f| f == b"DCTDecode") {
        let data = if filters.first().is_some_and(|f| f == b"FlateDecode") {
            inflate(&stream.content)?
        } else {
            stream.content.clone()
        };
        image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
            .ok()?
            .to_rgba8()
    } else {
        let space = sample_space(doc, dict.get(b"ColorSpace").ok()?)?;
        let per_pixel = match space {
            SampleSpace::Device(n) => n,
            SampleSpace::Indexed(..) => 1,
        };
        let samples = unpack_samples(&stream_data(stream)?, width as usize, height as usize, per_pixel, bits)?;
        samples_to_rgba(&samples, width, height, &space, bits)?
    };

    if let Some(mask) = soft_mask(doc, dict) {
        apply_soft_mask(&mut image, &mask);
    }
    to_pixmap(&image)
}

fn samples_to_rgba(samples: &[u8], width: u32, height: u32, space: &SampleSpace, bits: u8) -> Option<RgbaImage> {
    let max = if bits >= 8 { 255 } else { (1u16 << bits) - 1 };
    let scale = |v: u8| (u16::from(v) * 255 / max) as u8;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    match space {
        SampleSpace::Device(components) => {
            for sample in samples.chunks_exact(*components) {
                let [r, g, b] = match *sample {
                    [gray] => [scale(gray); 3],
                    [r, g, b] => [scale(r), scale(g), scale(b)],
                    [c, m, y, k] => cmyk_to_rgb(scale(c), scale(m), scale(y), scale(k)),
                    _ => return None,
                };
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }
        SampleSpace::Indexed(base, palette) => {
            for &index in samples {
                let start = usize::from(index) * base;
                let entry = palette.get(start..start + base).unwrap_or(&NO_ENTRY[..*base]);
                let [r, g, b] = match *entry {
                    [gray] => [gray; 3],
                    [r, g, b] => [r, g, b],
                    [c, m, y, k] => cmyk_to_rgb(c, m, y, k),
                    _ => return None,
                };
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }
    }
    RgbaImage::from_raw(width, height, pixels)
}

/// 8-bit gray soft mask as a luma image
fn soft_mask(doc: &Document, dict: &Dictionary) -> Option<image::GrayImage> {
    let mask = resolve(doc, dict.get(b"SMask").ok()?).as_stream().ok()?;
    let width = dimension(doc, &mask.dict, b"Width")?;
    let height = dimension(doc, &mask.dict, b"Height")?;
    let data = stream_data(mask)?;
    let needed = width as usize * height as usize;
    if data.len() < needed {
        return None;
    }
    image::GrayImage::from_raw(width, height, data[..needed].to_vec())
}

fn apply_soft_mask(image: &mut RgbaImage, mask: &image::GrayImage) {
    let (iw, ih) = image.dimensions();
    let (mw, mh) = mask.dimensions();
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let mx = (u64::from(x) * u64::from(mw) / u64::from(iw)) as u32;
        let my = (u64::from(y) * u64::from(mh) / u64::from(ih)) as u32;
        pixel.0[3] = mask.get_pixel(mx.min(mw - 1), my.min(mh - 1)).0[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matrix_compose_order() {
        let scale = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let shift = Matrix::translate(10.0, -4.0);
        assert_eq!(scale.then(&shift), Matrix([2.0, 0.0, 0.0, 2.0, 10.0, -4.0]));
        assert_eq!(shift.then(&scale), Matrix([2.0, 0.0, 0.0, 2.0, 20.0, -8.0]));
        assert_eq!(Matrix::IDENTITY.then(&shift), shift);
    }

    #[test]
    fn test_unpack_one_bit_rows_are_byte_aligned() {
        // 3 px wide: 101 then 010, each row padded to a byte
        let samples = unpack_samples(&[0b1010_0000, 0b0100_0000], 3, 2, 1, 1).unwrap();
        assert_eq!(samples, vec![1, 0, 1, 0, 1, 0]);
        assert!(unpack_samples(&[0xFF], 3, 2, 1, 1).is_none());
        assert_eq!(unpack_samples(&[0x12, 0x34], 1, 1, 1, 16).unwrap(), vec![0x12]);
    }

    #[test]
    fn test_indexed_samples_use_palette() {
        let space = SampleSpace::Indexed(3, vec![255, 0, 0, 0, 0, 255]);
        let image = samples_to_rgba(&[1, 0], 2, 1, &space, 8).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_two_bit_gray_scales_to_full_range() {
        let image = samples_to_rgba(&[0, 3], 2, 1, &SampleSpace::Device(1), 2).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_dash_pattern_parsing() {
        let operands = vec![Object::Array(vec![3.into(), 1.into()]), 2.into()];
        assert_eq!(dash_of(&operands), Some((vec![3.0, 1.0], 2.0)));
        assert_eq!(dash_of(&[Object::Array(vec![]), 0.into()]), None);
    }

    #[test]
    fn test_device_colors() {
        assert_eq!(device_color(&[0.5]), Some([128, 128, 128]));
        assert_eq!(device_color(&[0.0, 0.0, 0.0, 1.0]), Some([0, 0, 0]));
        assert_eq!(device_color(&[1.0, 0.0, 0.0, 0.0]), Some([0, 255, 255]));
        assert_eq!(device_color(&[1.0, 2.0]), None);
    }
}
