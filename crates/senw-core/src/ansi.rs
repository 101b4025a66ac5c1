//! Terminal escape sequences to styled segments.
//!
//! Build logs arrive with SGR colour codes and bare newlines. [`AnsiConverter`] feeds a stream
//! of text chunks through a `vte` parser and collects [`Segment`]s: styled text runs and
//! explicit line breaks. The converter is stateful: the active style carries from one chunk to
//! the next, and an escape sequence (or a `\r` that may be the first half of `\r\n`) cut off
//! at a chunk boundary is held back until the rest arrives. Feeding `"\x1b["` then `"32mOK"`
//! yields exactly what `"\x1b[32mOK"` yields in one go.
//!
//! Segments render to HTML via [`to_html`] or to plain text via [`visible_text`]; the terminal
//! front-end maps them to its own spans.

use std::fmt::{self, Write as _};
use vte::{Params, Parser, Perform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// 0–15 are the standard and bright colours, 16–255 the xterm extended palette.
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    pub fn to_rgb(self) -> (u8, u8, u8) {
        match self {
            Color::Rgb(r, g, b) => (r, g, b),
            Color::Indexed(n) if n < 16 => BASE_PALETTE[n as usize],
            Color::Indexed(n) if n < 232 => {
                let n = n - 16;
                let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
                (level(n / 36), level((n / 6) % 6), level(n % 6))
            }
            Color::Indexed(n) => {
                let grey = 8 + (n - 232) * 10;
                (grey, grey, grey)
            }
        }
    }
}

const BASE_PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (187, 0, 0),
    (0, 187, 0),
    (187, 187, 0),
    (0, 0, 187),
    (187, 0, 187),
    (0, 187, 187),
    (255, 255, 255),
    (85, 85, 85),
    (255, 85, 85),
    (0, 255, 0),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
    pub faint: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Style {
    pub fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn css(&self) -> String {
        let mut css = String::new();
        if let Some(fg) = self.fg {
            let (r, g, b) = fg.to_rgb();
            let _ = write!(css, "color:rgb({r},{g},{b});");
        }
        if let Some(bg) = self.bg {
            let (r, g, b) = bg.to_rgb();
            let _ = write!(css, "background-color:rgb({r},{g},{b});");
        }
        if self.bold {
            css.push_str("font-weight:bold;");
        }
        if self.faint {
            css.push_str("opacity:0.7;");
        }
        if self.italic {
            css.push_str("font-style:italic;");
        }
        if self.underline {
            css.push_str("text-decoration:underline;");
        }
        css
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text { text: String, style: Style },
    Break,
}

impl Segment {
    /// Visible length in chars; a break counts as one.
    pub fn visible_len(&self) -> usize {
        match self {
            Segment::Text { text, .. } => text.chars().count(),
            Segment::Break => 1,
        }
    }
}

/// Appends `incoming` to `segments`, merging a text run into the previous one when the
/// styles match. Rendering is unaffected by where chunk boundaries fell.
pub fn extend_segments(segments: &mut Vec<Segment>, incoming: impl IntoIterator<Item = Segment>) {
    for seg in incoming {
        match (segments.last_mut(), seg) {
            (
                Some(Segment::Text { text, style }),
                Segment::Text {
                    text: more,
                    style: more_style,
                },
            ) if *style == more_style => text.push_str(&more),
            (_, seg) => segments.push(seg),
        }
    }
}

/// Receives parser callbacks for one chunk and collects the segments they produce.
#[derive(Debug, Default)]
struct SegmentSink {
    style: Style,
    text: String,
    out: Vec<Segment>,
    /// A `\r` that becomes a break unless `\n` follows.
    held_cr: bool,
}

impl SegmentSink {
    /// Runs whose style did not actually change come out as one segment.
    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let run = Segment::Text {
                text: std::mem::take(&mut self.text),
                style: self.style,
            };
            extend_segments(&mut self.out, [run]);
        }
    }

    fn release_cr(&mut self) {
        if std::mem::take(&mut self.held_cr) {
            self.flush_text();
            self.out.push(Segment::Break);
        }
    }

    fn apply_sgr(&mut self, params: &Params) {
        let mut codes = params.iter().flatten().copied().peekable();
        if codes.peek().is_none() {
            self.style = Style::default();
            return;
        }
        while let Some(code) = codes.next() {
            match code {
                0 => self.style = Style::default(),
                1 => self.style.bold = true,
                2 => self.style.faint = true,
                3 => self.style.italic = true,
                4 => self.style.underline = true,
                22 => {
                    self.style.bold = false;
                    self.style.faint = false;
                }
                23 => self.style.italic = false,
                24 => self.style.underline = false,
                30..=37 => self.style.fg = Some(Color::Indexed((code - 30) as u8)),
                38 => self.style.fg = extended_color(&mut codes),
                39 => self.style.fg = None,
                40..=47 => self.style.bg = Some(Color::Indexed((code - 40) as u8)),
                48 => self.style.bg = extended_color(&mut codes),
                49 => self.style.bg = None,
                90..=97 => self.style.fg = Some(Color::Indexed((code - 90 + 8) as u8)),
                100..=107 => self.style.bg = Some(Color::Indexed((code - 100 + 8) as u8)),
                _ => {}
            }
        }
    }
}

impl Perform for SegmentSink {
    fn print(&mut self, c: char) {
        self.release_cr();
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.held_cr = false;
                self.flush_text();
                self.out.push(Segment::Break);
            }
            b'\r' => {
                self.release_cr();
                self.held_cr = true;
            }
            b'\t' => {
                self.release_cr();
                self.text.push('\t');
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        // Private markers (`>`, `?`) arrive as intermediates; those are not SGR.
        if action != 'm' || ignore || !intermediates.is_empty() {
            return;
        }
        self.flush_text();
        self.apply_sgr(params);
    }

    // OSC (titles, hyperlinks), DCS and plain ESC sequences are swallowed by the defaults.
}

pub struct AnsiConverter {
    parser: Parser,
    sink: SegmentSink,
}

impl Default for AnsiConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AnsiConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnsiConverter")
            .field("style", &self.sink.style)
            .field("held_cr", &self.sink.held_cr)
            .finish_non_exhaustive()
    }
}

impl AnsiConverter {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: SegmentSink::default(),
        }
    }

    /// Converts one chunk. A partial escape sequence of any length stays inside the parser
    /// until its terminator arrives.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.parser.advance(&mut self.sink, chunk.as_bytes());
        self.sink.flush_text();
        std::mem::take(&mut self.sink.out)
    }

    /// Ends the stream: a held `\r` becomes a break, a dangling partial escape is discarded.
    pub fn finish(&mut self) -> Vec<Segment> {
        let held_cr = self.sink.held_cr;
        self.parser = Parser::new();
        self.sink = SegmentSink::default();
        if held_cr {
            vec![Segment::Break]
        } else {
            Vec::new()
        }
    }

    /// True while a trailing `\r` is waiting to learn whether `\n` follows.
    pub fn holds_line_break(&self) -> bool {
        self.sink.held_cr
    }
}

/// Parses the tail of a `38;…`/`48;…` sequence: `5;n` or `2;r;g;b`.
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    let clamp = |v: u16| v.min(255) as u8;
    match iter.next()? {
        5 => Some(Color::Indexed(clamp(iter.next()?))),
        2 => {
            let r = clamp(iter.next()?);
            let g = clamp(iter.next()?);
            let b = clamp(iter.next()?);
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

/// Converts a complete log in one go with a fresh converter.
pub fn convert_all(text: &str) -> Vec<Segment> {
    let mut converter = AnsiConverter::new();
    let mut segments = converter.push(text);
    let tail = converter.finish();
    extend_segments(&mut segments, tail);
    segments
}

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
}

/// Renders segments as inline-styled HTML with `<br/>` line breaks.
pub fn to_html(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Break => out.push_str("<br/>"),
            Segment::Text { text, style } if style.is_plain() => escape_html(text, &mut out),
            Segment::Text { text, style } => {
                let _ = write!(out, "<span style=\"{}\">", style.css());
                escape_html(text, &mut out);
                out.push_str("</span>");
            }
        }
    }
    out
}

/// Text as a reader would see it, with breaks as `\n`.
pub fn visible_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Text { text, .. } => out.push_str(text),
            Segment::Break => out.push('\n'),
        }
    }
    out
}
