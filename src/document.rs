//! Styled document model and its HTML serialization.
//!
//! A [`Document`] is built once in the *tagged* state and later flipped to
//! the *stripped* state with [`Document::strip_colors`]. The flip touches
//! nothing but the [`TagState`]: blocks, runs, whitespace and styles stay the
//! same object, so both renders share one layout. Only the colors emitted by
//! [`Document::to_html`] differ between the two states.

use crate::color::Color;
use std::fmt::Write as _;

// ── Styles ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Center,
    Left,
    Right,
    Justify,
}

impl Alignment {
    /// Order used by the `p_*_alignment` weight lists.
    pub const ALL: [Alignment; 4] = [
        Alignment::Center,
        Alignment::Left,
        Alignment::Right,
        Alignment::Justify,
    ];

    fn css(self) -> &'static str {
        match self {
            Alignment::Center => "center",
            Alignment::Left => "left",
            Alignment::Right => "right",
            Alignment::Justify => "justify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSpacing {
    OneAndHalf,
    Double,
}

impl LineSpacing {
    pub const ALL: [LineSpacing; 2] = [LineSpacing::OneAndHalf, LineSpacing::Double];

    fn css(self) -> &'static str {
        match self {
            LineSpacing::OneAndHalf => "150%",
            LineSpacing::Double => "200%",
        }
    }
}

/// Page-wide style, sampled once per document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStyle {
    pub columns: u8,
    pub font_family: String,
    pub font_size_pt: u32,
    pub line_spacing: LineSpacing,
    pub text_alignment: Alignment,
    pub heading_bold: bool,
    pub heading_relative_size: f64,
    pub heading_alignment: Alignment,
}

impl Default for DocumentStyle {
    fn default() -> Self {
        Self {
            columns: 1,
            font_family: "Liberation Serif".to_string(),
            font_size_pt: 11,
            line_spacing: LineSpacing::OneAndHalf,
            text_alignment: Alignment::Left,
            heading_bold: true,
            heading_relative_size: 1.5,
            heading_alignment: Alignment::Left,
        }
    }
}

// ── Content ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

/// One word as placed in a document. Immutable once placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordOccurrence {
    pub text: String,
    pub format: TextFormat,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Run {
    /// Uncolored whitespace between words (a single space, or the
    /// paragraph indent).
    Space(String),
    Word(WordOccurrence),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn words(&self) -> impl Iterator<Item = &WordOccurrence> {
        self.runs.iter().filter_map(|r| match r {
            Run::Word(w) => Some(w),
            Run::Space(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Paragraph),
    Heading { level: u8, content: Paragraph },
    Table { rows: Vec<Vec<Paragraph>> },
}

impl Block {
    fn words(&self) -> Box<dyn Iterator<Item = &WordOccurrence> + '_> {
        match self {
            Block::Paragraph(p) | Block::Heading { content: p, .. } => Box::new(p.words()),
            Block::Table { rows } => Box::new(rows.iter().flatten().flat_map(Paragraph::words)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Every word sits on its own color tag.
    Tagged,
    /// Tags removed: black text on white, black table borders.
    Stripped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub style: DocumentStyle,
    state: TagState,
}

impl Document {
    pub fn new(style: DocumentStyle) -> Self {
        Self {
            blocks: Vec::new(),
            style,
            state: TagState::Tagged,
        }
    }

    pub fn state(&self) -> TagState {
        self.state
    }

    /// Switch to the stripped state in place. Layout is untouched.
    pub fn strip_colors(&mut self) {
        self.state = TagState::Stripped;
    }

    /// All word occurrences in document order.
    pub fn words(&self) -> impl Iterator<Item = &WordOccurrence> {
        self.blocks.iter().flat_map(Block::words)
    }

    pub fn word_count(&self) -> usize {
        self.words().count()
    }

    /// Serialize to a standalone HTML page for the conversion service.
    pub fn to_html(&self) -> String {
        let s = &self.style;
        let mut html = String::with_capacity(4096);
        html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><style>\n");
        let _ = writeln!(
            html,
            "body {{ font-family: '{}'; font-size: {}pt; column-count: {}; }}",
            escape(&s.font_family),
            s.font_size_pt,
            s.columns
        );
        let _ = writeln!(
            html,
            "p {{ margin: 0; text-align: {}; line-height: {}; }}",
            s.text_alignment.css(),
            s.line_spacing.css()
        );
        let _ = writeln!(
            html,
            "h1, h2, h3, h4, h5, h6 {{ text-align: {}; font-size: {:.1}pt; font-weight: {}; margin: 0; }}",
            s.heading_alignment.css(),
            s.heading_relative_size * f64::from(s.font_size_pt),
            if s.heading_bold { "bold" } else { "normal" }
        );
        html.push_str("td p { text-align: left; line-height: 100%; }\n");
        html.push_str("</style></head><body>\n");

        for block in &self.blocks {
            self.write_block(&mut html, block);
        }

        html.push_str("</body></html>\n");
        html
    }

    fn write_block(&self, html: &mut String, block: &Block) {
        match block {
            Block::Paragraph(p) => {
                html.push_str("<p>");
                self.write_runs(html, p);
                html.push_str("</p>\n");
            }
            Block::Heading { level, content } => {
                let level = (*level).clamp(1, 6);
                let _ = write!(html, "<h{level}>");
                self.write_runs(html, content);
                let _ = writeln!(html, "</h{level}>");
                // Single-spaced spacer paragraph after each heading.
                html.push_str("<p style=\"line-height: 100%\">&#160;</p>\n");
            }
            Block::Table { rows } => {
                let border = match self.state {
                    TagState::Tagged => Color::WHITE,
                    TagState::Stripped => Color::BLACK,
                };
                let _ = writeln!(
                    html,
                    "<table border=\"1\" cellspacing=\"0\" style=\"border-collapse: collapse; border: 1px solid {border};\">"
                );
                for row in rows {
                    html.push_str("<tr>");
                    for cell in row {
                        let _ = write!(html, "<td style=\"border: 1px solid {border};\"><p>");
                        self.write_runs(html, cell);
                        html.push_str("</p></td>");
                    }
                    html.push_str("</tr>\n");
                }
                html.push_str("</table>\n");
            }
        }
    }

    fn write_runs(&self, html: &mut String, paragraph: &Paragraph) {
        for run in &paragraph.runs {
            match run {
                Run::Space(s) => {
                    if s.len() > 1 {
                        html.push_str(&"&#160;".repeat(s.len()));
                    } else {
                        html.push(' ');
                    }
                }
                Run::Word(w) => self.write_word(html, w),
            }
        }
    }

    fn write_word(&self, html: &mut String, word: &WordOccurrence) {
        let (fill, ink) = match self.state {
            TagState::Tagged => (word.color, word.color),
            TagState::Stripped => (Color::WHITE, Color::BLACK),
        };
        let _ = write!(html, "<span style=\"background: {fill}; color: {ink};\">");
        let f = word.format;
        if f.bold {
            html.push_str("<b>");
        }
        if f.italic {
            html.push_str("<i>");
        }
        if f.underline {
            html.push_str("<u>");
        }
        html.push_str(&escape(&word.text));
        if f.underline {
            html.push_str("</u>");
        }
        if f.italic {
            html.push_str("</i>");
        }
        if f.bold {
            html.push_str("</b>");
        }
        html.push_str("</span>");
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, color: Color) -> Run {
        Run::Word(WordOccurrence {
            text: text.to_string(),
            format: TextFormat::default(),
            color,
        })
    }

    fn sample() -> Document {
        let mut doc = Document::new(DocumentStyle::default());
        doc.blocks.push(Block::Heading {
            level: 2,
            content: Paragraph {
                runs: vec![word("Title", Color::new(0, 0, 1))],
            },
        });
        doc.blocks.push(Block::Paragraph(Paragraph {
            runs: vec![
                Run::Space("    ".into()),
                word("a", Color::new(0, 0, 2)),
                Run::Space(" ".into()),
                word("<b>", Color::new(0, 1, 0)),
            ],
        }));
        doc.blocks.push(Block::Table {
            rows: vec![vec![
                Paragraph {
                    runs: vec![word("x", Color::new(0, 1, 1))],
                },
                Paragraph::default(),
            ]],
        });
        doc
    }

    #[test]
    fn counts_words_across_blocks() {
        let doc = sample();
        assert_eq!(doc.word_count(), 4);
        let texts: Vec<_> = doc.words().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, ["Title", "a", "<b>", "x"]);
    }

    #[test]
    fn tagged_html_carries_tag_colors() {
        let html = sample().to_html();
        assert!(html.contains("background: #000002; color: #000002;"));
        assert!(html.contains("border: 1px solid #ffffff;"));
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("&#160;&#160;&#160;&#160;"));
    }

    #[test]
    fn stripping_keeps_layout_and_drops_colors() {
        let mut doc = sample();
        let tagged = doc.to_html();
        let blocks_before = doc.blocks.clone();

        doc.strip_colors();
        assert_eq!(doc.state(), TagState::Stripped);
        assert_eq!(doc.blocks, blocks_before);

        let stripped = doc.to_html();
        assert!(!stripped.contains("#000002"));
        assert!(stripped.contains("background: #ffffff; color: #000000;"));
        assert!(stripped.contains("border: 1px solid #000000;"));

        // Same markup apart from color values.
        let shape = |s: &str| s.replace(|c: char| c.is_ascii_hexdigit(), "");
        assert_eq!(shape(&tagged), shape(&stripped));
    }

    #[test]
    fn formatting_wraps_word() {
        let mut doc = Document::new(DocumentStyle::default());
        doc.blocks.push(Block::Paragraph(Paragraph {
            runs: vec![Run::Word(WordOccurrence {
                text: "bold".into(),
                format: TextFormat {
                    bold: true,
                    italic: true,
                    underline: false,
                },
                color: Color::new(0, 0, 5),
            })],
        }));
        assert!(doc.to_html().contains("<b><i>bold</i></b>"));
    }
}
