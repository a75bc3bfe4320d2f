//! HTML page → tagged [`Document`].
//!
//! The builder walks `p`, `h1`–`h6` and `table` elements in document order,
//! splits their text into words and asks the [`ColorAllocator`] for one tag
//! color per word occurrence. Insertion stops after the block that pushes the
//! word count past `max_words`.
//!
//! The allocator is moved in and its registry handed back with the document,
//! so a registry always belongs to exactly one job.

use crate::color::{ColorAllocator, ColorRegistry};
use crate::config::StyleConfig;
use crate::document::{
    Alignment, Block, Document, DocumentStyle, LineSpacing, Paragraph, Run, TextFormat,
    WordOccurrence,
};
use crate::error::ColorExhausted;
use once_cell::sync::Lazy;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, h1, h2, h3, h4, h5, h6, table").expect("block selector"));
static ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("cell selector"));

/// Bracketed references such as `[12]` or `[citation needed]`.
static RE_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").unwrap());

/// Words starting with one of these attach to the previous word.
const NO_SPACE_BEFORE: &[char] = &[',', '.', '?', '!', ':', ';', ')', '}', ']', '»'];
/// Words ending with one of these attach to the next word.
const NO_SPACE_AFTER: &[char] = &['«', '[', '{', '('];

const PARAGRAPH_INDENT: &str = "    ";

/// Builds styled, color-tagged documents from HTML.
pub struct DocumentBuilder<R> {
    style: StyleConfig,
    rng: R,
}

impl<R: Rng> DocumentBuilder<R> {
    pub fn new(style: StyleConfig, rng: R) -> Self {
        Self { style, rng }
    }

    /// Sample one document's style from the configured distribution.
    pub fn sample_style(&mut self) -> DocumentStyle {
        let s = &self.style;
        let rng = &mut self.rng;

        let columns = if rng.random_bool(s.p_2columns.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        let [lo, hi] = s.font_size_interval;
        let font_size_pt = rng.random_range(lo..hi.max(lo + 1));
        let font_family = if s.fonts.is_empty() {
            DocumentStyle::default().font_family
        } else {
            s.fonts[rng.random_range(0..s.fonts.len())].clone()
        };
        let [rlo, rhi] = s.heading_relative_size_interval;

        DocumentStyle {
            columns,
            font_family,
            font_size_pt,
            line_spacing: LineSpacing::ALL[weighted(rng, &s.p_line_spacing)],
            text_alignment: Alignment::ALL[weighted(rng, &s.p_text_alignment)],
            heading_bold: rng.random_bool(s.p_heading_bold.clamp(0.0, 1.0)),
            heading_relative_size: rng.random_range(rlo..=rhi.max(rlo)),
            heading_alignment: Alignment::ALL[weighted(rng, &s.p_heading_alignment)],
        }
    }

    /// Build a tagged document from an HTML page.
    ///
    /// Returns the document together with the registry of every color it
    /// uses. Fails only when the palette runs out.
    pub fn build(
        &mut self,
        html: &str,
        allocator: ColorAllocator,
    ) -> Result<(Document, ColorRegistry), ColorExhausted> {
        let style = self.sample_style();
        let mut state = BuildState {
            doc: Document::new(style),
            allocator,
            last_was_heading: false,
        };

        let page = Html::parse_document(html);
        for element in page.select(&BLOCKS) {
            let name = element.value().name();
            match name {
                "table" => state.add_table(element, &self.style)?,
                "p" => state.add_paragraph(element)?,
                _ => {
                    let level = name[1..].parse().unwrap_or(1);
                    state.add_heading(element, level, &self.style)?;
                }
            }

            if state.allocator.registry().len() > self.style.max_words {
                debug!(
                    "Word budget {} exceeded after {} blocks",
                    self.style.max_words,
                    state.doc.blocks.len()
                );
                break;
            }
        }

        Ok((state.doc, state.allocator.into_registry()))
    }
}

fn weighted<R: Rng>(rng: &mut R, weights: &[f64]) -> usize {
    WeightedIndex::new(weights)
        .map(|dist| dist.sample(rng))
        .unwrap_or(0)
}

struct BuildState {
    doc: Document,
    allocator: ColorAllocator,
    last_was_heading: bool,
}

impl BuildState {
    fn push(&mut self, block: Block) {
        self.last_was_heading = matches!(block, Block::Heading { .. });
        self.doc.blocks.push(block);
    }

    fn add_heading(
        &mut self,
        element: ElementRef<'_>,
        level: u8,
        style: &StyleConfig,
    ) -> Result<(), ColorExhausted> {
        if self.last_was_heading {
            return Ok(());
        }
        let text: String = element.text().collect();
        if style.skip_headings.iter().any(|h| h == &text) {
            return Ok(());
        }
        let mut content = Paragraph::default();
        let mut writer = WordWriter::detached();
        writer.add(&mut self.allocator, &mut content, &text, TextFormat::default())?;
        self.push(Block::Heading { level, content });
        Ok(())
    }

    fn add_paragraph(&mut self, element: ElementRef<'_>) -> Result<(), ColorExhausted> {
        let mut paragraph = Paragraph::default();
        let mut writer = WordWriter::paragraph_start();
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                writer.add(
                    &mut self.allocator,
                    &mut paragraph,
                    text,
                    TextFormat::default(),
                )?;
            } else if let Some(inline) = ElementRef::wrap(child) {
                let text: String = inline.text().collect();
                let format = inline_format(inline.value().name());
                writer.add(&mut self.allocator, &mut paragraph, &text, format)?;
            }
        }
        self.push(Block::Paragraph(paragraph));
        Ok(())
    }

    fn add_table(
        &mut self,
        element: ElementRef<'_>,
        style: &StyleConfig,
    ) -> Result<(), ColorExhausted> {
        let cells: Vec<Vec<String>> = element
            .select(&ROWS)
            .map(|row| {
                row.select(&CELLS)
                    .map(|cell| cell.text().collect::<String>().trim().to_string())
                    .collect()
            })
            .collect();

        let rows = cells.len();
        let cols = cells.iter().map(Vec::len).max().unwrap_or(0);
        if rows == 0 || rows > style.table_max_rows || cols > style.table_max_cols {
            debug!("Skipping {rows}x{cols} table");
            return Ok(());
        }

        let mut table = Vec::with_capacity(rows);
        for row in &cells {
            let mut out = Vec::with_capacity(cols);
            for col in 0..cols {
                let mut paragraph = Paragraph::default();
                if let Some(text) = row.get(col) {
                    WordWriter::detached().add(
                        &mut self.allocator,
                        &mut paragraph,
                        text,
                        TextFormat::default(),
                    )?;
                }
                out.push(paragraph);
            }
            table.push(out);
        }
        self.push(Block::Table { rows: table });
        Ok(())
    }
}

fn inline_format(tag: &str) -> TextFormat {
    match tag {
        "b" | "strong" => TextFormat {
            bold: true,
            ..TextFormat::default()
        },
        "i" | "em" => TextFormat {
            italic: true,
            ..TextFormat::default()
        },
        "u" => TextFormat {
            underline: true,
            ..TextFormat::default()
        },
        _ => TextFormat::default(),
    }
}

/// Tracks spacing state across the text pieces of one paragraph.
struct WordWriter {
    prev_word: Option<String>,
    indent_next: bool,
}

impl WordWriter {
    /// First word gets the paragraph indent.
    fn paragraph_start() -> Self {
        Self {
            prev_word: None,
            indent_next: true,
        }
    }

    /// Headings and table cells: plain single spaces.
    fn detached() -> Self {
        Self {
            prev_word: None,
            indent_next: false,
        }
    }

    fn add(
        &mut self,
        allocator: &mut ColorAllocator,
        paragraph: &mut Paragraph,
        text: &str,
        format: TextFormat,
    ) -> Result<(), ColorExhausted> {
        let cleaned = RE_REFERENCE.replace_all(text, "");
        for word in cleaned.split_whitespace() {
            let attaches_left = word.starts_with(NO_SPACE_BEFORE);
            let attaches_right = self
                .prev_word
                .as_deref()
                .is_some_and(|p| p.ends_with(NO_SPACE_AFTER));
            if !attaches_left && !attaches_right {
                let space = if self.indent_next { PARAGRAPH_INDENT } else { " " };
                paragraph.runs.push(Run::Space(space.to_string()));
            }
            self.indent_next = false;

            let color = allocator.tag(word)?;
            paragraph.runs.push(Run::Word(WordOccurrence {
                text: word.to_string(),
                format,
                color,
            }));
            self.prev_word = Some(word.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn builder(style: StyleConfig) -> DocumentBuilder<StdRng> {
        DocumentBuilder::new(style, StdRng::seed_from_u64(7))
    }

    fn texts(doc: &Document) -> Vec<String> {
        doc.words().map(|w| w.text.clone()).collect()
    }

    fn runs_as_text(p: &Paragraph) -> String {
        p.runs
            .iter()
            .map(|r| match r {
                Run::Space(s) => s.as_str(),
                Run::Word(w) => w.text.as_str(),
            })
            .collect()
    }

    #[test]
    fn every_word_gets_a_registered_color() {
        let html = "<html><body><p>The cat sat on the mat.</p></body></html>";
        let (doc, registry) = builder(StyleConfig::default())
            .build(html, ColorAllocator::new(100))
            .unwrap();
        assert_eq!(texts(&doc), ["The", "cat", "sat", "on", "the", "mat."]);
        assert_eq!(registry.len(), 6);
        for w in doc.words() {
            assert_eq!(registry.lookup(&w.color), Some(w.text.as_str()));
        }
    }

    #[test]
    fn references_are_removed_and_punctuation_attaches() {
        let html = "<p>Rust[1] is fast ( really ) , right ?</p>";
        let (doc, _) = builder(StyleConfig::default())
            .build(html, ColorAllocator::new(100))
            .unwrap();
        let Block::Paragraph(p) = &doc.blocks[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(runs_as_text(p), "    Rust is fast (really), right?");
    }

    #[test]
    fn inline_formatting_is_kept() {
        let html = "<p>plain <b>bold</b> <i>slanted</i> <u>under</u></p>";
        let (doc, _) = builder(StyleConfig::default())
            .build(html, ColorAllocator::new(100))
            .unwrap();
        let formats: Vec<_> = doc.words().map(|w| w.format).collect();
        assert_eq!(formats[0], TextFormat::default());
        assert!(formats[1].bold);
        assert!(formats[2].italic);
        assert!(formats[3].underline);
    }

    #[test]
    fn consecutive_headings_and_contents_are_skipped() {
        let html = "<h2>Contents</h2><h1>First</h1><h2>Second</h2><p>body</p><h3>Third</h3>";
        let (doc, _) = builder(StyleConfig::default())
            .build(html, ColorAllocator::new(100))
            .unwrap();
        assert_eq!(texts(&doc), ["First", "body", "Third"]);
        assert!(matches!(doc.blocks[0], Block::Heading { level: 1, .. }));
    }

    #[test]
    fn oversized_tables_are_dropped() {
        let style = StyleConfig {
            table_max_cols: 2,
            ..StyleConfig::default()
        };
        let html = "<table><tr><td>a</td><td>b</td><td>c</td></tr></table>\
                    <table><tr><th>h1</th><th>h2</th></tr><tr><td> x </td></tr></table>";
        let (doc, _) = builder(style).build(html, ColorAllocator::new(100)).unwrap();
        assert_eq!(doc.blocks.len(), 1);
        let Block::Table { rows } = &doc.blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 2);
        assert!(rows[1][1].is_empty());
        assert_eq!(texts(&doc), ["h1", "h2", "x"]);
    }

    #[test]
    fn stops_after_block_exceeding_budget() {
        let style = StyleConfig {
            max_words: 3,
            ..StyleConfig::default()
        };
        let html = "<p>one two</p><p>three four five</p><p>six</p>";
        let (doc, registry) = builder(style).build(html, ColorAllocator::new(100)).unwrap();
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn palette_exhaustion_fails_the_document() {
        let html = "<p>a b c d e f g h i j</p>";
        // capacity 1 → 8 colors
        let err = builder(StyleConfig::default())
            .build(html, ColorAllocator::new(1))
            .unwrap_err();
        assert_eq!(err, ColorExhausted { capacity: 8 });
    }

    #[test]
    fn sampled_style_respects_intervals() {
        let style = StyleConfig {
            font_size_interval: [9, 10],
            heading_relative_size_interval: [1.2, 1.2],
            p_2columns: 1.0,
            fonts: vec!["Only Font".into()],
            p_text_alignment: [0.0, 0.0, 0.0, 1.0],
            ..StyleConfig::default()
        };
        let sampled = builder(style).sample_style();
        assert_eq!(sampled.font_size_pt, 9);
        assert_eq!(sampled.columns, 2);
        assert_eq!(sampled.font_family, "Only Font");
        assert_eq!(sampled.text_alignment, Alignment::Justify);
        assert!((sampled.heading_relative_size - 1.2).abs() < 1e-12);
    }
}
