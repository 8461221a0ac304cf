//! Office document extraction: DOCX, PPTX, ODT via streaming XML over the
//! OPC/ODF zip containers, XLSX via calamine.
//!
//! Documents parse into a flat block list (headings, paragraphs, tables)
//! which renders as markdown (default), HTML, or a structured JSON tree.

use crate::error::{CcoreError, Result};
use crate::extraction::cells_to_markdown;
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::types::{Category, OutputFormat, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use calamine::Reader as CalamineReader;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

use crate::core::mime::{DOCX_MIME_TYPE, ODT_MIME_TYPE, PPTX_MIME_TYPE, XLSX_MIME_TYPE};

/// One structural unit of a parsed document.
#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Table(Vec<Vec<String>>),
}

fn render_markdown(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Heading { level, text } => {
                out.push_str(&"#".repeat(usize::from(*level).clamp(1, 6)));
                out.push(' ');
                out.push_str(text);
                out.push_str("\n\n");
            }
            Block::Paragraph(text) => {
                out.push_str(text);
                out.push_str("\n\n");
            }
            Block::Table(cells) => {
                out.push_str(&cells_to_markdown(cells));
                out.push('\n');
            }
        }
    }
    out.trim_end().to_string()
}

fn render_html(blocks: &[Block]) -> String {
    fn escape(text: &str) -> String {
        text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    }

    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Heading { level, text } => {
                let level = usize::from(*level).clamp(1, 6);
                out.push_str(&format!("<h{level}>{}</h{level}>\n", escape(text)));
            }
            Block::Paragraph(text) => out.push_str(&format!("<p>{}</p>\n", escape(text))),
            Block::Table(cells) => {
                out.push_str("<table>\n");
                for row in cells {
                    out.push_str("<tr>");
                    for cell in row {
                        out.push_str(&format!("<td>{}</td>", escape(cell)));
                    }
                    out.push_str("</tr>\n");
                }
                out.push_str("</table>\n");
            }
        }
    }
    out
}

fn render_structured(blocks: &[Block]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = blocks
        .iter()
        .map(|block| match block {
            Block::Heading { level, text } => serde_json::json!({
                "type": "heading",
                "level": level,
                "text": text,
            }),
            Block::Paragraph(text) => serde_json::json!({
                "type": "paragraph",
                "text": text,
            }),
            Block::Table(cells) => serde_json::json!({
                "type": "table",
                "cells": cells,
            }),
        })
        .collect();
    serde_json::json!({ "blocks": items })
}

fn read_zip_entry(bytes: &[u8], entry_name: &str) -> Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| CcoreError::parse(format!("Not a valid office container: {e}")))?;
    let result = match archive.by_name(entry_name) {
        Ok(mut entry) => {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| CcoreError::parse(format!("Failed to read {entry_name}: {e}")))?;
            Ok(Some(content))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(CcoreError::parse(format!("Failed to open {entry_name}: {e}"))),
    };
    result
}

fn list_zip_entries(bytes: &[u8]) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| CcoreError::parse(format!("Not a valid office container: {e}")))?;
    Ok(archive.file_names().map(String::from).collect())
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn heading_level_from_docx_style(style: &str) -> Option<u8> {
    if style.eq_ignore_ascii_case("Title") {
        return Some(1);
    }
    style
        .strip_prefix("Heading")
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=6).contains(n))
}

/// Parse WordprocessingML into blocks: paragraphs with bold/italic run
/// formatting, heading styles, and tables.
fn parse_docx_xml(xml: &str) -> Result<Vec<Block>> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();

    let mut paragraph = String::new();
    let mut style: Option<String> = None;
    let mut in_run_props = false;
    let mut run_bold = false;
    let mut run_italic = false;

    let mut table: Option<Vec<Vec<String>>> = None;
    let mut cell: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    if table.is_none() {
                        paragraph.clear();
                        style = None;
                    }
                }
                b"w:rPr" => in_run_props = true,
                b"w:tbl" => table = Some(Vec::new()),
                b"w:tr" => {
                    if let Some(rows) = table.as_mut() {
                        rows.push(Vec::new());
                    }
                }
                b"w:tc" => cell = Some(String::new()),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:pStyle" => style = attr_value(&e, b"w:val"),
                b"w:b" if in_run_props => run_bold = true,
                b"w:i" if in_run_props => run_italic = true,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if text.is_empty() {
                    continue;
                }
                let formatted = match (run_bold, run_italic) {
                    (true, true) => format!("***{text}***"),
                    (true, false) => format!("**{text}**"),
                    (false, true) => format!("*{text}*"),
                    (false, false) => text,
                };
                if let Some(current) = cell.as_mut() {
                    current.push_str(&formatted);
                } else {
                    paragraph.push_str(&formatted);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:rPr" => in_run_props = false,
                b"w:r" => {
                    run_bold = false;
                    run_italic = false;
                }
                b"w:tc" => {
                    if let (Some(rows), Some(text)) = (table.as_mut(), cell.take()) {
                        if let Some(row) = rows.last_mut() {
                            row.push(text.trim().to_string());
                        }
                    }
                }
                b"w:tbl" => {
                    if let Some(rows) = table.take() {
                        if !rows.is_empty() {
                            blocks.push(Block::Table(rows));
                        }
                    }
                }
                b"w:p" => {
                    if table.is_none() {
                        let text = paragraph.trim().to_string();
                        if !text.is_empty() {
                            match style.as_deref().and_then(heading_level_from_docx_style) {
                                Some(level) => blocks.push(Block::Heading { level, text }),
                                None => blocks.push(Block::Paragraph(text)),
                            }
                        }
                        paragraph.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CcoreError::parse(format!("Malformed DOCX XML: {e}"))),
            _ => {}
        }
    }

    Ok(blocks)
}

/// Parse ODF content: `text:h` headings with outline levels, `text:p`
/// paragraphs, and tables.
fn parse_odt_xml(xml: &str) -> Result<Vec<Block>> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();

    let mut text_buffer = String::new();
    let mut heading_level: Option<u8> = None;
    let mut collecting = false;

    let mut table: Option<Vec<Vec<String>>> = None;
    let mut cell: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"text:h" => {
                    collecting = true;
                    text_buffer.clear();
                    heading_level = attr_value(&e, b"text:outline-level")
                        .and_then(|v| v.parse::<u8>().ok())
                        .or(Some(1));
                }
                b"text:p" => {
                    if cell.is_none() {
                        collecting = true;
                        text_buffer.clear();
                        heading_level = None;
                    }
                }
                b"table:table" => table = Some(Vec::new()),
                b"table:table-row" => {
                    if let Some(rows) = table.as_mut() {
                        rows.push(Vec::new());
                    }
                }
                b"table:table-cell" => cell = Some(String::new()),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if let Some(current) = cell.as_mut() {
                    current.push_str(&text);
                } else if collecting {
                    text_buffer.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"text:h" => {
                    let text = text_buffer.trim().to_string();
                    if !text.is_empty() {
                        blocks.push(Block::Heading {
                            level: heading_level.unwrap_or(1),
                            text,
                        });
                    }
                    collecting = false;
                }
                b"text:p" => {
                    if cell.is_none() {
                        let text = text_buffer.trim().to_string();
                        if !text.is_empty() {
                            blocks.push(Block::Paragraph(text));
                        }
                        collecting = false;
                    }
                }
                b"table:table-cell" => {
                    if let (Some(rows), Some(text)) = (table.as_mut(), cell.take()) {
                        if let Some(row) = rows.last_mut() {
                            row.push(text.trim().to_string());
                        }
                    }
                }
                b"table:table" => {
                    if let Some(rows) = table.take() {
                        if !rows.is_empty() {
                            blocks.push(Block::Table(rows));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CcoreError::parse(format!("Malformed ODT XML: {e}"))),
            _ => {}
        }
    }

    Ok(blocks)
}

/// Parse one DrawingML slide: each `a:p` becomes a paragraph.
fn parse_slide_xml(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"a:p" => {
                in_paragraph = true;
                current.clear();
            }
            Ok(Event::Text(t)) if in_paragraph => {
                current.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"a:p" => {
                let text = current.trim().to_string();
                if !text.is_empty() {
                    paragraphs.push(text);
                }
                in_paragraph = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CcoreError::parse(format!("Malformed slide XML: {e}"))),
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn parse_docx(bytes: &[u8]) -> Result<Vec<Block>> {
    let xml = read_zip_entry(bytes, "word/document.xml")?
        .ok_or_else(|| CcoreError::parse("DOCX container has no word/document.xml"))?;
    parse_docx_xml(&xml)
}

fn parse_odt(bytes: &[u8]) -> Result<Vec<Block>> {
    let xml = read_zip_entry(bytes, "content.xml")?
        .ok_or_else(|| CcoreError::parse("ODT container has no content.xml"))?;
    parse_odt_xml(&xml)
}

fn parse_pptx(bytes: &[u8]) -> Result<Vec<Block>> {
    let mut slide_names: Vec<String> = list_zip_entries(bytes)?
        .into_iter()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .collect();
    if slide_names.is_empty() {
        return Err(CcoreError::parse("PPTX container has no slides"));
    }

    // slide10.xml must sort after slide2.xml.
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut blocks = Vec::new();
    for (index, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry(bytes, name)?.unwrap_or_default();
        let mut paragraphs = parse_slide_xml(&xml)?.into_iter();

        let title = paragraphs
            .next()
            .unwrap_or_else(|| format!("Slide {}", index + 1));
        blocks.push(Block::Heading { level: 2, text: title });
        for paragraph in paragraphs {
            blocks.push(Block::Paragraph(paragraph));
        }
    }
    Ok(blocks)
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<Block>> {
    let mut workbook = calamine::Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| CcoreError::parse(format!("Failed to open workbook: {e}")))?;

    let mut blocks = Vec::new();
    for (sheet_name, range) in workbook.worksheets() {
        blocks.push(Block::Heading {
            level: 2,
            text: sheet_name,
        });
        let cells: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();
        if !cells.is_empty() {
            blocks.push(Block::Table(cells));
        }
    }
    Ok(blocks)
}

/// DOCX/XLSX/PPTX/ODT extraction engine.
pub struct OfficeProcessor {
    capabilities: ProcessorCapabilities,
}

impl OfficeProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(
                &[DOCX_MIME_TYPE, XLSX_MIME_TYPE, PPTX_MIME_TYPE, ODT_MIME_TYPE],
                50,
                Category::Documents,
            )
            .with_extensions(&[".docx", ".xlsx", ".pptx", ".odt"]),
        }
    }
}

impl Default for OfficeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for OfficeProcessor {
    fn name(&self) -> &str {
        "office"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &["output_format"]);

        let path = source
            .as_file_path()
            .ok_or_else(|| CcoreError::unsupported("office processor requires a file source"))?;
        let mime = source
            .mime_type
            .clone()
            .or_else(|| crate::core::mime::detect_mime_from_path(path).map(String::from))
            .ok_or_else(|| CcoreError::unsupported("cannot determine office document type"))?;

        let bytes = tokio::fs::read(path).await?;

        // XML and workbook parsing is CPU-bound; keep it off the I/O executor.
        let mime_for_parse = mime.clone();
        let blocks = tokio::task::spawn_blocking(move || match mime_for_parse.as_str() {
            DOCX_MIME_TYPE => parse_docx(&bytes),
            XLSX_MIME_TYPE => parse_xlsx(&bytes),
            PPTX_MIME_TYPE => parse_pptx(&bytes),
            ODT_MIME_TYPE => parse_odt(&bytes),
            other => Err(CcoreError::unsupported(format!(
                "office processor does not handle '{other}'"
            ))),
        })
        .await
        .map_err(|e| CcoreError::Internal(format!("office worker panicked: {e}")))??;

        let format = source
            .output_format
            .or_else(|| ctx.option_str("output_format").and_then(OutputFormat::parse))
            .unwrap_or(ctx.output_format);

        let (content, result_mime) = match format {
            OutputFormat::Markdown => (render_markdown(&blocks), crate::core::mime::MARKDOWN_MIME_TYPE),
            OutputFormat::Html => (render_html(&blocks), crate::core::mime::HTML_MIME_TYPE),
            OutputFormat::Structured => (
                serde_json::to_string_pretty(&render_structured(&blocks))?,
                "application/json",
            ),
        };

        let mut result = ProcessorResult::new(content, result_mime);
        result.metadata.title = blocks.iter().find_map(|b| match b {
            Block::Heading { level: 1, text } => Some(text.clone()),
            _ => None,
        });
        result.metadata.insert("block_count", serde_json::json!(blocks.len()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCX_SAMPLE: &str = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Report Title</w:t></w:r></w:p>
    <w:p><w:r><w:t>Plain opening paragraph.</w:t></w:r></w:p>
    <w:p>
      <w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r>
      <w:r><w:t> and </w:t></w:r>
      <w:r><w:rPr><w:i/></w:rPr><w:t>italic</w:t></w:r>
    </w:p>
    <w:tbl>
      <w:tr><w:tc><w:p><w:r><w:t>H1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>H2</w:t></w:r></w:p></w:tc></w:tr>
      <w:tr><w:tc><w:p><w:r><w:t>a</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>b</w:t></w:r></w:p></w:tc></w:tr>
    </w:tbl>
  </w:body>
</w:document>"#;

    #[test]
    fn test_docx_headings_and_runs() {
        let blocks = parse_docx_xml(DOCX_SAMPLE).unwrap();
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 1,
                text: "Report Title".to_string()
            }
        );
        assert_eq!(blocks[1], Block::Paragraph("Plain opening paragraph.".to_string()));
        assert_eq!(blocks[2], Block::Paragraph("**bold** and *italic*".to_string()));
    }

    #[test]
    fn test_docx_tables() {
        let blocks = parse_docx_xml(DOCX_SAMPLE).unwrap();
        let table = blocks.iter().find_map(|b| match b {
            Block::Table(cells) => Some(cells.clone()),
            _ => None,
        });
        assert_eq!(
            table.unwrap(),
            vec![
                vec!["H1".to_string(), "H2".to_string()],
                vec!["a".to_string(), "b".to_string()]
            ]
        );
    }

    #[test]
    fn test_docx_markdown_render() {
        let blocks = parse_docx_xml(DOCX_SAMPLE).unwrap();
        let markdown = render_markdown(&blocks);
        assert!(markdown.contains("# Report Title"));
        assert!(markdown.contains("**bold** and *italic*"));
        assert!(markdown.contains("| H1 | H2 |"));
    }

    #[test]
    fn test_odt_parsing() {
        let xml = r#"<?xml version="1.0"?>
<office:document-content xmlns:office="o" xmlns:text="t" xmlns:table="tb">
  <office:body>
    <text:h text:outline-level="2">Section</text:h>
    <text:p>Body text.</text:p>
    <table:table>
      <table:table-row>
        <table:table-cell><text:p>x</text:p></table:table-cell>
        <table:table-cell><text:p>y</text:p></table:table-cell>
      </table:table-row>
    </table:table>
  </office:body>
</office:document-content>"#;
        let blocks = parse_odt_xml(xml).unwrap();
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 2,
                text: "Section".to_string()
            }
        );
        assert_eq!(blocks[1], Block::Paragraph("Body text.".to_string()));
        assert_eq!(
            blocks[2],
            Block::Table(vec![vec!["x".to_string(), "y".to_string()]])
        );
    }

    #[test]
    fn test_slide_paragraphs() {
        let xml = r#"<p:sld xmlns:a="a" xmlns:p="p">
          <p:txBody><a:p><a:r><a:t>Deck Title</a:t></a:r></a:p>
          <a:p><a:r><a:t>First </a:t></a:r><a:r><a:t>bullet</a:t></a:r></a:p></p:txBody>
        </p:sld>"#;
        let paragraphs = parse_slide_xml(xml).unwrap();
        assert_eq!(paragraphs, vec!["Deck Title", "First bullet"]);
    }

    #[test]
    fn test_heading_level_mapping() {
        assert_eq!(heading_level_from_docx_style("Heading1"), Some(1));
        assert_eq!(heading_level_from_docx_style("Heading3"), Some(3));
        assert_eq!(heading_level_from_docx_style("Title"), Some(1));
        assert_eq!(heading_level_from_docx_style("Heading9"), None);
        assert_eq!(heading_level_from_docx_style("BodyText"), None);
    }

    #[test]
    fn test_render_html() {
        let blocks = vec![
            Block::Heading {
                level: 2,
                text: "A <tag>".to_string(),
            },
            Block::Paragraph("p & q".to_string()),
        ];
        let html = render_html(&blocks);
        assert!(html.contains("<h2>A &lt;tag&gt;</h2>"));
        assert!(html.contains("<p>p &amp; q</p>"));
    }

    #[test]
    fn test_render_structured() {
        let blocks = vec![
            Block::Heading {
                level: 1,
                text: "T".to_string(),
            },
            Block::Table(vec![vec!["a".to_string()]]),
        ];
        let value = render_structured(&blocks);
        assert_eq!(value["blocks"][0]["type"], "heading");
        assert_eq!(value["blocks"][1]["type"], "table");
        assert_eq!(value["blocks"][1]["cells"][0][0], "a");
    }

    #[tokio::test]
    async fn test_docx_end_to_end_through_zip() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, DOCX_SAMPLE.as_bytes()).unwrap();
            writer.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, buffer.into_inner()).unwrap();

        let processor = OfficeProcessor::new();
        let result = processor
            .extract(
                &Source::file(&path).with_mime_type(DOCX_MIME_TYPE),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();

        assert!(result.content.contains("# Report Title"));
        assert_eq!(result.metadata.title.as_deref(), Some("Report Title"));
        assert_eq!(result.mime_type, "text/markdown");
    }

    #[tokio::test]
    async fn test_structured_output_format() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, DOCX_SAMPLE.as_bytes()).unwrap();
            writer.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, buffer.into_inner()).unwrap();

        let processor = OfficeProcessor::new();
        let result = processor
            .extract(
                &Source::file(&path)
                    .with_mime_type(DOCX_MIME_TYPE)
                    .with_output_format(OutputFormat::Structured),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.mime_type, "application/json");
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["blocks"][0]["text"], "Report Title");
    }

    #[tokio::test]
    async fn test_corrupt_container_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();

        let processor = OfficeProcessor::new();
        let result = processor
            .extract(
                &Source::file(&path).with_mime_type(DOCX_MIME_TYPE),
                &ProcessorContext::default(),
            )
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::Parse { .. }));
    }
}
