use serde_json::Value;
use thiserror::Error;

use super::contents::ContentsEntry;
use super::cover::{CoverImage, CoverPage};
use crate::sections::SectionOutput;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("failed to render {title}: {reason}")]
    Section { title: String, reason: String },

    #[error("contents pagination did not settle after {0} passes")]
    Unsettled(usize),
}

/// A rendered artifact split into pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub pages: Vec<String>,
}

impl Rendered {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Turns structured section data into paged artifacts. Page images or PDFs
/// live behind this trait; the assembler only counts and concatenates pages.
pub trait Renderer: Send + Sync {
    fn render_cover(&self, cover: &CoverPage) -> Result<Rendered, RenderError>;

    fn render_contents(&self, entries: &[ContentsEntry]) -> Result<Rendered, RenderError>;

    fn render_section(&self, title: &str, output: &SectionOutput) -> Result<Rendered, RenderError>;

    fn render_placeholder(&self, title: &str, reason: &str) -> Result<Rendered, RenderError>;
}

/// Fixed-width text pages with a fixed number of lines per page.
#[derive(Debug, Clone, Copy)]
pub struct PlainTextRenderer {
    pub lines_per_page: usize,
    pub width: usize,
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self {
            lines_per_page: 48,
            width: 90,
        }
    }
}

impl PlainTextRenderer {
    fn paginate(&self, lines: Vec<String>) -> Rendered {
        let per_page = self.lines_per_page.max(1);
        let mut pages: Vec<String> = lines
            .chunks(per_page)
            .map(|chunk| chunk.join("\n").trim_end().to_string())
            .collect();
        if pages.is_empty() {
            pages.push(String::new());
        }
        Rendered { pages }
    }

    fn heading(&self, title: &str) -> Vec<String> {
        vec![title.to_string(), "=".repeat(title.chars().count()), String::new()]
    }

    fn wrap(&self, text: &str, indent: &str, out: &mut Vec<String>) {
        let width = self.width.max(indent.len() + 10);
        let mut line = String::from(indent);
        for word in text.split_whitespace() {
            if line.len() > indent.len() && line.len() + 1 + word.len() > width {
                out.push(std::mem::replace(&mut line, String::from(indent)));
            }
            if line.len() > indent.len() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if line.len() > indent.len() {
            out.push(line);
        }
    }

    fn value_lines(&self, value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Null => {}
            Value::String(text) => {
                self.wrap(text, "", out);
                out.push(String::new());
            }
            Value::Number(_) | Value::Bool(_) => {
                out.push(value.to_string());
                out.push(String::new());
            }
            Value::Array(items) if items.iter().all(Value::is_string) => {
                for item in items.iter().filter_map(Value::as_str) {
                    self.wrap(&format!("- {item}"), "", out);
                }
                out.push(String::new());
            }
            Value::Array(items) => {
                for item in items {
                    self.value_lines(item, out);
                }
            }
            Value::Object(map) => {
                if let (Some(Value::Array(headers)), Some(Value::Array(rows))) =
                    (map.get("headers"), map.get("rows"))
                {
                    out.push(join_cells(headers));
                    for row in rows {
                        if let Value::Array(cells) = row {
                            out.push(join_cells(cells));
                        }
                    }
                    out.push(String::new());
                    return;
                }
                for (key, inner) in map {
                    if inner.is_null() {
                        continue;
                    }
                    match inner {
                        Value::String(text) => self.wrap(&format!("{}: {text}", humanize(key)), "", out),
                        Value::Number(_) | Value::Bool(_) => out.push(format!("{}: {inner}", humanize(key))),
                        _ => {
                            out.push(format!("{}:", humanize(key)));
                            self.value_lines(inner, out);
                        }
                    }
                }
                out.push(String::new());
            }
        }
    }
}

fn join_cells(cells: &[Value]) -> String {
    cells
        .iter()
        .map(|cell| cell.as_str().map_or_else(|| cell.to_string(), str::to_string))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn humanize(key: &str) -> String {
    let text = key.replace('_', " ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}

impl Renderer for PlainTextRenderer {
    fn render_cover(&self, cover: &CoverPage) -> Result<Rendered, RenderError> {
        let mut lines = self.heading("PROPERTY VALUATION REPORT");
        self.wrap(&cover.address, "", &mut lines);
        lines.push(String::new());
        lines.push(format!("Prepared for: {}", cover.client_name));
        lines.push(format!("Purpose: {}", cover.valuation_purpose));
        lines.push(format!("Report date: {}", cover.report_date));
        lines.push(format!("Reference: {}", cover.valuation_id));
        lines.push(String::new());
        lines.push(match &cover.image {
            CoverImage::Photo { url } => format!("[Cover image: {url}]"),
            CoverImage::Placeholder => "[Cover image: placeholder graphic]".to_string(),
        });
        Ok(self.paginate(lines))
    }

    fn render_contents(&self, entries: &[ContentsEntry]) -> Result<Rendered, RenderError> {
        let mut lines = self.heading("CONTENTS");
        let column = self.width.saturating_sub(8).max(20);
        for entry in entries {
            let title: String = entry.title.chars().take(column).collect();
            lines.push(format!("{title:.<column$}{:>8}", entry.start_page));
        }
        Ok(self.paginate(lines))
    }

    fn render_section(&self, title: &str, output: &SectionOutput) -> Result<Rendered, RenderError> {
        let mut lines = self.heading(title);
        self.value_lines(&output.data, &mut lines);
        for (label, notes) in [("Assumptions", &output.assumptions), ("Limitations", &output.limitations)] {
            if notes.is_empty() {
                continue;
            }
            lines.push(format!("{label}:"));
            for note in notes {
                self.wrap(&format!("- {note}"), "", &mut lines);
            }
            lines.push(String::new());
        }
        Ok(self.paginate(lines))
    }

    fn render_placeholder(&self, title: &str, reason: &str) -> Result<Rendered, RenderError> {
        let mut lines = self.heading(title);
        self.wrap(
            "This section could not be produced for this report and has been left as a placeholder.",
            "",
            &mut lines,
        );
        lines.push(String::new());
        self.wrap(&format!("Reason: {reason}"), "", &mut lines);
        Ok(self.paginate(lines))
    }
}
