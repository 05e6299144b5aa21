//! Per-property report assembly: declared order, true page offsets, and
//! degraded output for failed sections.

pub mod contents;
pub mod cover;
pub mod render;

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::sections::registry::{declared_position, display_title};
use crate::sections::{SectionOutput, SectionSpec};

pub use contents::ContentsEntry;
pub use cover::CoverPage;
pub use render::{PlainTextRenderer, RenderError, Renderer};

/// Separates pages in the merged text document.
pub const PAGE_BREAK: &str = "\n\u{000C}\n";

/// SHA-256 (hex) of the JSON encoding of `value`. Object keys serialize in
/// sorted order, so equal values hash equally.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

#[derive(Debug, Clone)]
pub enum SectionSlot {
    Ready(Arc<SectionOutput>),
    /// Irrecoverable failure with its reason.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledReport {
    pub valuation_id: String,
    pub cover: CoverPage,
    pub contents: Vec<ContentsEntry>,
    pub limitations: Vec<String>,
    pub page_count: usize,
    pub input_hash: String,
    pub document_hash: String,
    #[serde(skip)]
    pub document: String,
}

impl AssembledReport {
    pub fn section_order(&self) -> Vec<String> {
        self.contents
            .iter()
            .map(|entry| entry.section_id.to_string())
            .collect()
    }
}

fn push_unique(notes: &mut Vec<String>, note: &str) {
    if !notes.iter().any(|n| n == note) {
        notes.push(note.to_string());
    }
}

#[tracing::instrument(
    name = "assembler assemble",
    skip_all,
    fields(valuation.id = %cover.valuation_id, sections = sections.len())
)]
pub fn assemble(
    renderer: &dyn Renderer,
    cover: &CoverPage,
    sections: &[(&'static SectionSpec, SectionSlot)],
    input_hash: &str,
) -> Result<AssembledReport, RenderError> {
    let mut ordered: Vec<&(&'static SectionSpec, SectionSlot)> = sections.iter().collect();
    ordered.sort_by_key(|(spec, _)| declared_position(spec.id));

    let mut limitations = Vec::new();
    if let Some(note) = cover.limitation() {
        push_unique(&mut limitations, note);
    }

    let mut entries = Vec::with_capacity(ordered.len());
    let mut bodies = Vec::with_capacity(ordered.len());
    for (index, (spec, slot)) in ordered.into_iter().enumerate() {
        let number = index + 1;
        let title = display_title(spec, number);

        let rendered = match slot {
            SectionSlot::Ready(output) => match renderer.render_section(&title, output) {
                Ok(rendered) => {
                    for note in &output.limitations {
                        push_unique(&mut limitations, note);
                    }
                    Ok((rendered, Some(content_hash(output.as_ref()))))
                }
                Err(err) => Err(err.to_string()),
            },
            SectionSlot::Failed(reason) => Err(reason.clone()),
        };

        let (rendered, sha256) = match rendered {
            Ok(done) => done,
            Err(reason) => {
                tracing::warn!(section.id = %spec.id, %reason, "Inserting placeholder page");
                push_unique(
                    &mut limitations,
                    &format!("{} could not be produced and is shown as a placeholder", spec.title),
                );
                (renderer.render_placeholder(&title, &reason)?, None)
            }
        };

        entries.push(ContentsEntry {
            number,
            section_id: spec.id,
            title,
            start_page: 0,
            page_count: rendered.page_count(),
            placeholder: sha256.is_none(),
            sha256,
        });
        bodies.push(rendered);
    }

    let cover_rendered = renderer.render_cover(cover)?;
    let (contents, contents_rendered) =
        contents::paginate(renderer, cover_rendered.page_count(), entries)?;

    let pages: Vec<&str> = [&cover_rendered, &contents_rendered]
        .into_iter()
        .chain(bodies.iter())
        .flat_map(|rendered| rendered.pages.iter().map(String::as_str))
        .collect();
    let page_count = pages.len();
    let document = pages.join(PAGE_BREAK);

    Ok(AssembledReport {
        valuation_id: cover.valuation_id.clone(),
        cover: cover.clone(),
        contents,
        limitations,
        page_count,
        input_hash: input_hash.to_string(),
        document_hash: format!("{:x}", Sha256::digest(document.as_bytes())),
        document,
    })
}
