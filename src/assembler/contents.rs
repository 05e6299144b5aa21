use serde::Serialize;

use super::render::{RenderError, Rendered, Renderer};
use crate::sections::SectionId;

const MAX_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentsEntry {
    pub number: usize,
    pub section_id: SectionId,
    pub title: String,
    /// 1-based page in the final document.
    pub start_page: usize,
    pub page_count: usize,
    pub placeholder: bool,
    /// SHA-256 of the section output; absent for placeholders.
    pub sha256: Option<String>,
}

/// Assigns start pages after the cover and the contents itself. The contents
/// length can depend on the numbers it prints, so it is re-rendered until its
/// own page count stops changing.
pub fn paginate(
    renderer: &dyn Renderer,
    cover_pages: usize,
    mut entries: Vec<ContentsEntry>,
) -> Result<(Vec<ContentsEntry>, Rendered), RenderError> {
    let mut contents_pages = 1;
    for _ in 0..MAX_PASSES {
        let mut next = cover_pages + contents_pages + 1;
        for entry in &mut entries {
            entry.start_page = next;
            next += entry.page_count;
        }

        let rendered = renderer.render_contents(&entries)?;
        if rendered.page_count() == contents_pages {
            return Ok((entries, rendered));
        }
        contents_pages = rendered.page_count();
    }
    Err(RenderError::Unsettled(MAX_PASSES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::cover::CoverPage;
    use crate::assembler::render::PlainTextRenderer;
    use crate::sections::SectionOutput;

    fn entry(id: SectionId, page_count: usize) -> ContentsEntry {
        ContentsEntry {
            number: 1,
            section_id: id,
            title: id.spec().title.to_string(),
            start_page: 0,
            page_count,
            placeholder: false,
            sha256: None,
        }
    }

    /// Contents grows to two pages once any section starts at page 10.
    struct DigitSensitive;

    impl Renderer for DigitSensitive {
        fn render_cover(&self, _cover: &CoverPage) -> Result<Rendered, RenderError> {
            unreachable!()
        }

        fn render_contents(&self, entries: &[ContentsEntry]) -> Result<Rendered, RenderError> {
            let wide = entries.iter().any(|e| e.start_page >= 10);
            let pages = if wide { 2 } else { 1 };
            Ok(Rendered {
                pages: vec![String::new(); pages],
            })
        }

        fn render_section(&self, _title: &str, _output: &SectionOutput) -> Result<Rendered, RenderError> {
            unreachable!()
        }

        fn render_placeholder(&self, _title: &str, _reason: &str) -> Result<Rendered, RenderError> {
            unreachable!()
        }
    }

    #[test]
    fn test_offsets_follow_cover_and_contents() {
        let renderer = PlainTextRenderer::default();
        let (entries, rendered) = paginate(
            &renderer,
            1,
            vec![entry(SectionId::Instructions, 1), entry(SectionId::PropertyOverview, 2)],
        )
        .unwrap();

        assert_eq!(rendered.page_count(), 1);
        assert_eq!(entries[0].start_page, 3);
        assert_eq!(entries[1].start_page, 4);
    }

    #[test]
    fn test_multi_page_contents_shifts_offsets() {
        let renderer = PlainTextRenderer {
            lines_per_page: 5,
            width: 60,
        };
        let entries = vec![
            entry(SectionId::Instructions, 1),
            entry(SectionId::PropertyOverview, 1),
            entry(SectionId::NeighbourhoodOverview, 2),
            entry(SectionId::MarketCommentary, 1),
        ];
        // three heading lines plus four entries: two pages of five lines
        let (entries, rendered) = paginate(&renderer, 1, entries).unwrap();
        assert_eq!(rendered.page_count(), 2);
        assert_eq!(entries[0].start_page, 4);
        assert_eq!(entries[3].start_page, 8);
    }

    #[test]
    fn test_repaginates_until_stable() {
        let entries = vec![entry(SectionId::Instructions, 7), entry(SectionId::PropertyOverview, 1)];
        let (entries, rendered) = paginate(&DigitSensitive, 1, entries).unwrap();
        assert_eq!(rendered.page_count(), 2);
        assert_eq!(entries[0].start_page, 4);
        assert_eq!(entries[1].start_page, 11);
    }
}
