//! Manganelo adapter. The work page lists every chapter (newest first) and each chapter page
//! embeds all of its images, so no pagination and no per-page fetch is needed.

use crate::model::{Chapter, ChapterDescriptor, PageDescriptor};
use crate::scraper::{clean_text, Document, ScraperError, SiteAdapter};

#[derive(Debug, Default, Clone, Copy)]
pub struct ManganeloAdapter;

impl SiteAdapter for ManganeloAdapter {
    fn resolve_title(&self, doc: &Document) -> Result<String, ScraperError> {
        let html = doc.html();
        let sel = doc.selector("div.story-info-right h1")?;
        html.select(&sel)
            .next()
            .map(|e| clean_text(e.text()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| doc.missing("title (div.story-info-right h1)"))
    }

    fn extract_chapters(
        &self,
        _root_url: &str,
        doc: &Document,
    ) -> Result<Vec<ChapterDescriptor>, ScraperError> {
        let html = doc.html();
        let list_sel = doc.selector("ul.row-content-chapter")?;
        let link_sel = doc.selector("li.a-h a")?;
        let list = html
            .select(&list_sel)
            .next()
            .ok_or_else(|| doc.missing("chapter list (ul.row-content-chapter)"))?;
        let links: Vec<_> = list.select(&link_sel).collect();
        let total = links.len() as u32;

        let mut chapters = Vec::with_capacity(links.len());
        for (i, link) in links.into_iter().enumerate() {
            let href = link
                .value()
                .attr("href")
                .ok_or_else(|| doc.missing("chapter link href"))?;
            let title = clean_text(link.text());
            chapters.push(ChapterDescriptor {
                // Listed newest first.
                index: total - i as u32,
                source_url: doc.resolve_url(href)?,
                title: Some(title).filter(|t| !t.is_empty()),
            });
        }
        chapters.sort_by_key(|c| c.index);
        Ok(chapters)
    }

    fn extract_pages(
        &self,
        chapter_url: &str,
        _chapter: &Chapter,
        doc: &Document,
    ) -> Result<Vec<PageDescriptor>, ScraperError> {
        let html = doc.html();
        let reader_sel = doc.selector("div.container-chapter-reader")?;
        let img_sel = doc.selector("img")?;
        let reader = html
            .select(&reader_sel)
            .next()
            .ok_or_else(|| doc.missing("reader (div.container-chapter-reader)"))?;

        let mut pages = Vec::new();
        for img in reader.select(&img_sel) {
            let Some(src) = img.value().attr("src") else {
                continue;
            };
            pages.push(PageDescriptor {
                index: pages.len() as u32 + 1,
                source_url: chapter_url.to_string(),
                asset_url: Some(doc.resolve_url(src)?),
            });
        }
        Ok(pages)
    }

    fn resolve_asset_url(&self, doc: &Document) -> Result<String, ScraperError> {
        Err(ScraperError::Parse {
            url: doc.url.clone(),
            message: "manganelo lists image URLs with the chapter; pages have no own document"
                .to_string(),
        })
    }
}
