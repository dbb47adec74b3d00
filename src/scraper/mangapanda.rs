//! MangaPanda adapter. Chapter pages carry their image URLs as a comma-separated list in a hidden
//! `#arraydata` element.

use crate::model::{Chapter, ChapterDescriptor, PageDescriptor};
use crate::scraper::{clean_text, Document, ScraperError, SiteAdapter};

#[derive(Debug, Default, Clone, Copy)]
pub struct MangaPandaAdapter;

impl SiteAdapter for MangaPandaAdapter {
    fn resolve_title(&self, doc: &Document) -> Result<String, ScraperError> {
        let html = doc.html();
        let sel = doc.selector("ul.manga-info-text h1")?;
        html.select(&sel)
            .next()
            .map(|e| clean_text(e.text()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| doc.missing("title (ul.manga-info-text h1)"))
    }

    fn extract_chapters(
        &self,
        _root_url: &str,
        doc: &Document,
    ) -> Result<Vec<ChapterDescriptor>, ScraperError> {
        let html = doc.html();
        let list_sel = doc.selector("div.chapter-list")?;
        let row_sel = doc.selector("div.row")?;
        let a_sel = doc.selector("a")?;
        let list = html
            .select(&list_sel)
            .next()
            .ok_or_else(|| doc.missing("chapter list (div.chapter-list)"))?;

        let links: Vec<_> = list
            .select(&row_sel)
            .filter_map(|row| row.select(&a_sel).next())
            .collect();
        let total = links.len() as u32;

        let mut chapters = Vec::with_capacity(links.len());
        for (i, link) in links.into_iter().enumerate() {
            let href = link
                .value()
                .attr("href")
                .ok_or_else(|| doc.missing("chapter link href"))?;
            let title = clean_text(link.text());
            chapters.push(ChapterDescriptor {
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
        let sel = doc.selector("#arraydata")?;
        let data = html
            .select(&sel)
            .next()
            .map(|e| e.text().collect::<String>())
            .ok_or_else(|| doc.missing("image list (#arraydata)"))?;

        let mut pages = Vec::new();
        for raw in data.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            pages.push(PageDescriptor {
                index: pages.len() as u32 + 1,
                source_url: chapter_url.to_string(),
                asset_url: Some(doc.resolve_url(raw)?),
            });
        }
        Ok(pages)
    }

    fn resolve_asset_url(&self, doc: &Document) -> Result<String, ScraperError> {
        Err(ScraperError::Parse {
            url: doc.url.clone(),
            message: "mangapanda lists image URLs with the chapter; pages have no own document"
                .to_string(),
        })
    }
}
