//! RSS generation for a page's published posts.

use time::format_description::well_known::Rfc2822;

use crate::application::pagination::PageRequest;
use crate::application::public::{PublicError, PublicSiteService};
use crate::application::repos::PostQueryFilter;

const FEED_ITEMS: u32 = 50;

#[derive(Clone)]
pub struct SyndicationService {
    site: PublicSiteService,
    public_base_url: String,
}

impl SyndicationService {
    pub fn new(site: PublicSiteService, public_base_url: &str) -> Self {
        Self {
            site,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Generate RSS 2.0 feed XML.
    pub async fn rss_feed(&self, page_slug: &str) -> Result<String, PublicError> {
        let page = self.site.page(page_slug).await?;
        let posts = self
            .site
            .list_posts(
                page_slug,
                &PostQueryFilter::default(),
                PageRequest::new(FEED_ITEMS, None),
            )
            .await?;
        let base = page_url(&self.public_base_url, &page.slug);

        let mut items = String::new();
        for post in posts.items {
            let pub_date = post
                .published_at
                .format(&Rfc2822)
                .unwrap_or_else(|_| post.published_at.to_string());
            let link = format!("{base}/posts/{}", post.slug);
            items.push_str(&format!(
                "    <item>\n      <title>{}</title>\n      <link>{}</link>\n      <guid>{}</guid>\n      <pubDate>{}</pubDate>\n      <description>{}</description>\n    </item>\n",
                xml_escape(&post.title),
                xml_escape(&link),
                xml_escape(&link),
                pub_date,
                xml_escape(&post.excerpt),
            ));
        }

        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n  <channel>\n    <title>{}</title>\n    <link>{}</link>\n    <description>{}</description>\n    <language>{}</language>\n{}  </channel>\n</rss>\n",
            xml_escape(&page.title),
            xml_escape(&base),
            xml_escape(page.description.as_deref().unwrap_or_default()),
            xml_escape(&page.language),
            items
        ))
    }
}

/// Feed links point at the routes this service answers, whatever domain the page claims.
fn page_url(public_base_url: &str, page_slug: &str) -> String {
    format!("{public_base_url}/p/{page_slug}")
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
