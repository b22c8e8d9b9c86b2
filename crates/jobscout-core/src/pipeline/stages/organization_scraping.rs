use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::organization::{PostingLink, TrackedOrganization};
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::{HistoryStore, PageFetcher, find_new_links};

/// Link texts containing any of these are not job postings.
pub const NON_POSTING_KEYWORDS: &[&str] = &[
    "login", "sign", "cookie", "privacy", "terms", "about", "contact", "help", "support", "blog",
    "news", "events",
];

pub const DEFAULT_MIN_TITLE_LEN: usize = 5;

/// Drop links that are obviously not postings: too-short titles and
/// navigation/legal boilerplate.
pub fn filter_posting_links(links: Vec<PostingLink>, min_title_len: usize) -> Vec<PostingLink> {
    let before = links.len();
    let filtered: Vec<PostingLink> = links
        .into_iter()
        .filter(|link| {
            let title = link.text.to_lowercase();
            title.len() >= min_title_len
                && !NON_POSTING_KEYWORDS.iter().any(|kw| title.contains(kw))
        })
        .collect();
    tracing::debug!(before, after = filtered.len(), "Filtered non-posting links");
    filtered
}

/// Fetches every organization's careers page, isolates postings unseen
/// since the last visit, and records the full current link set so the
/// next run compares against this one.
///
/// Per-organization failures degrade to zero new links for that
/// organization; the batch itself never fails.
pub struct OrganizationScrapingStage<F: PageFetcher, H: HistoryStore> {
    fetcher: F,
    history: H,
    min_title_len: usize,
}

impl<F: PageFetcher, H: HistoryStore> OrganizationScrapingStage<F, H> {
    pub fn new(fetcher: F, history: H) -> Self {
        Self {
            fetcher,
            history,
            min_title_len: DEFAULT_MIN_TITLE_LEN,
        }
    }

    async fn scrape_organization(
        &self,
        org: &TrackedOrganization,
        user_id: Uuid,
    ) -> Result<Vec<PostingLink>, AppError> {
        tracing::info!(organization = %org.name, url = %org.careers_url, "Scraping careers page");
        let page = self.fetcher.fetch(&org.careers_url).await?;
        let current = filter_posting_links(page.links, self.min_title_len);

        let previous = self.history.get_last(org.id, user_id).await?;
        let new_links = find_new_links(previous.as_ref(), &current);
        tracing::info!(
            organization = %org.name,
            found = current.len(),
            new = new_links.len(),
            "Careers page scraped"
        );

        // Record the full current set, even when empty, so the next run
        // compares against this visit rather than a stale one.
        self.history.record(org.id, user_id, &current).await?;

        Ok(new_links)
    }
}

#[async_trait]
impl<F: PageFetcher, H: HistoryStore> PipelineStage for OrganizationScrapingStage<F, H> {
    fn name(&self) -> &'static str {
        "OrganizationScraping"
    }

    fn description(&self) -> &'static str {
        "Scrapes careers pages and isolates unseen postings"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        !ctx.scraped_links.is_empty()
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        if ctx.organizations.is_empty() {
            return Err(AppError::Validation(
                "At least one organization is required for scraping".into(),
            ));
        }
        for org in &ctx.organizations {
            if org.careers_url.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "Organization {} has no careers URL",
                    org.name
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let user_id = ctx.user_id;
        let futures = ctx.organizations.iter().map(|org| {
            let org = org.clone();
            async move {
                let result = self.scrape_organization(&org, user_id).await;
                (org, result)
            }
        });

        let results = futures::future::join_all(futures).await;

        let mut total_new = 0usize;
        for (org, result) in results {
            match result {
                Ok(new_links) => {
                    total_new += new_links.len();
                    if !new_links.is_empty() {
                        ctx.scraped_links.insert(org.id, new_links);
                    }
                }
                Err(error) => {
                    tracing::error!(
                        organization = %org.name,
                        error = %error,
                        "Scrape failed, treating as zero new links"
                    );
                }
            }
        }

        tracing::info!(
            organizations = ctx.organizations.len(),
            new_links = total_new,
            "Organization scraping completed"
        );
        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            organizations = ctx.organizations.len(),
            user_id = %ctx.user_id,
            "Organization scraping stage failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockHistoryStore, MockPageFetcher, make_test_context, make_test_org};
    use crate::traits::FetchedPage;

    fn posting(url: &str, text: &str) -> PostingLink {
        PostingLink::new(url, text)
    }

    #[test]
    fn filter_drops_short_and_boilerplate_titles() {
        let links = vec![
            posting("https://x.example/jobs/1", "Backend Engineer"),
            posting("https://x.example/login", "Login here"),
            posting("https://x.example/privacy", "Privacy Policy"),
            posting("https://x.example/a", "Go"),
        ];
        let kept = filter_posting_links(links, DEFAULT_MIN_TITLE_LEN);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Backend Engineer");
    }

    #[tokio::test]
    async fn first_scrape_reports_all_postings_as_new() {
        let org = make_test_org(90);
        let fetcher = MockPageFetcher::with_page(FetchedPage {
            content: "careers".into(),
            links: vec![posting("https://x.example/jobs/1", "Backend Engineer")],
        });
        let history = MockHistoryStore::new();
        let stage = OrganizationScrapingStage::new(fetcher, history.clone());

        let mut ctx = make_test_context();
        ctx.organizations = vec![org.clone()];
        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.scraped_links[&org.id].len(), 1);
        // The full set was recorded for the next comparison.
        let recorded = history.get_last(org.id, ctx.user_id).await.unwrap().unwrap();
        assert_eq!(recorded.links.len(), 1);
    }

    #[tokio::test]
    async fn second_scrape_with_identical_links_yields_nothing_new() {
        let org = make_test_org(90);
        let page = FetchedPage {
            content: "careers".into(),
            links: vec![posting("https://x.example/jobs/1", "Backend Engineer")],
        };
        let fetcher = MockPageFetcher::with_pages(vec![page.clone(), page]);
        let history = MockHistoryStore::new();
        let stage = OrganizationScrapingStage::new(fetcher, history.clone());

        let mut ctx = make_test_context();
        ctx.organizations = vec![org.clone()];
        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.scraped_links[&org.id].len(), 1);

        ctx.scraped_links.clear();
        stage.execute(&mut ctx).await.unwrap();
        assert!(ctx.scraped_links.get(&org.id).is_none());
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_zero_links_for_that_organization() {
        let good = make_test_org(90);
        let bad = make_test_org(50);
        let fetcher = MockPageFetcher::per_url(vec![
            (
                good.careers_url.clone(),
                Ok(FetchedPage {
                    content: String::new(),
                    links: vec![posting("https://x.example/jobs/1", "Backend Engineer")],
                }),
            ),
            (bad.careers_url.clone(), Err(AppError::Http("HTTP 503".into()))),
        ]);
        let stage = OrganizationScrapingStage::new(fetcher, MockHistoryStore::new());

        let mut ctx = make_test_context();
        ctx.organizations = vec![good.clone(), bad.clone()];
        stage.execute(&mut ctx).await.unwrap();

        assert!(ctx.scraped_links.contains_key(&good.id));
        assert!(!ctx.scraped_links.contains_key(&bad.id));
    }

    #[tokio::test]
    async fn empty_organizations_fails_validation() {
        let stage = OrganizationScrapingStage::new(
            MockPageFetcher::with_page(FetchedPage::default()),
            MockHistoryStore::new(),
        );
        let mut ctx = make_test_context();
        ctx.organizations.clear();
        assert!(matches!(stage.validate(&ctx), Err(AppError::Validation(_))));
    }
}
