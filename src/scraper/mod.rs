pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::{Branch, ProductCategory, RawGrade, Target};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tracing::{debug, info};

use self::http_client::{FetchError, HttpClient};
use self::parsers::{RatePage, parse_branch_page, parse_grade_page, parse_rate_page};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Per-target failure. Never fatal to a run; the orchestrator records it.
/// The message omits the target; pair it with [`SourceError::target`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unparseable document: {reason}")]
    Parse { target: String, reason: String },
}

impl SourceError {
    /// The region, branch or grade lookup this failure belongs to.
    pub fn target(&self) -> &str {
        match self {
            SourceError::Fetch(e) => e.target(),
            SourceError::Parse { target, .. } => target,
        }
    }

    fn parse(target: impl Into<String>, err: anyhow::Error) -> Self {
        SourceError::Parse { target: target.into(), reason: format!("{:#}", err) }
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// The three portal lookups the pipeline needs.
#[async_trait]
pub trait CooperativeSource: Send + Sync {
    /// Branches listed for one region/sub-region.
    async fn fetch_branches(&self, target: &Target) -> Result<Vec<Branch>, SourceError>;

    /// One branch's published rates for a product category.
    async fn fetch_rates(
        &self,
        branch: &Branch,
        category: ProductCategory,
    ) -> Result<RatePage, SourceError>;

    /// Most recent management evaluation for `period` (`YYYYMM`), if any.
    async fn fetch_grade(&self, branch: &Branch, period: &str)
    -> Result<Option<RawGrade>, SourceError>;
}

// ── KFCC portal scraper ───────────────────────────────────────────────────────

pub struct KfccScraper {
    client: HttpClient,
    config: ScraperConfig,
}

impl KfccScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl CooperativeSource for KfccScraper {
    async fn fetch_branches(&self, target: &Target) -> Result<Vec<Branch>, SourceError> {
        let label = target.to_string();
        let params = [("r1", target.region.as_str()), ("r2", target.query_sub_region())];

        let html = self.client.get(&self.config.branch_list_url, &params, &label).await?;
        let branches = parse_branch_page(&html, target, Local::now().naive_local())
            .map_err(|e| SourceError::parse(&label, e))?;

        info!("✓ {}: {} branches", label, branches.len());
        Ok(branches)
    }

    async fn fetch_rates(
        &self,
        branch: &Branch,
        category: ProductCategory,
    ) -> Result<RatePage, SourceError> {
        let label = format!("{} {} {}", branch.code, branch.name, category);
        let params = [("OPEN_TRMID", branch.code.as_str()), ("gubuncode", category.code())];

        let html = self.client.get(&self.config.rates_url, &params, &label).await?;
        let page = parse_rate_page(&html, category).map_err(|e| SourceError::parse(&label, e))?;

        debug!("{} ({}): {} quotes", label, category.label(), page.quotes.len());
        Ok(page)
    }

    async fn fetch_grade(
        &self,
        branch: &Branch,
        period: &str,
    ) -> Result<Option<RawGrade>, SourceError> {
        let label = format!("{} {} grade {}", branch.code, branch.name, period);
        let fields = [
            ("procGbcd", "1"),
            ("pageNo", ""),
            ("gongsiGmgoid", ""),
            ("gmgocd", branch.code.as_str()),
            ("hpageBrwsUm", "1"),
            ("gongsiDate", ""),
            ("strd_yymm", period),
            ("gmgoNm", ""),
            ("gonsiYear", ""),
            ("gonsiMonth", ""),
        ];
        let referer = Some(self.config.grade_referer.as_str()).filter(|r| !r.is_empty());

        let html = self
            .client
            .post_form(&self.config.grade_url, &fields, referer, &label)
            .await?;
        Ok(parse_grade_page(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scraper(server: &MockServer) -> KfccScraper {
        KfccScraper::new(&ScraperConfig {
            branch_list_url: format!("{}/map/list.do", server.uri()),
            rates_url: format!("{}/map/goods.do", server.uri()),
            grade_url: format!("{}/gumgo/grade.do", server.uri()),
            max_retries: 0,
            retry_delay_ms: 1,
            ..ScraperConfig::default()
        })
        .unwrap()
    }

    fn branch() -> Branch {
        Branch {
            code: "01234".into(),
            name: "종로".into(),
            region: "서울".into(),
            sub_region: "종로구".into(),
            address: String::new(),
            phone: String::new(),
            category: "지역".into(),
            discovered_at: NaiveDate::from_ymd_opt(2026, 10, 18)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_collapsed_target_sends_empty_sub_region() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/map/list.do"))
            .and(query_param("r1", "세종"))
            .and(query_param("r2", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string("<table><tr><td>-</td></tr></table>"))
            .expect(1)
            .mount(&server)
            .await;

        let target = Target { region: "세종".into(), sub_region: "세종".into(), collapsed: true };
        let branches = scraper(&server).fetch_branches(&target).await.unwrap();
        assert!(branches.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_directory_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>maintenance</p>"))
            .mount(&server)
            .await;

        let target = Target { region: "서울".into(), sub_region: "중구".into(), collapsed: false };
        let err = scraper(&server).fetch_branches(&target).await.unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref target, .. } if target == "서울 중구"));
    }

    #[tokio::test]
    async fn test_rate_request_uses_branch_and_category_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/map/goods.do"))
            .and(query_param("OPEN_TRMID", "01234"))
            .and(query_param("gubuncode", "14"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<table><tbody><tr><td>MG더뱅킹자유적금</td><td>12개월</td><td>3.5%</td></tr></tbody></table>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let page = scraper(&server)
            .fetch_rates(&branch(), ProductCategory::InstallmentDeposit)
            .await
            .unwrap();
        assert_eq!(page.quotes.len(), 1);
        assert_eq!(page.quotes[0].rate_percent, 3.5);
    }

    #[tokio::test]
    async fn test_grade_request_posts_period() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gumgo/grade.do"))
            .and(body_string_contains("strd_yymm=202412"))
            .and(body_string_contains("gmgocd=01234"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<input id="contentsdata" value="31000001평가기관|20241231|1">"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let grade = scraper(&server).fetch_grade(&branch(), "202412").await.unwrap().unwrap();
        assert_eq!(grade.grade_digit, "1");
        assert_eq!(grade.evaluation_date, "20241231");
    }
}
