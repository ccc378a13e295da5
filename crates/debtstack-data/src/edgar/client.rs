//! SEC EDGAR API client with rate limiting and bounded retries.

use crate::edgar::filings::{CikLookup, ExhibitCode, Filing, FormType};
use crate::error::{DataError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// SEC EDGAR API base URL
const EDGAR_BASE_URL: &str = "https://data.sec.gov";

/// Archive base for documents and exhibit indices
const ARCHIVE_BASE_URL: &str = "https://www.sec.gov/Archives/edgar/data";

/// Default rate limit: 10 requests per second (SEC requirement)
const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Bounded retry count for transient failures
const MAX_RETRIES: u32 = 3;

/// Company filings metadata from the SEC submissions API
#[derive(Debug, Clone, Deserialize)]
struct Submissions {
    filings: FilingsContainer,
}

#[derive(Debug, Clone, Deserialize)]
struct FilingsContainer {
    recent: RecentFilings,
}

/// The SEC API returns filing information as parallel arrays where each
/// index corresponds to a single filing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    accession_number: Vec<String>,
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    form: Vec<String>,
    primary_document: Vec<String>,
}

/// Per-accession file index (`index.json` under the archive directory).
#[derive(Debug, Deserialize)]
struct AccessionIndex {
    directory: AccessionDirectory,
}

#[derive(Debug, Deserialize)]
struct AccessionDirectory {
    item: Vec<AccessionItem>,
}

#[derive(Debug, Deserialize)]
struct AccessionItem {
    name: String,
    #[serde(default, rename = "type")]
    item_type: String,
}

/// Rate limiter to ensure we stay under SEC's request ceiling.
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Instant::now() - min_interval,
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

/// SEC EDGAR API client with rate limiting.
pub struct EdgarClient {
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    base_url: String,
    archive_url: String,
}

impl EdgarClient {
    /// Create a new EDGAR client with default settings (10 req/sec).
    ///
    /// `user_agent` must identify the caller per SEC fair-access policy
    /// (company name and contact email).
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_rate_limit(user_agent, DEFAULT_RATE_LIMIT)
    }

    /// Create a new EDGAR client with a custom minimum request interval.
    pub fn with_rate_limit(user_agent: &str, min_interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DataError::Network)?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(min_interval))),
            base_url: EDGAR_BASE_URL.to_string(),
            archive_url: ARCHIVE_BASE_URL.to_string(),
        })
    }

    /// Look up a company's CIK number from its ticker symbol.
    ///
    /// # Returns
    /// The CIK as a zero-padded 10-digit string.
    ///
    /// # Errors
    /// Returns `DataError::CikNotFound` if the ticker is not found.
    pub async fn get_company_cik(&self, ticker: &str) -> Result<String> {
        if ticker.is_empty() {
            return Err(DataError::InvalidIdentifier("empty ticker".to_string()));
        }

        self.rate_limiter.lock().await.wait().await;
        let lookup = CikLookup::fetch(&self.client).await?;

        lookup
            .get(ticker)
            .map(|(cik, _)| CikLookup::pad_cik(cik))
            .ok_or_else(|| DataError::CikNotFound(ticker.to_string()))
    }

    /// Fetch the filing index for a company and filter it down to the
    /// requested form types and optional date range.
    ///
    /// Missing form types yield an empty list, not an error; the caller
    /// records `no_data` for dependent steps.
    pub async fn get_filings(
        &self,
        cik: &str,
        forms: &[FormType],
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<Filing>> {
        if cik.is_empty() {
            return Err(DataError::InvalidIdentifier("empty CIK".to_string()));
        }
        let cik_padded = CikLookup::pad_cik(cik);

        let url = format!("{}/submissions/CIK{}.json", self.base_url, cik_padded);
        let body = self.get_with_retry(&url).await?;
        let submissions: Submissions = serde_json::from_str(&body)
            .map_err(|e| DataError::EdgarApi(format!("Failed to parse submissions: {}", e)))?;

        let recent = &submissions.filings.recent;
        let mut filings = Vec::new();

        for i in 0..recent.form.len() {
            let Some(form) = FormType::parse(&recent.form[i]) else {
                continue;
            };
            if !forms.contains(&form) {
                continue;
            }

            let filing_date = NaiveDate::parse_from_str(&recent.filing_date[i], "%Y-%m-%d")
                .map_err(|e| DataError::Parse(format!("Invalid filing date: {}", e)))?;

            if let Some((start, end)) = date_range {
                if filing_date < start || filing_date > end {
                    continue;
                }
            }

            let period_of_report = recent
                .report_date
                .get(i)
                .filter(|d| !d.is_empty())
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

            let accession = &recent.accession_number[i];
            let primary_document_url = self.document_url(
                &cik_padded,
                accession,
                &recent.primary_document[i],
            );

            filings.push(Filing {
                accession_number: accession.clone(),
                form,
                filing_date,
                period_of_report,
                primary_document_url,
                exhibits: HashMap::new(),
            });
        }

        debug!(cik = %cik_padded, count = filings.len(), "resolved filing index");
        Ok(filings)
    }

    /// Resolve exhibit URLs for a filing from its accession `index.json`.
    ///
    /// Populates `filing.exhibits` with one URL list per exhibit class the
    /// pipeline consumes. Accessions without an index (rare, very old
    /// filings) leave the map empty.
    pub async fn resolve_exhibits(&self, cik: &str, filing: &mut Filing) -> Result<()> {
        let cik_padded = CikLookup::pad_cik(cik);
        let accession_no_dash = filing.accession_number.replace('-', "");
        let url = format!(
            "{}/{}/{}/index.json",
            self.archive_url,
            cik_padded.trim_start_matches('0'),
            accession_no_dash
        );

        let body = match self.get_with_retry(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(accession = %filing.accession_number, error = %e, "no accession index");
                return Ok(());
            }
        };

        let index: AccessionIndex = serde_json::from_str(&body)
            .map_err(|e| DataError::EdgarApi(format!("Failed to parse accession index: {}", e)))?;

        for item in index.directory.item {
            let Some(code) = ExhibitCode::classify(&item.item_type) else {
                continue;
            };
            // Skip graphics and XML renditions of the exhibit.
            let lower = item.name.to_lowercase();
            if !(lower.ends_with(".htm") || lower.ends_with(".html") || lower.ends_with(".txt")) {
                continue;
            }
            let url = format!(
                "{}/{}/{}/{}",
                self.archive_url,
                cik_padded.trim_start_matches('0'),
                accession_no_dash,
                item.name
            );
            filing.exhibits.entry(code).or_default().push(url);
        }

        Ok(())
    }

    /// Fetch a filing document or exhibit as raw text.
    pub async fn get_document(&self, url: &str) -> Result<String> {
        if url.is_empty() {
            return Err(DataError::InvalidIdentifier("empty document URL".to_string()));
        }
        self.get_with_retry(url).await
    }

    /// Build the archive URL for a primary document.
    fn document_url(&self, cik_padded: &str, accession: &str, document: &str) -> String {
        let accession_no_dash = accession.replace('-', "");
        format!(
            "{}/{}/{}/{}",
            self.archive_url,
            cik_padded.trim_start_matches('0'),
            accession_no_dash,
            document
        )
    }

    /// GET with the rate limiter, bounded retries and exponential backoff.
    async fn get_with_retry(&self, url: &str) -> Result<String> {
        let mut backoff = Duration::from_millis(500);
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!(url, attempt, "retrying EDGAR request");
                sleep(backoff).await;
                backoff *= 2;
            }

            self.rate_limiter.lock().await.wait().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().await.map_err(DataError::Network);
                    }
                    if status.as_u16() == 404 {
                        return Err(DataError::FilingNotFound(url.to_string()));
                    }
                    last_error = format!("HTTP {}", status);
                    // 429 and 5xx are retryable; other 4xx are not.
                    if !(status.as_u16() == 429 || status.is_server_error()) {
                        return Err(DataError::EdgarApi(format!(
                            "Request to {} failed: {}",
                            url, last_error
                        )));
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(DataError::RetriesExhausted {
            operation: format!("GET {}", url),
            last_error,
        })
    }
}

impl std::fmt::Debug for EdgarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgarClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
