use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{blocking, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    client::http_client,
    query::{format_output_properties, ProfileQuery},
    Error, Properties, Result,
};

const EXPORT_API_BASE_URL: &str = "https://mixpanel.com/api/2.0";
const ENGAGE_ENDPOINT: &str = "engage";
// Export pages can be large, so allow requests much more time than the
// ingestion client does.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A client for the Mixpanel export API.
///
/// The export API lives on a different host than the ingestion API and is
/// authenticated with the project's API secret instead of its token.
///
/// # Examples
/// ```no_run
/// # use mixpanel::{ExportClient, ProfileQuery};
/// let client = ExportClient::new("api-secret");
/// let profiles = client.list_profiles(&ProfileQuery::default())?;
/// # Ok::<(), mixpanel::Error>(())
/// ```
pub struct ExportClient {
    secret: String,
    base_url: String,
    http: blocking::Client,
}

/// A user profile returned by the export API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The profile's distinct ID.
    #[serde(rename = "$distinct_id")]
    pub id: String,
    /// The profile's properties, restricted to
    /// [`ProfileQuery::output_properties`] when that is set.
    #[serde(rename = "$properties", default)]
    pub properties: Properties,
}

/// One page of the paginated profile listing.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    computed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    results: Vec<Profile>,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    page: usize,
}

impl ExportClient {
    /// Create a new `ExportClient` using the given project API secret.
    ///
    /// ```
    /// # use mixpanel::ExportClient;
    /// ExportClient::new("api-secret");
    /// ```
    pub fn new(secret: impl Into<String>) -> ExportClient {
        ExportClient::new_with_client(secret, http_client(DEFAULT_TIMEOUT))
    }

    /// Create a new `ExportClient` that sends requests through the supplied
    /// `reqwest` client instead of the default one.
    pub fn new_with_client(secret: impl Into<String>, http: blocking::Client) -> ExportClient {
        ExportClient {
            secret: secret.into(),
            base_url: EXPORT_API_BASE_URL.to_owned(),
            http,
        }
    }

    /// Override the API base URL. Intended for tests and proxies.
    pub fn base_url(mut self, base_url: impl Into<String>) -> ExportClient {
        self.base_url = base_url.into();
        self
    }

    /// List all profiles matching `query`, walking the paginated listing
    /// until the server-reported total is reached.
    ///
    /// Pages are fetched one at a time on the calling thread. Any failure
    /// aborts the whole call: an error never comes with partial results.
    pub fn list_profiles(&self, query: &ProfileQuery) -> Result<Vec<Profile>> {
        log::debug!(target: "mixpanel", query:serde; "listing profiles");

        let mut base_params = Vec::new();
        if let Some(where_expression) = query.where_expression() {
            base_params.push(("where", where_expression));
        }
        if let Some(names) = &query.output_properties {
            base_params.push(("output_properties", format_output_properties(names)));
        }

        let mut profiles = Vec::new();
        let mut session_id = String::new();
        let mut page = 0;
        let mut total = 0;

        loop {
            let mut params = base_params.clone();
            // The first request carries no pagination state; every later
            // request threads through the session the server handed back.
            if !session_id.is_empty() && page > 0 {
                params.push(("session_id", session_id.clone()));
                params.push(("page", page.to_string()));
            }

            let response: PageResponse = self.get(ENGAGE_ENDPOINT, &params)?;

            log::debug!(target: "mixpanel",
                status = response.status.as_str(),
                page = response.page,
                total = response.total,
                results = response.results.len(),
                computed_at:? = response.computed_at;
                "received profile page");

            if !response.error.is_empty() {
                log::warn!(target: "mixpanel", error = response.error.as_str(); "profile listing failed");
                return Err(Error::Server(response.error));
            }

            profiles.extend(response.results);

            // The total is only trustworthy once seen non-zero; the server
            // is trusted not to change it afterwards.
            if response.total > 0 {
                total = response.total;
            }
            if profiles.len() >= total {
                break;
            }

            session_id = response.session_id;
            page = response.page + 1;
        }

        Ok(profiles)
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, endpoint))
            .map_err(Error::InvalidBaseUrl)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        let response = self
            .http
            .get(url)
            .basic_auth(&self.secret, Some(""))
            .send()?;
        Ok(response.json()?)
    }
}
