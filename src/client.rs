use std::time::Duration;

use base64::{prelude::BASE64_STANDARD, Engine as _};
use reqwest::{blocking, Method, Url};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{Error, Properties, Result};

const API_BASE_URL: &str = "https://api.mixpanel.com";
const TRACK_ENDPOINT: &str = "track";
const ENGAGE_ENDPOINT: &str = "engage";
const LIBRARY: &str = "mixpanel-rs";
const MAX_BATCH_SIZE: usize = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A client for the Mixpanel ingestion API.
///
/// Events and profile updates are encoded and submitted synchronously; each
/// call performs one HTTP request and returns once Mixpanel has acknowledged
/// the data.
///
/// # Examples
/// ```
/// # use mixpanel::Client;
/// Client::new("project-token");
/// ```
pub struct Client {
    token: String,
    base_url: String,
    http: blocking::Client,
}

/// Whether a request is attributed to an end user or to a backend script.
///
/// Script requests carry `ip=0` so Mixpanel does not take geolocation from
/// the submitting machine's address.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ActionSource {
    User,
    Script,
}

impl Client {
    /// Create a new `Client` for the project identified by `token`.
    ///
    /// ```
    /// # use mixpanel::Client;
    /// let client = Client::new("project-token");
    /// ```
    pub fn new(token: impl Into<String>) -> Client {
        Client::new_with_client(token, http_client(DEFAULT_TIMEOUT))
    }

    /// Create a new `Client` that sends requests through the supplied
    /// `reqwest` client instead of the default one.
    pub fn new_with_client(token: impl Into<String>, http: blocking::Client) -> Client {
        Client {
            token: token.into(),
            base_url: API_BASE_URL.to_owned(),
            http,
        }
    }

    /// Override the API base URL. Intended for tests and proxies.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Client {
        self.base_url = base_url.into();
        self
    }

    /// Track an event.
    ///
    /// `properties` decorate the event; the project token, the library name,
    /// and `distinct_id` (when given) are merged in before submission.
    pub fn track(
        &self,
        distinct_id: Option<&str>,
        event: &str,
        properties: Properties,
    ) -> Result<()> {
        log::debug!(target: "mixpanel", event, distinct_id:?; "tracking event");
        let payload = self.event_payload(distinct_id, event, properties);
        self.send_data(Method::GET, TRACK_ENDPOINT, ActionSource::User, &payload)
    }

    /// Like [`Client::track`], but marks the request as coming from a backend
    /// script so Mixpanel does not geolocate the event from the submitting
    /// machine's IP address. Script events always carry a distinct ID.
    pub fn track_as_script(
        &self,
        distinct_id: &str,
        event: &str,
        properties: Properties,
    ) -> Result<()> {
        log::debug!(target: "mixpanel", event, distinct_id; "tracking event as script");
        let payload = self.event_payload(Some(distinct_id), event, properties);
        self.send_data(Method::GET, TRACK_ENDPOINT, ActionSource::Script, &payload)
    }

    /// Track up to 50 events in a single request.
    ///
    /// Larger batches are rejected with [`Error::BatchTooLarge`] before
    /// anything is sent.
    pub fn track_batch(&self, events: Vec<BatchEvent>) -> Result<()> {
        if events.len() > MAX_BATCH_SIZE {
            return Err(Error::BatchTooLarge);
        }

        log::debug!(target: "mixpanel", events = events.len(); "tracking event batch");

        let payload: Vec<Value> = events
            .into_iter()
            .map(|event| {
                self.event_payload(event.distinct_id.as_deref(), &event.event, event.properties)
            })
            .collect();

        self.send_data(Method::POST, TRACK_ENDPOINT, ActionSource::User, &payload)
    }

    /// Build a URL for the tracking-pixel flavor of the track endpoint.
    ///
    /// Embedding the URL in an `img` tag records the event whenever the
    /// pixel is fetched. This call does not perform a request itself.
    pub fn tracking_pixel(
        &self,
        distinct_id: Option<&str>,
        event: &str,
        properties: Properties,
    ) -> Result<String> {
        let payload = self.event_payload(distinct_id, event, properties);
        let encoded = encode_payload(&payload)?;
        let url = Url::parse_with_params(
            &format!("{}/{}", self.base_url, TRACK_ENDPOINT),
            [("data", encoded.as_str()), ("img", "1")],
        )
        .map_err(Error::InvalidBaseUrl)?;
        Ok(url.into())
    }

    /// Build a URL for the redirect flavor of the track endpoint. Following
    /// the URL records the event and then redirects the browser to `uri`.
    pub fn redirect_url(
        &self,
        distinct_id: Option<&str>,
        event: &str,
        properties: Properties,
        uri: &str,
    ) -> Result<String> {
        let payload = self.event_payload(distinct_id, event, properties);
        let encoded = encode_payload(&payload)?;
        let url = Url::parse_with_params(
            &format!("{}/{}", self.base_url, TRACK_ENDPOINT),
            [("data", encoded.as_str()), ("redirect", uri)],
        )
        .map_err(Error::InvalidBaseUrl)?;
        Ok(url.into())
    }

    /// Apply a profile update operation to the profile with the given
    /// distinct ID, creating the profile if it does not exist.
    ///
    /// `properties` supplies additional top-level engage parameters (such as
    /// `$ip` or `$time`) and may be empty.
    pub fn engage(
        &self,
        distinct_id: Option<&str>,
        properties: Properties,
        operation: &Operation,
    ) -> Result<()> {
        self.engage_inner(distinct_id, properties, operation, ActionSource::User)
    }

    /// Like [`Client::engage`], but does not update the profile's
    /// geolocation from the submitting machine's IP address.
    pub fn engage_as_script(
        &self,
        distinct_id: Option<&str>,
        properties: Properties,
        operation: &Operation,
    ) -> Result<()> {
        self.engage_inner(distinct_id, properties, operation, ActionSource::Script)
    }

    /// Delete the profile with the given distinct ID.
    ///
    /// The deletion is submitted with `$ignore_alias`, so the ID is matched
    /// literally.
    pub fn delete_profile(&self, distinct_id: &str) -> Result<()> {
        log::debug!(target: "mixpanel", distinct_id; "deleting profile");

        let mut payload = Properties::new();
        payload.insert("$distinct_id".to_owned(), distinct_id.into());
        payload.insert("$token".to_owned(), self.token.clone().into());
        payload.insert("$ignore_alias".to_owned(), "true".into());
        payload.insert("$delete".to_owned(), "".into());

        self.send_data(
            Method::POST,
            ENGAGE_ENDPOINT,
            ActionSource::Script,
            &payload,
        )
    }

    fn engage_inner(
        &self,
        distinct_id: Option<&str>,
        mut properties: Properties,
        operation: &Operation,
        source: ActionSource,
    ) -> Result<()> {
        log::debug!(target: "mixpanel", distinct_id:?, operation = operation.name.as_str(); "updating profile");

        if let Some(distinct_id) = distinct_id {
            properties.insert("$distinct_id".to_owned(), distinct_id.into());
        }
        properties.insert("$token".to_owned(), self.token.clone().into());
        properties.insert("mp_lib".to_owned(), LIBRARY.into());

        // $unset takes a list of property names rather than an object.
        let values = if operation.name == "$unset" {
            Value::Array(
                operation
                    .values
                    .keys()
                    .map(|key| Value::String(key.clone()))
                    .collect(),
            )
        } else {
            Value::Object(operation.values.clone())
        };
        properties.insert(operation.name.clone(), values);

        self.send_data(Method::GET, ENGAGE_ENDPOINT, source, &properties)
    }

    fn event_payload(
        &self,
        distinct_id: Option<&str>,
        event: &str,
        mut properties: Properties,
    ) -> Value {
        properties.insert("token".to_owned(), self.token.clone().into());
        properties.insert("mp_lib".to_owned(), LIBRARY.into());
        if let Some(distinct_id) = distinct_id {
            properties.insert("distinct_id".to_owned(), distinct_id.into());
        }
        json!({ "event": event, "properties": properties })
    }

    fn send_data<T: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        source: ActionSource,
        data: &T,
    ) -> Result<()> {
        let mut params = vec![("data", encode_payload(data)?)];
        if source == ActionSource::Script {
            params.push(("ip", "0".to_owned()));
        }
        self.send_form(method, endpoint, &params)
    }

    fn send_form(&self, method: Method, endpoint: &str, params: &[(&str, String)]) -> Result<()> {
        let response = if method == Method::POST {
            self.http
                .post(format!("{}/{}", self.base_url, endpoint))
                .form(&params)
                .send()?
        } else {
            let url =
                Url::parse_with_params(&format!("{}/{}", self.base_url, endpoint), params)
                    .map_err(Error::InvalidBaseUrl)?;
            self.http.get(url).send()?
        };

        // The ingestion API acknowledges accepted data with a literal "1"
        // body and reports failure in the body, not the status code.
        let body = response.text()?;
        if body.trim_matches('\n') != "1" {
            return Err(Error::Rejected(body));
        }

        Ok(())
    }
}

/// An event for [`Client::track_batch`].
#[derive(Debug, Clone)]
pub struct BatchEvent {
    /// ID of the user the event belongs to, if any.
    pub distinct_id: Option<String>,
    /// Event name.
    pub event: String,
    /// Properties decorating the event.
    pub properties: Properties,
}

/// A profile update operation for [`Client::engage`].
///
/// `name` is one of the update operators understood by the engage endpoint
/// (`$set`, `$set_once`, `$add`, `$append`, `$union`, `$unset`). For
/// `$unset` only the keys of `values` are submitted, as the operator takes a
/// list of property names.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Update operator name.
    pub name: String,
    /// Properties the operator applies to.
    pub values: Properties,
}

pub(crate) fn http_client(timeout: Duration) -> blocking::Client {
    blocking::Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to initialize HTTP client")
}

fn encode_payload<T: Serialize>(data: &T) -> Result<String> {
    Ok(BASE64_STANDARD.encode(serde_json::to_vec(data)?))
}

#[cfg(test)]
mod tests {
    use base64::{prelude::BASE64_STANDARD, Engine as _};
    use serde_json::{json, Value};
    use tokio::runtime::Runtime;
    use url::Url;
    use wiremock::{
        matchers::{method, path, query_param, query_param_is_missing},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{BatchEvent, Client, Error, Operation, Properties};

    fn start_server() -> (Runtime, MockServer) {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        (rt, server)
    }

    fn ack() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string("1")
    }

    fn decode_data(encoded: &str) -> Value {
        serde_json::from_slice(&BASE64_STANDARD.decode(encoded).unwrap()).unwrap()
    }

    fn plan_properties() -> Properties {
        let mut properties = Properties::new();
        properties.insert("plan".to_owned(), "pro".into());
        properties
    }

    #[test]
    fn tracking_pixel_embeds_event_payload() {
        let url = Client::new("token-1")
            .tracking_pixel(Some("user-1"), "signup", plan_properties())
            .unwrap();

        let url = Url::parse(&url).unwrap();
        assert_eq!(url.as_str().split('?').next().unwrap(), "https://api.mixpanel.com/track");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[1], ("img".to_owned(), "1".to_owned()));
        assert_eq!(
            decode_data(&pairs[0].1),
            json!({
                "event": "signup",
                "properties": {
                    "distinct_id": "user-1",
                    "mp_lib": "mixpanel-rs",
                    "plan": "pro",
                    "token": "token-1",
                },
            })
        );
    }

    #[test]
    fn redirect_url_carries_target() {
        let url = Client::new("token-1")
            .redirect_url(None, "open", Properties::new(), "https://example.com/thanks")
            .unwrap();

        let url = Url::parse(&url).unwrap();
        let redirect = url
            .query_pairs()
            .find(|(k, _)| k == "redirect")
            .map(|(_, v)| v.into_owned());
        assert_eq!(redirect.as_deref(), Some("https://example.com/thanks"));

        let data = url
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(
            decode_data(&data),
            json!({
                "event": "open",
                "properties": { "mp_lib": "mixpanel-rs", "token": "token-1" },
            })
        );
    }

    #[test]
    fn track_sends_event_as_query_data() {
        let (rt, server) = start_server();

        // Properties serialize with sorted keys, so the encoded form is
        // deterministic.
        let expected = BASE64_STANDARD.encode(
            serde_json::to_vec(&json!({
                "event": "signup",
                "properties": {
                    "distinct_id": "user-1",
                    "mp_lib": "mixpanel-rs",
                    "plan": "pro",
                    "token": "token-1",
                },
            }))
            .unwrap(),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/track"))
                .and(query_param("data", expected.as_str()))
                .and(query_param_is_missing("ip"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        client
            .track(Some("user-1"), "signup", plan_properties())
            .unwrap();
    }

    #[test]
    fn track_as_script_suppresses_ip() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/track"))
                .and(query_param("ip", "0"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        client
            .track_as_script("user-1", "signup", Properties::new())
            .unwrap();
    }

    #[test]
    fn acknowledgement_may_end_with_newline() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/track"))
                .respond_with(ResponseTemplate::new(200).set_body_string("1\n"))
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        client.track(None, "signup", Properties::new()).unwrap();
    }

    #[test]
    fn unacknowledged_data_is_an_error() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/track"))
                .respond_with(ResponseTemplate::new(200).set_body_string("0"))
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        let err = client.track(None, "signup", Properties::new()).unwrap_err();
        assert!(matches!(err, Error::Rejected(body) if body == "0"));
    }

    #[test]
    fn track_batch_posts_all_events() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/track"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        client
            .track_batch(vec![
                BatchEvent {
                    distinct_id: Some("user-1".to_owned()),
                    event: "signup".to_owned(),
                    properties: plan_properties(),
                },
                BatchEvent {
                    distinct_id: None,
                    event: "ping".to_owned(),
                    properties: Properties::new(),
                },
            ])
            .unwrap();

        let requests = rt.block_on(server.received_requests()).unwrap();
        let data = url::form_urlencoded::parse(&requests[0].body)
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(
            decode_data(&data),
            json!([
                {
                    "event": "signup",
                    "properties": {
                        "distinct_id": "user-1",
                        "mp_lib": "mixpanel-rs",
                        "plan": "pro",
                        "token": "token-1",
                    },
                },
                {
                    "event": "ping",
                    "properties": { "mp_lib": "mixpanel-rs", "token": "token-1" },
                },
            ])
        );
    }

    #[test]
    fn oversized_batch_is_rejected_without_a_request() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("POST"))
                .respond_with(ack())
                .expect(0)
                .mount(&server),
        );

        let events = (0..51)
            .map(|i| BatchEvent {
                distinct_id: None,
                event: format!("event-{i}"),
                properties: Properties::new(),
            })
            .collect();

        let client = Client::new("token-1").base_url(server.uri());
        assert!(matches!(
            client.track_batch(events).unwrap_err(),
            Error::BatchTooLarge
        ));
    }

    #[test]
    fn engage_set_wraps_values() {
        let (rt, server) = start_server();

        let expected = BASE64_STANDARD.encode(
            serde_json::to_vec(&json!({
                "$distinct_id": "user-1",
                "$ip": "203.0.113.7",
                "$set": { "plan": "pro" },
                "$token": "token-1",
                "mp_lib": "mixpanel-rs",
            }))
            .unwrap(),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/engage"))
                .and(query_param("data", expected.as_str()))
                .and(query_param_is_missing("ip"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        let mut base = Properties::new();
        base.insert("$ip".to_owned(), "203.0.113.7".into());
        let operation = Operation {
            name: "$set".to_owned(),
            values: plan_properties(),
        };
        client.engage(Some("user-1"), base, &operation).unwrap();
    }

    #[test]
    fn engage_unset_sends_property_names() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/engage"))
                .and(query_param("ip", "0"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        let mut values = Properties::new();
        values.insert("plan".to_owned(), Value::Null);
        let operation = Operation {
            name: "$unset".to_owned(),
            values,
        };
        client
            .engage_as_script(Some("user-1"), Properties::new(), &operation)
            .unwrap();

        let requests = rt.block_on(server.received_requests()).unwrap();
        let data = requests[0]
            .url
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(
            decode_data(&data),
            json!({
                "$distinct_id": "user-1",
                "$token": "token-1",
                "$unset": ["plan"],
                "mp_lib": "mixpanel-rs",
            })
        );
    }

    #[test]
    fn delete_profile_posts_tombstone() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/engage"))
                .respond_with(ack())
                .expect(1)
                .mount(&server),
        );

        let client = Client::new("token-1").base_url(server.uri());
        client.delete_profile("user-1").unwrap();

        let requests = rt.block_on(server.received_requests()).unwrap();
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(&requests[0].body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("ip".to_owned(), "0".to_owned())));

        let data = pairs.iter().find(|(k, _)| k == "data").unwrap();
        assert_eq!(
            decode_data(&data.1),
            json!({
                "$delete": "",
                "$distinct_id": "user-1",
                "$ignore_alias": "true",
                "$token": "token-1",
            })
        );
    }
}
