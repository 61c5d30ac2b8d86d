//! [`Transport`] implementation on top of `reqwest` and Server-Sent Events.
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use eventsource_stream::Eventsource;
use futures::{future, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method, RequestBuilder, StatusCode, Url,
};

use crate::{
    events::EventRecord,
    transport::{MessageStream, StreamMessage, Transport},
    ClientConfig, Error, FlagMap, RedactedIdentity, Result,
};

const USER_AGENT_HEADER: &str = "x-flagwire-user-agent";
const USER_AGENT: &str = concat!("flagwire/", env!("CARGO_PKG_VERSION"));

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Client-side environment id, part of every URL.
    pub environment_id: String,
    /// Base URL for flag requests.
    pub base_url: String,
    /// Base URL for the live update stream.
    pub stream_url: String,
    /// Base URL for analytics events.
    pub events_url: String,
    /// Send the identity as a `REPORT` request body instead of encoding it into the URL.
    pub use_report: bool,
    /// Send the `x-flagwire-user-agent` header.
    pub send_sdk_headers: bool,
    /// Ask the service to include evaluation reasons.
    pub evaluation_reasons: bool,
}

impl From<&ClientConfig> for HttpTransportConfig {
    fn from(config: &ClientConfig) -> HttpTransportConfig {
        HttpTransportConfig {
            environment_id: config.environment_id.clone(),
            base_url: config.base_url.clone(),
            stream_url: config.stream_url.clone(),
            events_url: config.events_url.clone(),
            use_report: config.use_report,
            send_sdk_headers: config.send_sdk_headers,
            evaluation_reasons: config.evaluation_reasons,
        }
    }
}

/// A transport that talks to the flag service over HTTP.
///
/// Flags are fetched from `{base_url}/sdk/evalx/{environment}/users/{identity}` (or `REPORT
/// {base_url}/sdk/evalx/{environment}/user`), the stream is opened at the same paths under
/// `{stream_url}/eval/{environment}`, and events are posted to
/// `{events_url}/events/bulk/{environment}`.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if any of the configured URLs cannot be parsed.
    pub fn new(config: HttpTransportConfig) -> Result<HttpTransport> {
        for url in [&config.base_url, &config.stream_url, &config.events_url] {
            Url::parse(url).map_err(Error::InvalidBaseUrl)?;
        }

        let mut headers = HeaderMap::new();
        if config.send_sdk_headers {
            headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(HttpTransport { client, config })
    }

    fn identity_request(
        &self,
        base_url: &str,
        path: &str,
        identity: &RedactedIdentity,
        hash: Option<&str>,
    ) -> Result<RequestBuilder> {
        let environment = &self.config.environment_id;
        let identity_json = serde_json::to_vec(identity)?;

        let url = if self.config.use_report {
            format!("{base_url}{path}/{environment}/user")
        } else {
            let encoded = URL_SAFE_NO_PAD.encode(&identity_json);
            format!("{base_url}{path}/{environment}/users/{encoded}")
        };

        let mut params = Vec::new();
        if self.config.evaluation_reasons {
            params.push(("withReasons", "true"));
        }
        if let Some(hash) = hash {
            params.push(("h", hash));
        }
        let mut url = Url::parse(&url).map_err(Error::InvalidBaseUrl)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(&params);
        }

        let request = if self.config.use_report {
            let report = Method::from_bytes(b"REPORT").expect("REPORT should be a valid method");
            self.client
                .request(report, url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(identity_json)
        } else {
            self.client.get(url)
        };

        Ok(request)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        log::warn!(target: "flagwire", "client is not authorized. Check your environment id");
    } else {
        log::warn!(target: "flagwire", status = status.as_u16(); "received non-success response");
    }
    Err(Error::UnexpectedStatus(status.as_u16()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_flags(&self, identity: &RedactedIdentity, hash: Option<&str>) -> Result<FlagMap> {
        let request = self.identity_request(&self.config.base_url, "/sdk/evalx", identity, hash)?;

        log::debug!(target: "flagwire", "fetching flags");
        let response = check_status(request.send().await?)?;
        let flags = response.json().await?;
        log::debug!(target: "flagwire", "successfully fetched flags");

        Ok(flags)
    }

    async fn open_stream(
        &self,
        identity: &RedactedIdentity,
        hash: Option<&str>,
    ) -> Result<MessageStream> {
        let request = self
            .identity_request(&self.config.stream_url, "/eval", identity, hash)?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        let response = check_status(request.send().await?)?;

        let messages = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => StreamMessage::parse(&event.event, &event.data),
                    Err(err) => Some(Err(Error::Stream(err.to_string()))),
                })
            })
            .boxed();

        Ok(messages)
    }

    async fn post_events(&self, events: Vec<EventRecord>) -> Result<()> {
        let url = format!(
            "{}/events/bulk/{}",
            self.config.events_url, self.config.environment_id
        );
        let url = Url::parse(&url).map_err(Error::InvalidBaseUrl)?;

        let response = self.client.post(url).json(&events).send().await?;
        check_status(response)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::{
        matchers::{header, method, path, path_regex, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        events::CustomEvent, EvaluationReason, FlagValue, Identity, PrivacyPolicy, ReasonKind,
    };

    fn config(server: &MockServer) -> HttpTransportConfig {
        HttpTransportConfig {
            environment_id: "env-1".to_owned(),
            base_url: server.uri(),
            stream_url: server.uri(),
            events_url: server.uri(),
            use_report: false,
            send_sdk_headers: true,
            evaluation_reasons: true,
        }
    }

    fn identity() -> RedactedIdentity {
        Identity::new("user-1").redact(&PrivacyPolicy::default())
    }

    #[tokio::test]
    async fn fetches_flags_with_encoded_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/sdk/evalx/env-1/users/[A-Za-z0-9_-]+$"))
            .and(query_param("withReasons", "true"))
            .and(header(USER_AGENT_HEADER, USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "banner": {"value": "blue", "variation": 1, "version": 3,
                           "reason": {"kind": "FALLTHROUGH"}},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config(&server)).unwrap();
        let flags = transport.fetch_flags(&identity(), None).await.unwrap();

        let banner = &flags["banner"];
        assert_eq!(banner.value, FlagValue::from("blue"));
        assert_eq!(banner.variation_index, Some(1));
        assert_eq!(
            banner.reason,
            Some(EvaluationReason {
                kind: ReasonKind::Fallthrough,
                error_kind: None,
                rule_index: None,
                rule_id: None,
                prerequisite_key: None,
            })
        );
    }

    #[tokio::test]
    async fn identity_segment_decodes_to_redacted_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config(&server)).unwrap();
        transport.fetch_flags(&identity(), Some("sig")).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let url = &requests[0].url;
        let segment = url.path_segments().unwrap().last().unwrap().to_owned();
        let decoded: RedactedIdentity =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap();
        assert_eq!(decoded, identity());
        assert!(url.query_pairs().any(|(k, v)| k == "h" && v == "sig"));
    }

    #[tokio::test]
    async fn unauthorized_is_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config(&server)).unwrap();
        let result = transport.fetch_flags(&identity(), None).await;

        assert!(matches!(result, Err(Error::UnexpectedStatus(401))));
    }

    #[tokio::test]
    async fn posts_event_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events/bulk/env-1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config(&server)).unwrap();
        let event = EventRecord::Custom(CustomEvent {
            creation_date: chrono::Utc::now(),
            key: "purchase".to_owned(),
            user: Arc::new(identity()),
            data: Some(serde_json::json!({"items": 2})),
        });
        transport.post_events(vec![event]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body[0]["kind"], "custom");
        assert_eq!(body[0]["key"], "purchase");
    }

    #[tokio::test]
    async fn stream_yields_parsed_messages() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: put\ndata: {\"a\": {\"value\": 1}}\n\n",
            "event: heartbeat\ndata: \n\n",
            "event: patch\ndata: not-json\n\n",
            "event: delete\ndata: {\"key\": \"a\", \"version\": 2}\n\n",
        );
        Mock::given(method("GET"))
            .and(path_regex(r"^/eval/env-1/users/.+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config(&server)).unwrap();
        let messages: Vec<_> = transport
            .open_stream(&identity(), None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(messages.len(), 3);
        let Ok(StreamMessage::Put(flags)) = &messages[0] else {
            panic!("expected a put message");
        };
        assert_eq!(flags["a"].value, FlagValue::from(1));
        assert!(matches!(messages[1], Err(Error::StreamParse(_))));
        assert!(matches!(
            &messages[2],
            Ok(StreamMessage::Delete { key, version: Some(2) }) if key == "a"
        ));
    }

    #[test]
    fn rejects_invalid_urls() {
        let result = HttpTransport::new(HttpTransportConfig {
            environment_id: "env".to_owned(),
            base_url: "not a url".to_owned(),
            stream_url: ClientConfig::DEFAULT_STREAM_URL.to_owned(),
            events_url: ClientConfig::DEFAULT_EVENTS_URL.to_owned(),
            use_report: false,
            send_sdk_headers: false,
            evaluation_reasons: false,
        });
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }
}
