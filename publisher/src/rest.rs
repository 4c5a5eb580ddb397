//! Cloud Pub/Sub v1 REST transport.

use crate::backend::{Message, MessageId, PublishBackend, TopicHandle, TopicSettings};
use crate::errors::BackendError;
use crate::ordering::{OrderedTopic, Transport};
use crate::subscriber::{ReceivedMessage, Subscription};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

#[derive(Serialize)]
struct PublishBody {
    messages: Vec<OutgoingMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    ordering_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    max_messages: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    message_id: String,
    publish_time: Option<String>,
    #[serde(default)]
    ordering_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody<'a> {
    ack_ids: &'a [String],
}

pub struct RestTransport {
    client: reqwest::Client,
    endpoint: Url,
    project_id: String,
    access_token: Option<String>,
    timeout: Duration,
}

impl RestTransport {
    /// `{endpoint}/v1/projects/{project}/{collection}/{name}:{method}`, with
    /// every segment percent-encoded so a name cannot leave its collection.
    fn url(&self, collection: &str, name: &str, method: &str) -> Result<Url, BackendError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BackendError::Configuration(format!("{} cannot be a base url", self.endpoint))
            })?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                collection,
                format!("{name}:{method}").as_str(),
            ]);
        Ok(url)
    }

    async fn post<B, R>(&self, url: Url, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(url).timeout(self.timeout).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err)
        }
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn send(&self, topic: &str, message: Message) -> Result<MessageId, BackendError> {
        let body = PublishBody {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
                ordering_key: message.ordering_key,
            }],
        };

        let url = self.url("topics", topic, "publish")?;
        let response: PublishResponse = self.post(url, &body).await?;

        response
            .message_ids
            .into_iter()
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BackendError::InvalidResponse("no message id returned".into()))
    }
}

/// Backend talking to the Pub/Sub REST API (or its emulator).
pub struct RestBackend {
    transport: Arc<RestTransport>,
}

impl RestBackend {
    pub fn new(
        endpoint: Url,
        project_id: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().build()?;

        Ok(RestBackend {
            transport: Arc::new(RestTransport {
                client,
                endpoint,
                project_id: project_id.to_owned(),
                access_token,
                timeout,
            }),
        })
    }
}

#[async_trait]
impl PublishBackend for RestBackend {
    fn topic(&self, name: &str, settings: TopicSettings) -> Arc<dyn TopicHandle> {
        Arc::new(OrderedTopic::new(name, settings, self.transport.clone()))
    }

    fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        Arc::new(RestSubscription {
            name: name.to_owned(),
            transport: self.transport.clone(),
        })
    }

    async fn close(&self) -> Result<(), BackendError> {
        // Connections are pooled by the http client and released on drop.
        Ok(())
    }
}

struct RestSubscription {
    name: String,
    transport: Arc<RestTransport>,
}

#[async_trait]
impl Subscription for RestSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BackendError> {
        let url = self.transport.url("subscriptions", &self.name, "pull")?;
        let response: PullResponse = self.transport.post(url, &PullBody { max_messages }).await?;

        response
            .received_messages
            .into_iter()
            .map(|received| {
                let data = STANDARD
                    .decode(received.message.data.as_bytes())
                    .map_err(|e| BackendError::InvalidResponse(format!("invalid data: {e}")))?;

                Ok(ReceivedMessage {
                    ack_id: received.ack_id,
                    message_id: received.message.message_id,
                    message: Message {
                        data: data.into(),
                        attributes: received.message.attributes,
                        ordering_key: received.message.ordering_key,
                    },
                    publish_time: received.message.publish_time,
                })
            })
            .collect()
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<(), BackendError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let url = self.transport.url("subscriptions", &self.name, "acknowledge")?;
        let _: IgnoredAny = self.transport.post(url, &AcknowledgeBody { ack_ids }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    type Recorded = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    /// Serves canned responses keyed by the request path suffix and records
    /// every request it receives.
    async fn start_test_server(delay: Duration) -> (Url, Recorded) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));

        let recorded_clone = recorded.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let recorded = recorded_clone.clone();

                tokio::spawn(async move {
                    let handler = move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let path = req.uri().path().to_owned();
                            let auth = req
                                .headers()
                                .get("authorization")
                                .map(|v| v.to_str().unwrap().to_owned());
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            let json: serde_json::Value =
                                serde_json::from_slice(&body).unwrap_or_default();
                            recorded.lock().push((path.clone(), json));

                            tokio::time::sleep(delay).await;

                            let (status, body) = if path.ends_with("/topics/broken:publish") {
                                (StatusCode::NOT_FOUND, "topic not found".to_string())
                            } else if path.ends_with(":publish") {
                                (
                                    StatusCode::OK,
                                    format!(
                                        r#"{{"messageIds":["{}"]}}"#,
                                        auth.unwrap_or_else(|| "42".into())
                                    ),
                                )
                            } else if path.ends_with(":pull") {
                                (
                                    StatusCode::OK,
                                    r#"{"receivedMessages":[{"ackId":"ack-1","message":{"data":"YWJj","attributes":{"x":"1"},"messageId":"7","publishTime":"2024-01-01T00:00:00Z","orderingKey":"user-42"}}]}"#.to_string(),
                                )
                            } else {
                                (StatusCode::OK, "{}".to_string())
                            };

                            let mut response = Response::new(Full::new(Bytes::from(body)));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    };

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(handler))
                        .await;
                });
            }
        });

        let url = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        (url, recorded)
    }

    fn ordered() -> TopicSettings {
        TopicSettings {
            enable_message_ordering: true,
        }
    }

    #[tokio::test]
    async fn test_publish_request_format() {
        let (url, recorded) = start_test_server(Duration::ZERO).await;
        let backend = RestBackend::new(url, "my-project", None, Duration::from_secs(5)).unwrap();
        let topic = backend.topic("orders", ordered());

        let id = topic
            .publish(Message {
                data: "abc".into(),
                attributes: HashMap::from([("x".to_string(), "1".to_string())]),
                ordering_key: "user-42".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, "42");

        let recorded = recorded.lock();
        let (path, body) = &recorded[0];
        assert_eq!(path, "/v1/projects/my-project/topics/orders:publish");
        assert_eq!(
            body,
            &serde_json::json!({
                "messages": [{"data": "YWJj", "attributes": {"x": "1"}, "orderingKey": "user-42"}]
            })
        );
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let endpoint = Url::parse("http://localhost:8085/base/").unwrap();
        let backend = RestBackend::new(endpoint, "my-project", None, Duration::from_secs(5)).unwrap();

        let url = backend.transport.url("topics", "orders", "publish").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8085/base/v1/projects/my-project/topics/orders:publish"
        );

        let url = backend
            .transport
            .url("topics", "../../other-project/topics/victim", "publish")
            .unwrap();
        assert_eq!(
            url.path(),
            "/base/v1/projects/my-project/topics/..%2F..%2Fother-project%2Ftopics%2Fvictim:publish"
        );
    }

    #[tokio::test]
    async fn test_topic_name_cannot_leave_project() {
        let (url, recorded) = start_test_server(Duration::ZERO).await;
        let backend = RestBackend::new(url, "my-project", None, Duration::from_secs(5)).unwrap();
        let topic = backend.topic("../../other-project/topics/victim", ordered());

        topic.publish(Message::default()).await.unwrap();

        let recorded = recorded.lock();
        assert_eq!(
            recorded[0].0,
            "/v1/projects/my-project/topics/..%2F..%2Fother-project%2Ftopics%2Fvictim:publish"
        );
    }

    #[tokio::test]
    async fn test_unordered_message_omits_optional_fields() {
        let (url, recorded) = start_test_server(Duration::ZERO).await;
        let backend = RestBackend::new(url, "p", None, Duration::from_secs(5)).unwrap();
        let topic = backend.topic("orders", ordered());

        topic.publish(Message::default()).await.unwrap();

        let recorded = recorded.lock();
        assert_eq!(recorded[0].1, serde_json::json!({"messages": [{"data": ""}]}));
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let (url, _recorded) = start_test_server(Duration::ZERO).await;
        let backend =
            RestBackend::new(url, "p", Some("secret".into()), Duration::from_secs(5)).unwrap();
        let topic = backend.topic("orders", ordered());

        // The test server echoes the authorization header as the message id.
        let id = topic.publish(Message::default()).await.unwrap();
        assert_eq!(id, "Bearer secret");
    }

    #[tokio::test]
    async fn test_rejected_publish() {
        let (url, _recorded) = start_test_server(Duration::ZERO).await;
        let backend = RestBackend::new(url, "p", None, Duration::from_secs(5)).unwrap();
        let topic = backend.topic("broken", ordered());

        let err = topic.publish(Message::default()).await.unwrap_err();
        match err {
            BackendError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "topic not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_timeout() {
        let (url, _recorded) = start_test_server(Duration::from_secs(2)).await;
        let backend = RestBackend::new(url, "p", None, Duration::from_millis(100)).unwrap();
        let topic = backend.topic("orders", ordered());

        let err = topic.publish(Message::default()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_pull_and_acknowledge() {
        let (url, recorded) = start_test_server(Duration::ZERO).await;
        let backend = RestBackend::new(url, "p", None, Duration::from_secs(5)).unwrap();
        let subscription = backend.subscription("orders-sub");

        let messages = subscription.pull(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].ack_id, "ack-1");
        assert_eq!(messages[0].message_id, "7");
        assert_eq!(messages[0].message.data, "abc");
        assert_eq!(messages[0].message.ordering_key, "user-42");
        assert_eq!(messages[0].message.attributes["x"], "1");

        subscription.acknowledge(&["ack-1".to_string()]).await.unwrap();

        let recorded = recorded.lock();
        assert_eq!(recorded[0].0, "/v1/projects/p/subscriptions/orders-sub:pull");
        assert_eq!(recorded[0].1, serde_json::json!({"maxMessages": 10}));
        assert_eq!(
            recorded[1].0,
            "/v1/projects/p/subscriptions/orders-sub:acknowledge"
        );
        assert_eq!(recorded[1].1, serde_json::json!({"ackIds": ["ack-1"]}));
    }
}
