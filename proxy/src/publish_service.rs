use crate::config::Config;
use crate::errors::{ProxyError, RequestError};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT, REQUESTS_REJECTED};
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE};
use http::HeaderValue;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use publisher::{MessageId, OrderedPublisher, PublishRequest};
use serde::{Deserialize, Serialize};
use shared::http::make_text_response;
use shared::{counter, gauge, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const PUBLISH_PATH: &str = "/publish";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct PublishBody {
    topic: Option<String>,
    data: Option<String>,
    attributes: Option<HashMap<String, String>>,
    ordering_key: Option<String>,
}

impl From<PublishBody> for PublishRequest {
    fn from(body: PublishBody) -> Self {
        PublishRequest {
            topic: body.topic.unwrap_or_default(),
            data: Bytes::from(body.data.unwrap_or_default()),
            attributes: body.attributes.unwrap_or_default(),
            ordering_key: body.ordering_key.unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct PublishResponse {
    #[serde(rename = "messageID")]
    message_id: MessageId,
}

struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Serves `POST /publish`.
#[derive(Clone)]
pub struct PublishService {
    publisher: OrderedPublisher,
    max_body_bytes: usize,
    publish_timeout: Option<Duration>,
}

impl PublishService {
    pub fn new(publisher: OrderedPublisher, config: &Config) -> Self {
        Self {
            publisher,
            max_body_bytes: config.max_body_bytes,
            publish_timeout: config.publish_timeout(),
        }
    }

    async fn handle<B>(&self, req: Request<B>) -> Result<MessageId, RequestError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.uri().path() != PUBLISH_PATH {
            return Err(RequestError::NotFound);
        }
        if req.method() != Method::POST {
            return Err(RequestError::MethodNotAllowed);
        }

        let bytes = Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    RequestError::BodyTooLarge
                } else {
                    RequestError::InvalidBody(e.to_string())
                }
            })?
            .to_bytes();

        let body: PublishBody = serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::InvalidBody(e.to_string()))?;
        let request = PublishRequest::from(body);

        let cancel = CancellationToken::new();
        let id = match self.publish_timeout {
            Some(timeout) => {
                let publish = self.publisher.publish(request, &cancel);
                tokio::pin!(publish);
                tokio::select! {
                    res = &mut publish => res,
                    _ = tokio::time::sleep(timeout) => {
                        cancel.cancel();
                        publish.await
                    }
                }
            }
            None => self.publisher.publish(request, &cancel).await,
        }?;

        Ok(id)
    }
}

fn make_json_response<T: Serialize>(value: &T) -> Response<BoxBody<Bytes, ProxyError>> {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let mut response =
                Response::new(Full::new(Bytes::from(bytes)).map_err(|e| match e {}).boxed());
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => make_text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn make_request_error_response(err: &RequestError) -> Response<BoxBody<Bytes, ProxyError>> {
    let status = err.status();
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %err, "publish request failed");
    } else {
        counter!(REQUESTS_REJECTED).increment(1);
        tracing::debug!(status = status.as_u16(), error = %err, "publish request rejected");
    }

    let mut response = make_text_response(status, format!("{err}\n"));
    if matches!(err, RequestError::MethodNotAllowed) {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
    }
    response
}

impl<B> Service<Request<B>> for PublishService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let _inflight = InflightGuard::new();
            let start = Instant::now();

            let response = match service.handle(req).await {
                Ok(message_id) => make_json_response(&PublishResponse { message_id }),
                Err(err) => make_request_error_response(&err),
            };

            histogram!(REQUEST_DURATION).record(start.elapsed().as_secs_f64());
            Ok(response)
        })
    }
}
