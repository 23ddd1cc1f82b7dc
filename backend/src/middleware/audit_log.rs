use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use http_body::{Body as HttpBody, Frame};
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::{
    context::{self, RequestContext, RequestSnapshot},
    models::audit_event::{ApiEvent, AuditEvent, REQUEST_TYPE_INTERNAL},
    models::user::UserContext,
    state::AuditState,
};

pub const AUDIT_MESSAGE: &str = "Audit Internal Request";

const INVALID_JSON: &str = "Invalid JSON";
const RAW_CONTENT: &str = "Raw content";
const BINARY_CONTENT: &str = "Binary content";
const BODY_TOO_LARGE: &str = "Body too large";
const STREAMING_CONTENT: &str = "Streaming content";

/// Request extension marking a connection terminated with TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureConnection;

/// Records one `audit.request` event per audited request.
///
/// Every request runs inside its own context scope, audited or not, and the
/// context is cleared however the request ends.
pub async fn audit_request(
    State(audit): State<AuditState>,
    request: Request,
    next: Next,
) -> Response {
    let request_context = RequestContext::new();
    let guard = request_context.guard();
    request_context
        .scope(async move {
            let _guard = guard;
            record_exchange(audit, request, next).await
        })
        .await
}

async fn record_exchange(audit: AuditState, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let secure = is_secure(&request, audit.settings.trust_forwarded_proto);
    let headers = header_map(request.headers());
    let snapshot = RequestSnapshot {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        headers: headers.clone(),
        secure,
    };
    context::set_current_request(snapshot.clone());

    if !audit.filter.should_audit_url(&snapshot.path) {
        return next.run(request).await;
    }

    let mut request_repr = Map::new();
    request_repr.insert("method".to_string(), Value::String(snapshot.method.clone()));
    request_repr.insert("path".to_string(), Value::String(snapshot.path.clone()));
    request_repr.insert(
        "query_params".to_string(),
        Value::Object(query_params(request.uri())),
    );
    request_repr.insert("headers".to_string(), string_map(&headers));

    let request = if is_json(request.headers()) {
        let (parts, body) = request.into_parts();
        let (body, captured) = buffer_body(body, audit.settings.max_body_bytes).await;
        request_repr.insert("body".to_string(), request_body_repr(captured));
        Request::from_parts(parts, body)
    } else {
        if !request.body().is_end_stream() {
            request_repr.insert("body".to_string(), Value::String(RAW_CONTENT.to_string()));
        }
        request
    };

    let response = next.run(request).await;
    let execution_time = started.elapsed().as_secs_f64();

    if let Some(user) = response.extensions().get::<UserContext>().cloned() {
        context::set_current_user(user);
    }
    let (user_id, user_info) = context::get_user_details();

    let status = response.status();
    let (parts, body) = response.into_parts();
    let (body, captured) = capture_response_body(body, audit.settings.max_body_bytes).await;
    let response = Response::from_parts(parts, body);

    let mut response_repr = Map::new();
    response_repr.insert("status_code".to_string(), Value::from(status.as_u16()));
    response_repr.insert(
        "headers".to_string(),
        string_map(&header_map(response.headers())),
    );
    if let Some(body) = response_body_repr(captured) {
        response_repr.insert("body".to_string(), body);
    }

    let error_message = if status.is_client_error() || status.is_server_error() {
        status.to_string()
    } else {
        String::new()
    };

    let event = AuditEvent::api(
        AUDIT_MESSAGE,
        ApiEvent {
            service_name: audit.settings.service_name.clone(),
            request_type: REQUEST_TYPE_INTERNAL.to_string(),
            protocol: if secure { "https" } else { "http" }.to_string(),
            user_id,
            user_info,
            request_repr,
            response_repr,
            error_message,
            execution_time,
        },
    );
    if let Err(err) = audit.logger.emit(event) {
        tracing::warn!(
            error = %err,
            method = %snapshot.method,
            path = %snapshot.path,
            "Failed to record audit log"
        );
    }

    response
}

fn is_secure(request: &Request, trust_forwarded_proto: bool) -> bool {
    if request.extensions().get::<SecureConnection>().is_some() {
        return true;
    }
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    trust_forwarded_proto
        && request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    map
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect(),
    )
}

/// Repeated keys keep their last value.
fn query_params(uri: &Uri) -> Map<String, Value> {
    match Query::<Vec<(String, String)>>::try_from_uri(uri) {
        Ok(Query(pairs)) => pairs
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
        Err(err) => {
            tracing::debug!(error = %err, "Unparseable query string");
            Map::new()
        }
    }
}

fn request_body_repr(captured: BodyCapture) -> Value {
    match captured {
        BodyCapture::Complete(bytes) => serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(INVALID_JSON.to_string())),
        BodyCapture::TooLarge => Value::String(BODY_TOO_LARGE.to_string()),
        BodyCapture::Streaming => Value::String(STREAMING_CONTENT.to_string()),
        BodyCapture::Failed => Value::String(INVALID_JSON.to_string()),
    }
}

/// `None` when the body is empty or could not be read.
fn response_body_repr(captured: BodyCapture) -> Option<Value> {
    match captured {
        BodyCapture::Complete(bytes) if bytes.is_empty() => None,
        BodyCapture::Complete(bytes) => Some(match std::str::from_utf8(&bytes) {
            Ok(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            Err(_) => Value::String(BINARY_CONTENT.to_string()),
        }),
        BodyCapture::TooLarge => Some(Value::String(BODY_TOO_LARGE.to_string())),
        BodyCapture::Streaming => Some(Value::String(STREAMING_CONTENT.to_string())),
        BodyCapture::Failed => None,
    }
}

#[derive(Debug, PartialEq)]
enum BodyCapture {
    Complete(Bytes),
    TooLarge,
    Streaming,
    Failed,
}

struct BufferedBody {
    buffered: VecDeque<Frame<Bytes>>,
    inner: Body,
    pending_error: Option<axum::Error>,
}

impl BufferedBody {
    fn new(
        buffered: VecDeque<Frame<Bytes>>,
        inner: Body,
        pending_error: Option<axum::Error>,
    ) -> Self {
        Self {
            buffered,
            inner,
            pending_error,
        }
    }

    fn buffered_len(&self) -> u64 {
        self.buffered
            .iter()
            .filter_map(|frame| frame.data_ref().map(|data| data.len() as u64))
            .sum()
    }
}

impl HttpBody for BufferedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(frame) = this.buffered.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(err) = this.pending_error.take() {
            this.inner = Body::empty();
            return Poll::Ready(Some(Err(err)));
        }
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn size_hint(&self) -> http_body::SizeHint {
        let buffered_len = self.buffered_len();
        let mut hint = self.inner.size_hint();
        hint.set_lower(hint.lower().saturating_add(buffered_len));
        if let Some(upper) = hint.upper() {
            hint.set_upper(upper.saturating_add(buffered_len));
        }
        hint
    }

    fn is_end_stream(&self) -> bool {
        if !self.buffered.is_empty() || self.pending_error.is_some() {
            return false;
        }
        self.inner.is_end_stream()
    }
}

/// Only bodies whose full length is known up front are read, so streamed
/// responses pass through without waiting on the stream.
async fn capture_response_body(body: Body, limit: usize) -> (Body, BodyCapture) {
    match body.size_hint().exact() {
        Some(len) if len <= limit as u64 => buffer_body(body, limit).await,
        Some(_) => (body, BodyCapture::TooLarge),
        None => (body, BodyCapture::Streaming),
    }
}

/// Reads up to `limit` bytes of `body` and returns a body that replays
/// everything read followed by whatever was not.
async fn buffer_body(mut body: Body, limit: usize) -> (Body, BodyCapture) {
    let mut buffered_frames = VecDeque::new();
    let mut buffered_bytes = Vec::new();
    let mut overflowed = false;
    let mut pending_error = None;

    while let Some(frame_result) = body.frame().await {
        match frame_result {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    let new_len = buffered_bytes.len() + data.len();
                    if new_len > limit {
                        overflowed = true;
                    } else {
                        buffered_bytes.extend_from_slice(data);
                    }
                }
                buffered_frames.push_back(frame);
                if overflowed {
                    break;
                }
            }
            Err(err) => {
                pending_error = Some(err);
                break;
            }
        }
    }

    let captured = if pending_error.is_some() {
        BodyCapture::Failed
    } else if overflowed {
        BodyCapture::TooLarge
    } else {
        BodyCapture::Complete(Bytes::from(buffered_bytes))
    };
    let replay_body = BufferedBody::new(buffered_frames, body, pending_error);
    (Body::new(replay_body), captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Method;

    #[tokio::test]
    async fn buffer_body_preserves_large_body() {
        let body = vec![b'a'; 1025];
        let (replayed, captured) = buffer_body(Body::from(body.clone()), 1024).await;
        let bytes = to_bytes(replayed, body.len() + 1)
            .await
            .expect("body should remain readable");

        assert_eq!(bytes.as_ref(), body.as_slice());
        assert_eq!(captured, BodyCapture::TooLarge);
    }

    #[tokio::test]
    async fn buffer_body_captures_small_body() {
        let (replayed, captured) = buffer_body(Body::from(r#"{"a":1}"#), 1024).await;
        assert_eq!(captured, BodyCapture::Complete(Bytes::from_static(br#"{"a":1}"#)));
        let bytes = to_bytes(replayed, 1024).await.expect("replay");
        assert_eq!(bytes.as_ref(), br#"{"a":1}"#);
    }

    struct OneChunkThenPending {
        sent: bool,
    }

    impl HttpBody for OneChunkThenPending {
        type Data = Bytes;
        type Error = axum::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            if self.sent {
                return Poll::Pending;
            }
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"chunk")))))
        }
    }

    #[tokio::test]
    async fn streamed_response_is_not_read() {
        let body = Body::new(OneChunkThenPending { sent: false });
        let (mut passed, captured) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            capture_response_body(body, 1024),
        )
        .await
        .expect("capture must not wait on the stream");
        assert_eq!(captured, BodyCapture::Streaming);

        let frame = passed.frame().await.expect("frame").expect("data");
        assert_eq!(frame.into_data().expect("data").as_ref(), b"chunk");
    }

    #[tokio::test]
    async fn sized_response_is_captured_or_marked_by_length() {
        let (_, captured) = capture_response_body(Body::from("{\"ok\":true}"), 1024).await;
        assert_eq!(captured, BodyCapture::Complete(Bytes::from_static(b"{\"ok\":true}")));

        let (passed, captured) = capture_response_body(Body::from(vec![b'a'; 64]), 16).await;
        assert_eq!(captured, BodyCapture::TooLarge);
        let bytes = to_bytes(passed, 128).await.expect("untouched body");
        assert_eq!(bytes.len(), 64);
        assert_eq!(
            response_body_repr(BodyCapture::Streaming),
            Some(Value::String(STREAMING_CONTENT.to_string()))
        );
    }

    #[test]
    fn request_body_markers() {
        assert_eq!(
            request_body_repr(BodyCapture::Complete(Bytes::from_static(b"{oops"))),
            INVALID_JSON
        );
        assert_eq!(
            request_body_repr(BodyCapture::Complete(Bytes::from_static(b"[1,2]"))),
            serde_json::json!([1, 2])
        );
        assert_eq!(request_body_repr(BodyCapture::TooLarge), BODY_TOO_LARGE);
    }

    #[test]
    fn response_body_prefers_json_then_text() {
        assert_eq!(
            response_body_repr(BodyCapture::Complete(Bytes::from_static(b"{\"ok\":true}"))),
            Some(serde_json::json!({"ok": true}))
        );
        assert_eq!(
            response_body_repr(BodyCapture::Complete(Bytes::from_static(b"plain text"))),
            Some(Value::String("plain text".to_string()))
        );
        assert_eq!(
            response_body_repr(BodyCapture::Complete(Bytes::from_static(&[0xff, 0xfe]))),
            Some(Value::String(BINARY_CONTENT.to_string()))
        );
        assert_eq!(response_body_repr(BodyCapture::Complete(Bytes::new())), None);
    }

    #[test]
    fn json_content_types_are_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(CONTENT_TYPE, "application/merge-patch+json".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn query_params_keep_last_value() {
        let uri: Uri = "/api/books/?page=1&page=2&q=rust".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params["page"], "2");
        assert_eq!(params["q"], "rust");
        assert!(query_params(&"/api/books/".parse().unwrap()).is_empty());
    }

    #[test]
    fn secure_detection_honours_proxy_setting() {
        let forwarded = || {
            Request::builder()
                .method(Method::GET)
                .uri("/api/books/")
                .header("x-forwarded-proto", "https")
                .body(Body::empty())
                .unwrap()
        };
        assert!(!is_secure(&forwarded(), false));
        assert!(is_secure(&forwarded(), true));

        let mut tls = Request::new(Body::empty());
        tls.extensions_mut().insert(SecureConnection);
        assert!(is_secure(&tls, false));
    }
}
