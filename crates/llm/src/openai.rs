use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::events::StreamEvent;
use super::model::GptVersion;
use super::provider::{
    EmptyMessageSetSnafu, InvalidHeaderSnafu, LlmProvider, MissingApiKeySnafu, ProviderConfig,
    ProviderError, ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker,
    RequestSnafu, StatusSnafu, StreamRequest, make_event_stream,
};
use super::sse::StreamAssembler;

pub const OPENAI_PROVIDER_ID: &str = "openai";
const ORGANIZATION_HEADER: &str = "openai-organization";

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ProviderMessage],
    stream: bool,
}

/// Streams chat completions from an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "openai-provider-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let http = reqwest::Client::builder()
            .default_headers(Self::default_headers(&config)?)
            .build()
            .context(RequestSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, http })
    }

    fn default_headers(config: &ProviderConfig) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();

        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).context(InvalidHeaderSnafu {
                stage: "authorization-header",
                header: "Authorization",
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if !config.organization.is_empty() {
            let organization =
                HeaderValue::from_str(&config.organization).context(InvalidHeaderSnafu {
                    stage: "organization-header",
                    header: ORGANIZATION_HEADER,
                })?;
            headers.insert(HeaderName::from_static(ORGANIZATION_HEADER), organization);
        }

        Ok(headers)
    }

    fn completions_url(config: &ProviderConfig) -> String {
        format!("{}/chat/completions", config.base_url)
    }

    async fn open_stream(
        http: &reqwest::Client,
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<reqwest::Response> {
        let body = ChatCompletionBody {
            model: &request.model_id,
            messages: &request.messages,
            stream: true,
        };

        let response = http
            .post(Self::completions_url(config))
            .json(&body)
            .send()
            .await
            .context(RequestSnafu {
                stage: "open-stream",
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        StatusSnafu {
            stage: "open-stream-status",
            status: status.as_u16(),
            message: provider_error_message(status.as_u16(), &text),
        }
        .fail()
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<StreamEvent>, error: ProviderError) {
        let _ = event_tx.send(StreamEvent::Error(error.to_string()));
    }

    async fn run_stream_worker(
        http: reqwest::Client,
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(model_id = %request.model_id, "stream cancelled before response");
                return;
            }
            opened = Self::open_stream(&http, &config, &request) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut body = response.bytes_stream();
        let mut assembler = StreamAssembler::default();

        loop {
            let events = tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping `body` closes the connection.
                    tracing::debug!(model_id = %request.model_id, "provider stream cancelled");
                    return;
                }
                next_chunk = body.next() => match next_chunk {
                    Some(Ok(bytes)) => assembler.push(&bytes),
                    Some(Err(source)) => {
                        tracing::warn!(error = %source, "provider stream failed mid-body");
                        Self::emit_error_event(
                            &event_tx,
                            ProviderError::Request {
                                stage: "stream-chunk",
                                source,
                            },
                        );
                        return;
                    }
                    None => assembler.finish(),
                },
            };

            for event in events {
                if event_tx.send(event).is_err() {
                    return;
                }
            }

            if assembler.is_finished() {
                return;
            }
        }
    }
}

impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn default_model(&self) -> &str {
        GptVersion::default().model_id()
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                model_id: request.model_id.clone(),
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.http.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

/// Pulls `error.message` out of an OpenAI error body when there is one.
fn provider_error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty());

    match detail {
        Some(message) => message,
        None if body.trim().is_empty() => format!("provider returned status {status}"),
        None => format!("provider returned status {status}: {}", body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::provider::Role;

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buffer = [0_u8; 4096];
        loop {
            let read = socket.read(&mut buffer).await.expect("read request");
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buffer[..read]);

            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    /// Serves one canned response and hands back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{body}"
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            socket.shutdown().await.expect("shutdown");
            request
        });
        (format!("http://{address}/v1"), server)
    }

    fn provider(base_url: String) -> OpenAiProvider {
        OpenAiProvider::new(ProviderConfig::new(
            OPENAI_PROVIDER_ID,
            "sk-test",
            "org-test",
            base_url,
        ))
        .expect("provider")
    }

    fn request() -> StreamRequest {
        StreamRequest::new(
            "gpt-3.5-turbo",
            vec![ProviderMessage::new(Role::User, "Hello")],
        )
    }

    async fn collect(handle: ProviderStreamHandle) -> Vec<StreamEvent> {
        let ProviderStreamHandle { mut stream, worker } = handle;
        let worker = tokio::spawn(worker);
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        worker.await.expect("worker");
        events
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let result = OpenAiProvider::new(ProviderConfig::new("openai", " ", "", ""));
        assert!(matches!(result, Err(ProviderError::MissingApiKey { .. })));
    }

    #[test]
    fn empty_request_is_rejected() {
        let provider = provider("http://127.0.0.1:9/v1".to_string());
        let result = provider.stream_chat(StreamRequest::new("gpt-4", Vec::new()));
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }

    #[test]
    fn error_body_message_is_preferred() {
        let message = provider_error_message(
            401,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        );
        assert_eq!(message, "Incorrect API key provided");
        assert_eq!(provider_error_message(502, ""), "provider returned status 502");
    }

    #[tokio::test]
    async fn streams_fragments_then_done_with_credentials_attached() {
        let (base_url, server) = serve_once(
            "200 OK",
            concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ),
        )
        .await;

        let events = collect(provider(base_url).stream_chat(request()).expect("stream")).await;
        let raw_request = server.await.expect("server").to_ascii_lowercase();

        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Hi".to_string()),
                StreamEvent::Done {
                    finish_reason: Some("stop".to_string())
                },
            ]
        );
        assert!(raw_request.starts_with("post /v1/chat/completions"));
        assert!(raw_request.contains("authorization: bearer sk-test"));
        assert!(raw_request.contains("openai-organization: org-test"));
        assert!(raw_request.contains("\"stream\":true"));
    }

    #[tokio::test]
    async fn rejected_request_surfaces_a_single_error() {
        let (base_url, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"Rate limit reached"}}"#,
        )
        .await;

        let events = collect(provider(base_url).stream_chat(request()).expect("stream")).await;
        server.await.expect("server");

        assert_eq!(
            events,
            vec![StreamEvent::Error("Rate limit reached".to_string())]
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            let head = concat!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n",
                "transfer-encoding: chunked\r\n\r\n",
            );
            let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
            let framed = format!("{head}{:x}\r\n{chunk}\r\n", chunk.len());
            socket.write_all(framed.as_bytes()).await.expect("write");
            // Hold the connection open until the client goes away.
            let mut sink = [0_u8; 64];
            while socket.read(&mut sink).await.map_or(false, |read| read > 0) {}
        });

        let handle = provider(format!("http://{address}/v1"))
            .stream_chat(request())
            .expect("stream");
        let ProviderStreamHandle { mut stream, worker } = handle;
        let worker = tokio::spawn(worker);

        assert_eq!(
            stream.recv().await,
            Some(StreamEvent::Fragment("partial".to_string()))
        );
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker stops after cancel")
            .expect("worker task");
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("connection closed")
            .expect("server task");
    }
}
