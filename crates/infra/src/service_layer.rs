//! Service-Layer `$batch` transport.
//!
//! A batch is sent as `multipart/mixed` holding a single changeset, so the
//! ERP applies every operation or none of them. The session cookie from
//! `POST /Login` is kept by the client's cookie store; an expired session is
//! refreshed once per submit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use scanbridge_commit::{Batch, BatchResponse, BatchTransport, CommitError, RemoteFault, SubResponse};

use crate::config::ServiceLayerConfig;

const CRLF: &str = "\r\n";

pub struct ServiceLayerTransport {
    client: Client,
    base_url: Url,
    config: ServiceLayerConfig,
    logged_in: Mutex<bool>,
}

impl ServiceLayerTransport {
    pub fn new(config: ServiceLayerConfig) -> Result<Self, CommitError> {
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|e| CommitError::Internal(format!("invalid service layer url: {e}")))?;
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CommitError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            config,
            logged_in: Mutex::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CommitError> {
        self.base_url
            .join(path)
            .map_err(|e| CommitError::Internal(format!("invalid endpoint {path}: {e}")))
    }

    /// Path prefix used in the request lines of batch parts.
    fn service_root(&self) -> &str {
        self.base_url.path().trim_end_matches('/')
    }

    #[instrument(skip(self), fields(company_db = %self.config.company_db, user = %self.config.username), err)]
    async fn login(&self) -> Result<(), CommitError> {
        let response = self
            .client
            .post(self.endpoint("Login")?)
            .json(&json!({
                "CompanyDB": self.config.company_db,
                "UserName": self.config.username,
                "Password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| map_reqwest_error("login", e))?;

        let status = response.status();
        if status.is_success() {
            debug!("service layer session opened");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CommitError::remote(
            error_fault(&body).unwrap_or_else(|| status_fault(status.as_u16(), "login failed")),
        ))
    }

    async fn ensure_session(&self, refresh: bool) -> Result<(), CommitError> {
        let mut logged_in = self.logged_in.lock().await;
        if refresh || !*logged_in {
            *logged_in = false;
            self.login().await?;
            *logged_in = true;
        }
        Ok(())
    }

    async fn post_batch(&self, batch: &Batch) -> Result<(StatusCode, String, String), CommitError> {
        let batch_boundary = format!("batch_{}", Uuid::now_v7());
        let changeset_boundary = format!("changeset_{}", Uuid::now_v7());
        let body = encode_batch(batch, self.service_root(), &batch_boundary, &changeset_boundary);

        let response = self
            .client
            .post(self.endpoint("$batch")?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/mixed;boundary={batch_boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error("batch", e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error("batch", e))?;
        Ok((status, content_type, text))
    }
}

#[async_trait]
impl BatchTransport for ServiceLayerTransport {
    #[instrument(skip(self, batch), fields(operations = batch.len()), err)]
    async fn submit(&self, batch: &Batch) -> Result<BatchResponse, CommitError> {
        self.ensure_session(false).await?;
        let (mut status, mut content_type, mut body) = self.post_batch(batch).await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("service layer session expired; logging in again");
            self.ensure_session(true).await?;
            (status, content_type, body) = self.post_batch(batch).await?;
        }

        let response = decode_batch_response(status.as_u16(), &content_type, &body)?;
        if !response.success {
            warn!(
                error = response.error.as_ref().map(|f| f.description.as_str()),
                "batch rejected"
            );
        }
        Ok(response)
    }
}

/// Render `batch` as a `multipart/mixed` body with one changeset.
pub fn encode_batch(
    batch: &Batch,
    service_root: &str,
    batch_boundary: &str,
    changeset_boundary: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("--{batch_boundary}{CRLF}"));
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary={changeset_boundary}{CRLF}{CRLF}"
    ));

    for (index, operation) in batch.operations().iter().enumerate() {
        out.push_str(&format!("--{changeset_boundary}{CRLF}"));
        out.push_str(&format!("Content-Type: application/http{CRLF}"));
        out.push_str(&format!("Content-Transfer-Encoding: binary{CRLF}"));
        out.push_str(&format!("Content-ID: {}{CRLF}{CRLF}", index + 1));
        out.push_str(&format!(
            "{} {}/{} HTTP/1.1{CRLF}",
            operation.method.as_str(),
            service_root,
            operation.path
        ));
        match &operation.body {
            Some(body) => {
                out.push_str(&format!("Content-Type: application/json{CRLF}{CRLF}"));
                out.push_str(&body.to_string());
                out.push_str(CRLF);
            }
            None => out.push_str(CRLF),
        }
        out.push_str(CRLF);
    }

    out.push_str(&format!("--{changeset_boundary}--{CRLF}"));
    out.push_str(&format!("--{batch_boundary}--{CRLF}"));
    out
}

/// Interpret a `$batch` reply.
///
/// Success needs a 2xx envelope and a 2xx status in every part. On failure
/// the first error body found supplies the fault, description verbatim.
pub fn decode_batch_response(
    status: u16,
    content_type: &str,
    body: &str,
) -> Result<BatchResponse, CommitError> {
    if !(200..300).contains(&status) {
        let fault = error_fault(body).unwrap_or_else(|| status_fault(status, "batch refused"));
        return Ok(BatchResponse {
            success: false,
            error: Some(fault),
            responses: Vec::new(),
        });
    }

    let boundary = boundary_of(content_type).ok_or_else(|| {
        CommitError::MalformedResponse(format!("batch reply without boundary: {content_type}"))
    })?;
    let responses = decode_parts(body, boundary)?;

    let failed = responses.iter().find(|r| !r.is_success());
    let error = failed.map(|part| {
        part.body
            .as_ref()
            .and_then(fault_from_value)
            .unwrap_or_else(|| status_fault(part.status, "batch operation failed"))
    });

    Ok(BatchResponse {
        success: failed.is_none(),
        error,
        responses,
    })
}

fn decode_parts(body: &str, boundary: &str) -> Result<Vec<SubResponse>, CommitError> {
    let delimiter = format!("--{boundary}");
    let mut responses = Vec::new();

    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let (headers, content) = split_headers(part);
        let part_type = header_value(headers, "content-type").unwrap_or_default();

        if part_type.starts_with("multipart/mixed") {
            let inner = boundary_of(part_type).ok_or_else(|| {
                CommitError::MalformedResponse("changeset without boundary".into())
            })?;
            responses.extend(decode_parts(content, inner)?);
        } else {
            responses.push(decode_http_part(content)?);
        }
    }

    Ok(responses)
}

fn decode_http_part(content: &str) -> Result<SubResponse, CommitError> {
    let content = content.trim_start_matches(['\r', '\n']);
    let (status_line, rest) = content.split_once('\n').unwrap_or((content, ""));
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            CommitError::MalformedResponse(format!("bad status line: {}", status_line.trim()))
        })?;

    let (_, payload) = split_headers(rest);
    let payload = payload.trim();
    let body = if payload.is_empty() {
        None
    } else {
        serde_json::from_str::<Value>(payload).ok()
    };
    Ok(SubResponse::new(status, body))
}

/// Split a MIME part into its header block and content at the first blank line.
fn split_headers(part: &str) -> (&str, &str) {
    let part = part.trim_start_matches(['\r', '\n']);
    if let Some((headers, content)) = part.split_once("\r\n\r\n") {
        return (headers, content);
    }
    part.split_once("\n\n").unwrap_or((part, ""))
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn boundary_of(content_type: &str) -> Option<&str> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// `{"error": {"code": .., "message": {"value": ..}}}`
fn fault_from_value(body: &Value) -> Option<RemoteFault> {
    let error = body.get("error")?;
    let description = error
        .pointer("/message/value")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)?;
    let code = match error.get("code") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    };
    Some(RemoteFault::new(code, description))
}

fn error_fault(body: &str) -> Option<RemoteFault> {
    serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(fault_from_value)
}

fn status_fault(status: u16, what: &str) -> RemoteFault {
    RemoteFault::new(i64::from(status), format!("{what} with HTTP {status}"))
}

fn map_reqwest_error(operation: &str, err: reqwest::Error) -> CommitError {
    if err.is_decode() {
        CommitError::MalformedResponse(format!("{operation}: {err}"))
    } else {
        CommitError::TransientConnection(format!("{operation}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanbridge_commit::{BatchMethod, BatchOperation};

    fn batch() -> Batch {
        Batch::new(vec![
            BatchOperation::new(
                BatchMethod::Post,
                "PurchaseDeliveryNotes",
                Some(json!({"CardCode": "V100"})),
            ),
            BatchOperation::new(
                BatchMethod::Patch,
                "Items('SKU1')",
                Some(json!({"ItemBarCodeCollection": [{"Barcode": "ALT-1"}]})),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn batch_is_one_changeset_with_numbered_parts() {
        let body = encode_batch(&batch(), "/b1s/v1", "batch_A", "changeset_B");

        assert!(body.starts_with("--batch_A\r\nContent-Type: multipart/mixed; boundary=changeset_B\r\n"));
        assert!(body.contains("Content-ID: 1\r\n\r\nPOST /b1s/v1/PurchaseDeliveryNotes HTTP/1.1\r\n"));
        assert!(body.contains("Content-ID: 2\r\n\r\nPATCH /b1s/v1/Items('SKU1') HTTP/1.1\r\n"));
        assert!(body.contains(r#"{"CardCode":"V100"}"#));
        assert_eq!(body.matches("--changeset_B\r\n").count(), 2);
        assert!(body.ends_with("--changeset_B--\r\n--batch_A--\r\n"));
    }

    #[test]
    fn boundary_is_read_from_content_type() {
        assert_eq!(boundary_of("multipart/mixed;boundary=batch_1"), Some("batch_1"));
        assert_eq!(boundary_of("multipart/mixed; boundary=\"cs_2\""), Some("cs_2"));
        assert_eq!(boundary_of("application/json"), None);
    }

    #[test]
    fn successful_reply_yields_every_part() {
        let body = concat!(
            "--batchresponse_1\r\n",
            "Content-Type: multipart/mixed;boundary=changesetresponse_2\r\n\r\n",
            "--changesetresponse_2\r\n",
            "Content-Type: application/http\r\n",
            "Content-Transfer-Encoding: binary\r\n",
            "Content-ID: 1\r\n\r\n",
            "HTTP/1.1 201 Created\r\n",
            "Content-Type: application/json;odata.metadata=minimal\r\n\r\n",
            "{\"DocEntry\": 812, \"DocNum\": 100812}\r\n",
            "--changesetresponse_2\r\n",
            "Content-Type: application/http\r\n",
            "Content-Transfer-Encoding: binary\r\n",
            "Content-ID: 2\r\n\r\n",
            "HTTP/1.1 204 No Content\r\n\r\n\r\n",
            "--changesetresponse_2--\r\n",
            "--batchresponse_1--\r\n",
        );

        let response =
            decode_batch_response(202, "multipart/mixed;boundary=batchresponse_1", body).unwrap();

        assert!(response.success);
        assert!(response.error.is_none());
        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses[0].status, 201);
        assert_eq!(
            response.responses[0].body.as_ref().unwrap()["DocEntry"],
            812
        );
        assert_eq!(response.responses[1], SubResponse::new(204, None));
    }

    #[test]
    fn failed_changeset_surfaces_remote_message_verbatim() {
        let body = concat!(
            "--batchresponse_1\r\n",
            "Content-Type: application/http\r\n",
            "Content-Transfer-Encoding: binary\r\n\r\n",
            "HTTP/1.1 400 Bad Request\r\n",
            "Content-Type: application/json\r\n\r\n",
            "{\"error\": {\"code\": -5002, \"message\": {\"lang\": \"en-us\", ",
            "\"value\": \"10000062 - Quantity falls into negative inventory  [DocumentLines.ItemCode][line: 1]\"}}}\r\n",
            "--batchresponse_1--\r\n",
        );

        let response =
            decode_batch_response(202, "multipart/mixed; boundary=batchresponse_1", body).unwrap();

        assert!(!response.success);
        let fault = response.error.unwrap();
        assert_eq!(fault.code, -5002);
        assert_eq!(
            fault.description,
            "10000062 - Quantity falls into negative inventory  [DocumentLines.ItemCode][line: 1]"
        );
    }

    #[test]
    fn refused_envelope_is_a_failed_batch() {
        let response = decode_batch_response(
            400,
            "application/json",
            r#"{"error":{"code":"-1","message":"Invalid batch request"}}"#,
        )
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.error, Some(RemoteFault::new(-1, "Invalid batch request")));
        assert!(response.responses.is_empty());
    }

    #[test]
    fn unreadable_status_line_is_malformed() {
        let body = "--b\r\nContent-Type: application/http\r\n\r\ngarbage\r\n--b--\r\n";
        let err = decode_batch_response(200, "multipart/mixed;boundary=b", body).unwrap_err();
        assert!(matches!(err, CommitError::MalformedResponse(_)));
    }

    #[test]
    fn transport_builds_endpoints_under_service_root() {
        let transport = ServiceLayerTransport::new(ServiceLayerConfig {
            base_url: "https://erp:50000/b1s/v1".into(),
            ..ServiceLayerConfig::default()
        })
        .unwrap();

        assert_eq!(transport.service_root(), "/b1s/v1");
        assert_eq!(
            transport.endpoint("$batch").unwrap().as_str(),
            "https://erp:50000/b1s/v1/$batch"
        );
    }
}
