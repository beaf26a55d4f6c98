//! Query-protocol HTTP adapter.
//!
//! Every action arrives as a POST with a form-encoded body; `Action` selects
//! the operation. Queue-scoped actions name their queue through the
//! `QueueUrl` parameter or by being posted directly to the queue URL path.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::debug;

use crate::error::SqsError;
use crate::manager::QueueManager;
use crate::params::Params;
use crate::queue::MAX_DELAY_SECS;
use crate::types::{
    ChangeVisibilityBatchEntry, DeleteMessageBatchEntry, ReceiveCommand, SendMessageBatchEntry,
    SendMessageCommand,
};
use crate::xml;

pub fn create_router(manager: Arc<QueueManager>) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .route("/:account/:queue", post(handle_request))
        .with_state(manager)
}

fn xml_response(body: String) -> Response {
    ([("content-type", "text/xml")], body).into_response()
}

fn queue_url_of(params: &Params, uri: &Uri) -> Result<String, SqsError> {
    if let Some(url) = params.get("QueueUrl") {
        return Ok(url.to_string());
    }
    let path = uri.path();
    if path != "/" {
        return Ok(path.to_string());
    }
    Err(SqsError::MissingParameter(
        "The request must contain the parameter QueueUrl.".into(),
    ))
}

fn parse_delay(params: &Params) -> Result<Option<u32>, SqsError> {
    match params.get_i64("DelaySeconds")? {
        None => Ok(None),
        Some(d) if (0..=MAX_DELAY_SECS).contains(&d) => Ok(Some(d as u32)),
        Some(_) => Err(SqsError::InvalidParameterValue(
            "DelaySeconds must be between 0 and 900".into(),
        )),
    }
}

fn send_command(params: &Params) -> Result<SendMessageCommand, SqsError> {
    Ok(SendMessageCommand {
        body: params.require("MessageBody")?.to_string(),
        attributes: params.message_attributes()?,
        delay_seconds: parse_delay(params)?,
        group_id: params.get("MessageGroupId").map(str::to_string),
        dedup_id: params.get("MessageDeduplicationId").map(str::to_string),
    })
}

async fn handle_request(
    State(manager): State<Arc<QueueManager>>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, SqsError> {
    let params = Params::parse(&body)?;
    let action = params.require("Action")?.to_string();
    debug!(%action, "dispatching request");

    match action.as_str() {
        "CreateQueue" => {
            let name = params.require("QueueName")?;
            let attributes = params.attribute_entries("Attribute")?;
            let url = manager.create_queue(name, &attributes).await?;
            Ok(xml_response(xml::format_create_queue(&url)))
        }
        "DeleteQueue" => {
            let url = queue_url_of(&params, &uri)?;
            manager.delete_queue(&url).await?;
            Ok(xml_response(xml::format_empty("DeleteQueue")))
        }
        "GetQueueUrl" => {
            let name = params.require("QueueName")?;
            let url = manager.get_queue_url(name).await?;
            Ok(xml_response(xml::format_get_queue_url(&url)))
        }
        "ListQueues" => {
            let urls = manager.list_queues(params.get("QueueNamePrefix")).await;
            Ok(xml_response(xml::format_list_queues(&urls)))
        }
        "GetQueueAttributes" => {
            let url = queue_url_of(&params, &uri)?;
            let names = params.list("AttributeName");
            let attributes = manager.get_queue_attributes(&url, &names).await?;
            Ok(xml_response(xml::format_get_queue_attributes(&attributes)))
        }
        "SetQueueAttributes" => {
            let url = queue_url_of(&params, &uri)?;
            let attributes = params.attribute_entries("Attribute")?;
            manager.set_queue_attributes(&url, &attributes).await?;
            Ok(xml_response(xml::format_empty("SetQueueAttributes")))
        }
        "PurgeQueue" => {
            let url = queue_url_of(&params, &uri)?;
            manager.purge_queue(&url).await?;
            Ok(xml_response(xml::format_empty("PurgeQueue")))
        }
        "SendMessage" => {
            let url = queue_url_of(&params, &uri)?;
            let command = send_command(&params)?;
            let result = manager.send_message(&url, command).await?;
            Ok(xml_response(xml::format_send_message(&result)))
        }
        "SendMessageBatch" => {
            let url = queue_url_of(&params, &uri)?;
            let mut entries = Vec::new();
            for group in params.indexed("SendMessageBatchRequestEntry") {
                entries.push(SendMessageBatchEntry {
                    id: group.require("Id")?.to_string(),
                    command: send_command(&group)?,
                });
            }
            let outcome = manager.send_message_batch(&url, entries).await?;
            Ok(xml_response(xml::format_send_message_batch(&outcome)))
        }
        "ReceiveMessage" => {
            let url = queue_url_of(&params, &uri)?;
            let command = ReceiveCommand {
                max_messages: params.get_i64("MaxNumberOfMessages")?,
                visibility_timeout: params.get_i64("VisibilityTimeout")?,
                wait_time_seconds: params.get_i64("WaitTimeSeconds")?,
                attribute_names: params.list("AttributeName"),
                message_attribute_names: params.list("MessageAttributeName"),
            };
            let messages = manager.receive_message(&url, command).await?;
            Ok(xml_response(xml::format_receive_message(&messages)))
        }
        "DeleteMessage" => {
            let url = queue_url_of(&params, &uri)?;
            let receipt_handle = params.require("ReceiptHandle")?;
            manager.delete_message(&url, receipt_handle).await?;
            Ok(xml_response(xml::format_empty("DeleteMessage")))
        }
        "DeleteMessageBatch" => {
            let url = queue_url_of(&params, &uri)?;
            let mut entries = Vec::new();
            for group in params.indexed("DeleteMessageBatchRequestEntry") {
                entries.push(DeleteMessageBatchEntry {
                    id: group.require("Id")?.to_string(),
                    receipt_handle: group.require("ReceiptHandle")?.to_string(),
                });
            }
            let outcome = manager.delete_message_batch(&url, entries).await?;
            Ok(xml_response(xml::format_id_batch("DeleteMessageBatch", &outcome)))
        }
        "ChangeMessageVisibility" => {
            let url = queue_url_of(&params, &uri)?;
            let receipt_handle = params.require("ReceiptHandle")?;
            let visibility_timeout = params.get_i64("VisibilityTimeout")?.ok_or_else(|| {
                SqsError::MissingParameter(
                    "The request must contain the parameter VisibilityTimeout.".into(),
                )
            })?;
            manager
                .change_message_visibility(&url, receipt_handle, visibility_timeout)
                .await?;
            Ok(xml_response(xml::format_empty("ChangeMessageVisibility")))
        }
        "ChangeMessageVisibilityBatch" => {
            let url = queue_url_of(&params, &uri)?;
            let mut entries = Vec::new();
            for group in params.indexed("ChangeMessageVisibilityBatchRequestEntry") {
                let visibility_timeout = group.get_i64("VisibilityTimeout")?.ok_or_else(|| {
                    SqsError::MissingParameter(
                        "The request must contain the parameter VisibilityTimeout.".into(),
                    )
                })?;
                entries.push(ChangeVisibilityBatchEntry {
                    id: group.require("Id")?.to_string(),
                    receipt_handle: group.require("ReceiptHandle")?.to_string(),
                    visibility_timeout,
                });
            }
            let outcome = manager
                .change_message_visibility_batch(&url, entries)
                .await?;
            Ok(xml_response(xml::format_id_batch(
                "ChangeMessageVisibilityBatch",
                &outcome,
            )))
        }
        other => Err(SqsError::InvalidAction(format!("Unknown action: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let manager = Arc::new(QueueManager::new(
            "http://localhost:9324".into(),
            "000000000000".into(),
            Clock::system(),
        ));
        create_router(manager)
    }

    async fn call(app: Router, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (status, body) = call(app(), "Action=LaunchRockets").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidAction</Code>"));
    }

    #[tokio::test]
    async fn missing_action_is_missing_parameter() {
        let (status, body) = call(app(), "QueueName=q1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>MissingParameter</Code>"));
    }

    #[tokio::test]
    async fn create_queue_returns_url() {
        let (status, body) = call(app(), "Action=CreateQueue&QueueName=q1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<QueueUrl>http://localhost:9324/000000000000/q1</QueueUrl>"));
    }

    #[tokio::test]
    async fn queue_scoped_action_accepts_path_addressing() {
        let router = app();
        let (status, _) = call(router.clone(), "Action=CreateQueue&QueueName=q1").await;
        assert_eq!(status, StatusCode::OK);

        let response = router
            .oneshot(
                Request::post("/000000000000/q1")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("Action=SendMessage&MessageBody=hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("<MD5OfMessageBody>49f68a5c8493ec2c0bf489821c21fc3b</MD5OfMessageBody>"));
    }
}
