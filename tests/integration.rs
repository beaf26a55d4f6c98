//! End-to-end scenarios over the Query-protocol router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use minisqs::{create_router, Clock, DelayDispatcher, QueueManager};

fn build_app() -> (Router, Arc<QueueManager>, DelayDispatcher) {
    let manager = Arc::new(QueueManager::new(
        "http://localhost:9324".into(),
        "000000000000".into(),
        Clock::system(),
    ));
    let dispatcher = DelayDispatcher::spawn(manager.clone());
    (create_router(manager.clone()), manager, dispatcher)
}

async fn call(app: &Router, body: String) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::post("/")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// First `<tag>value</tag>` occurrence in an XML document.
fn extract(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

fn extract_all(xml: &str, tag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = xml;
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    while let Some(start) = rest.find(&open) {
        let value_start = start + open.len();
        let Some(len) = rest[value_start..].find(&close) else { break };
        values.push(rest[value_start..value_start + len].to_string());
        rest = &rest[value_start + len + close.len()..];
    }
    values
}

#[tokio::test]
async fn standard_send_receive_delete_cycle() {
    let (app, _mgr, dispatcher) = build_app();

    let (status, _) = call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    assert_eq!(status, StatusCode::OK);
    let url = "http://localhost:9324/000000000000/q1";

    let (status, body) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=hi"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        extract(&body, "MD5OfMessageBody").as_deref(),
        Some("49f68a5c8493ec2c0bf489821c21fc3b")
    );
    let sent_id = extract(&body, "MessageId").unwrap();

    let (status, body) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&MaxNumberOfMessages=1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(extract(&body, "Body").as_deref(), Some("hi"));
    assert_eq!(extract(&body, "MessageId").unwrap(), sent_id);
    let handle = extract(&body, "ReceiptHandle").unwrap();

    let (status, _) = call(
        &app,
        format!("Action=DeleteMessage&QueueUrl={url}&ReceiptHandle={handle}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, format!("Action=ReceiveMessage&QueueUrl={url}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<ReceiveMessageResult/>"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn fifo_content_deduplication_returns_same_message_id() {
    let (app, _mgr, dispatcher) = build_app();

    let (status, _) = call(
        &app,
        "Action=CreateQueue&QueueName=o.fifo\
         &Attribute.1.Name=FifoQueue&Attribute.1.Value=true\
         &Attribute.2.Name=ContentBasedDeduplication&Attribute.2.Value=true"
            .into(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = "http://localhost:9324/000000000000/o.fifo";

    let (_, first) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=x&MessageGroupId=g"),
    )
    .await;
    let (_, second) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=x&MessageGroupId=g"),
    )
    .await;
    assert_eq!(
        extract(&first, "MessageId").unwrap(),
        extract(&second, "MessageId").unwrap()
    );

    let (_, attrs) = call(
        &app,
        format!(
            "Action=GetQueueAttributes&QueueUrl={url}&AttributeName.1=ApproximateNumberOfMessages"
        ),
    )
    .await;
    assert!(attrs.contains("<Name>ApproximateNumberOfMessages</Name>"));
    assert!(attrs.contains("<Value>1</Value>"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn fifo_group_locking_holds_back_second_message() {
    let (app, _mgr, dispatcher) = build_app();

    let (status, _) = call(
        &app,
        "Action=CreateQueue&QueueName=f.fifo\
         &Attribute.1.Name=FifoQueue&Attribute.1.Value=true\
         &Attribute.2.Name=ContentBasedDeduplication&Attribute.2.Value=true"
            .into(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = "http://localhost:9324/000000000000/f.fifo";

    for (body, group) in [("a", "g1"), ("b", "g1"), ("c", "g2")] {
        let (status, _) = call(
            &app,
            format!("Action=SendMessage&QueueUrl={url}&MessageBody={body}&MessageGroupId={group}"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, batch) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&MaxNumberOfMessages=10"),
    )
    .await;
    let bodies = extract_all(&batch, "Body");
    assert_eq!(bodies, vec!["a", "c"]);

    // Delete "a", unlocking g1.
    let handles = extract_all(&batch, "ReceiptHandle");
    let a_handle = &handles[0];
    let (status, _) = call(
        &app,
        format!("Action=DeleteMessage&QueueUrl={url}&ReceiptHandle={a_handle}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, next) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&MaxNumberOfMessages=10"),
    )
    .await;
    assert_eq!(extract_all(&next, "Body"), vec!["b"]);

    dispatcher.shutdown();
}

#[tokio::test]
async fn delayed_message_appears_after_delay() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    let (status, _) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=m&DelaySeconds=1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, format!("Action=ReceiveMessage&QueueUrl={url}")).await;
    assert!(body.contains("<ReceiveMessageResult/>"));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let (_, body) = call(&app, format!("Action=ReceiveMessage&QueueUrl={url}")).await;
    assert_eq!(extract(&body, "Body").as_deref(), Some("m"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn visibility_expiry_invalidates_old_receipt() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=m"),
    )
    .await;

    let (_, first) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&VisibilityTimeout=1&AttributeName.1=All"),
    )
    .await;
    let handle = extract(&first, "ReceiptHandle").unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let (_, second) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&AttributeName.1=All"),
    )
    .await;
    assert_eq!(
        extract(&second, "MessageId"),
        extract(&first, "MessageId")
    );
    assert!(second.contains("<Name>ApproximateReceiveCount</Name>"));
    assert!(second.contains("<Value>2</Value>"));

    let (status, body) = call(
        &app,
        format!("Action=DeleteMessage&QueueUrl={url}&ReceiptHandle={handle}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("<Code>ReceiptHandleIsInvalid</Code>"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn long_poll_completes_shortly_after_send() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    let started = std::time::Instant::now();
    let receiver = {
        let app = app.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            call(
                &app,
                format!("Action=ReceiveMessage&QueueUrl={url}&WaitTimeSeconds=2"),
            )
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=late"),
    )
    .await;

    let (status, body) = receiver.await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(extract(&body, "Body").as_deref(), Some("late"));
    assert!(
        elapsed < Duration::from_millis(700),
        "long poll should complete promptly after the send, took {elapsed:?}"
    );

    dispatcher.shutdown();
}

#[tokio::test]
async fn empty_long_poll_returns_near_deadline() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    let started = std::time::Instant::now();
    let (status, body) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&WaitTimeSeconds=2"),
    )
    .await;
    let elapsed = started.elapsed();
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<ReceiveMessageResult/>"));
    assert!(elapsed >= Duration::from_millis(1_950), "too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2_500), "too late: {elapsed:?}");

    dispatcher.shutdown();
}

#[tokio::test]
async fn message_attributes_round_trip_with_digest() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    let (status, sent) = call(
        &app,
        format!(
            "Action=SendMessage&QueueUrl={url}&MessageBody=hello\
             &MessageAttribute.1.Name=color&MessageAttribute.1.Value.DataType=String\
             &MessageAttribute.1.Value.StringValue=red"
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sent_digest = extract(&sent, "MD5OfMessageAttributes").unwrap();
    assert_eq!(sent_digest.len(), 32);

    let (_, received) = call(
        &app,
        format!("Action=ReceiveMessage&QueueUrl={url}&MessageAttributeName.1=All"),
    )
    .await;
    assert!(received.contains("<Name>color</Name>"));
    assert!(received.contains("<StringValue>red</StringValue>"));
    assert_eq!(
        extract(&received, "MD5OfMessageAttributes").as_deref(),
        Some(sent_digest.as_str())
    );

    dispatcher.shutdown();
}

#[tokio::test]
async fn queue_lifecycle_and_listing() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=orders".into()).await;
    call(&app, "Action=CreateQueue&QueueName=orders-dlq".into()).await;
    call(&app, "Action=CreateQueue&QueueName=billing".into()).await;

    let (_, listing) = call(&app, "Action=ListQueues&QueueNamePrefix=orders".into()).await;
    let urls = extract_all(&listing, "QueueUrl");
    assert_eq!(urls.len(), 2);

    let (_, url_body) = call(&app, "Action=GetQueueUrl&QueueName=billing".into()).await;
    let url = extract(&url_body, "QueueUrl").unwrap();

    let (status, _) = call(&app, format!("Action=DeleteQueue&QueueUrl={url}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "Action=GetQueueUrl&QueueName=billing".into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("NonExistentQueue"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn create_queue_conflict_on_changed_attributes() {
    let (app, _mgr, dispatcher) = build_app();

    call(
        &app,
        "Action=CreateQueue&QueueName=q1\
         &Attribute.1.Name=VisibilityTimeout&Attribute.1.Value=30"
            .into(),
    )
    .await;

    // Identical attributes: idempotent success.
    let (status, _) = call(
        &app,
        "Action=CreateQueue&QueueName=q1\
         &Attribute.1.Name=VisibilityTimeout&Attribute.1.Value=30"
            .into(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "Action=CreateQueue&QueueName=q1\
         &Attribute.1.Name=VisibilityTimeout&Attribute.1.Value=60"
            .into(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("<Code>QueueAlreadyExists</Code>"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn purge_empties_queue() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";
    for i in 0..3 {
        call(
            &app,
            format!("Action=SendMessage&QueueUrl={url}&MessageBody=m{i}"),
        )
        .await;
    }

    let (status, _) = call(&app, format!("Action=PurgeQueue&QueueUrl={url}")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, attrs) = call(
        &app,
        format!(
            "Action=GetQueueAttributes&QueueUrl={url}&AttributeName.1=ApproximateNumberOfMessages"
        ),
    )
    .await;
    assert!(attrs.contains("<Value>0</Value>"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn send_message_batch_reports_entries_independently() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";

    let (status, body) = call(
        &app,
        format!(
            "Action=SendMessageBatch&QueueUrl={url}\
             &SendMessageBatchRequestEntry.1.Id=ok\
             &SendMessageBatchRequestEntry.1.MessageBody=fine\
             &SendMessageBatchRequestEntry.2.Id=bad\
             &SendMessageBatchRequestEntry.2.MessageBody=x\
             &SendMessageBatchRequestEntry.2.MessageGroupId=g"
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Id>ok</Id>"));
    assert!(body.contains("<BatchResultErrorEntry>"));
    assert!(body.contains("<Code>InvalidParameterValue</Code>"));

    let (status, body) = call(
        &app,
        format!(
            "Action=DeleteMessageBatch&QueueUrl={url}\
             &DeleteMessageBatchRequestEntry.1.Id=dup\
             &DeleteMessageBatchRequestEntry.1.ReceiptHandle=r1\
             &DeleteMessageBatchRequestEntry.2.Id=dup\
             &DeleteMessageBatchRequestEntry.2.ReceiptHandle=r2"
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("BatchEntryIdsNotDistinct"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn change_visibility_zero_makes_message_receivable() {
    let (app, _mgr, dispatcher) = build_app();

    call(&app, "Action=CreateQueue&QueueName=q1".into()).await;
    let url = "http://localhost:9324/000000000000/q1";
    call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody=m"),
    )
    .await;

    let (_, first) = call(&app, format!("Action=ReceiveMessage&QueueUrl={url}")).await;
    let handle = extract(&first, "ReceiptHandle").unwrap();

    let (status, _) = call(
        &app,
        format!(
            "Action=ChangeMessageVisibility&QueueUrl={url}&ReceiptHandle={handle}&VisibilityTimeout=0"
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, again) = call(&app, format!("Action=ReceiveMessage&QueueUrl={url}")).await;
    assert_eq!(extract(&again, "MessageId"), extract(&first, "MessageId"));

    dispatcher.shutdown();
}

#[tokio::test]
async fn oversize_message_rejected_with_message_too_long() {
    let (app, _mgr, dispatcher) = build_app();

    call(
        &app,
        "Action=CreateQueue&QueueName=q1\
         &Attribute.1.Name=MaximumMessageSize&Attribute.1.Value=1024"
            .into(),
    )
    .await;
    let url = "http://localhost:9324/000000000000/q1";

    let body_ok = "x".repeat(1_024);
    let (status, _) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody={body_ok}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body_over = "x".repeat(1_025);
    let (status, body) = call(
        &app,
        format!("Action=SendMessage&QueueUrl={url}&MessageBody={body_over}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("<Code>MessageTooLong</Code>"));

    dispatcher.shutdown();
}
