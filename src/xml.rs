//! XML rendering for Query-protocol responses.

use std::collections::HashMap;

use crate::types::{
    BatchOutcome, ReceivedMessage, SendMessageBatchResultEntry, SendResult,
};

const XMLNS: &str = "http://queue.amazonaws.com/doc/2012-11-05/";

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn metadata() -> String {
    format!(
        "  <ResponseMetadata>\n    <RequestId>{}</RequestId>\n  </ResponseMetadata>",
        request_id()
    )
}

pub fn format_error(code: &str, message: &str, sender_fault: bool) -> String {
    let fault_type = if sender_fault { "Sender" } else { "Receiver" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ErrorResponse xmlns="{XMLNS}">
  <Error>
    <Type>{fault_type}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
        xml_escape(code),
        xml_escape(message),
        request_id()
    )
}

/// Response document for actions whose result carries no payload
/// (DeleteQueue, SetQueueAttributes, PurgeQueue, DeleteMessage,
/// ChangeMessageVisibility).
pub fn format_empty(action: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{action}Response xmlns=\"{XMLNS}\">\n{}\n</{action}Response>",
        metadata()
    )
}

pub fn format_create_queue(queue_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<CreateQueueResponse xmlns="{XMLNS}">
  <CreateQueueResult>
    <QueueUrl>{}</QueueUrl>
  </CreateQueueResult>
{}
</CreateQueueResponse>"#,
        xml_escape(queue_url),
        metadata()
    )
}

pub fn format_get_queue_url(queue_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<GetQueueUrlResponse xmlns="{XMLNS}">
  <GetQueueUrlResult>
    <QueueUrl>{}</QueueUrl>
  </GetQueueUrlResult>
{}
</GetQueueUrlResponse>"#,
        xml_escape(queue_url),
        metadata()
    )
}

pub fn format_list_queues(queue_urls: &[String]) -> String {
    let urls: String = queue_urls
        .iter()
        .map(|url| format!("    <QueueUrl>{}</QueueUrl>", xml_escape(url)))
        .collect::<Vec<_>>()
        .join("\n");
    let result = if urls.is_empty() {
        "  <ListQueuesResult/>".to_string()
    } else {
        format!("  <ListQueuesResult>\n{urls}\n  </ListQueuesResult>")
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListQueuesResponse xmlns=\"{XMLNS}\">\n{result}\n{}\n</ListQueuesResponse>",
        metadata()
    )
}

pub fn format_get_queue_attributes(attributes: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();
    let entries: String = names
        .iter()
        .map(|name| {
            format!(
                "    <Attribute>\n      <Name>{}</Name>\n      <Value>{}</Value>\n    </Attribute>",
                xml_escape(name),
                xml_escape(&attributes[*name])
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let result = if entries.is_empty() {
        "  <GetQueueAttributesResult/>".to_string()
    } else {
        format!("  <GetQueueAttributesResult>\n{entries}\n  </GetQueueAttributesResult>")
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<GetQueueAttributesResponse xmlns=\"{XMLNS}\">\n{result}\n{}\n</GetQueueAttributesResponse>",
        metadata()
    )
}

fn send_result_fields(result: &SendResult, indent: &str) -> String {
    let mut fields = vec![
        format!("{indent}<MessageId>{}</MessageId>", result.message_id),
        format!(
            "{indent}<MD5OfMessageBody>{}</MD5OfMessageBody>",
            result.md5_of_body
        ),
    ];
    if let Some(ref md5) = result.md5_of_attributes {
        fields.push(format!(
            "{indent}<MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>"
        ));
    }
    if let Some(ref seq) = result.sequence_number {
        fields.push(format!("{indent}<SequenceNumber>{seq}</SequenceNumber>"));
    }
    fields.join("\n")
}

pub fn format_send_message(result: &SendResult) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<SendMessageResponse xmlns=\"{XMLNS}\">\n  <SendMessageResult>\n{}\n  </SendMessageResult>\n{}\n</SendMessageResponse>",
        send_result_fields(result, "    "),
        metadata()
    )
}

fn batch_error_entries(outcome_failed: &[crate::types::BatchEntryError]) -> String {
    outcome_failed
        .iter()
        .map(|err| {
            format!(
                "    <BatchResultErrorEntry>\n      <Id>{}</Id>\n      <Code>{}</Code>\n      <Message>{}</Message>\n      <SenderFault>{}</SenderFault>\n    </BatchResultErrorEntry>",
                xml_escape(&err.id),
                xml_escape(&err.code),
                xml_escape(&err.message),
                err.sender_fault
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_send_message_batch(outcome: &BatchOutcome<SendMessageBatchResultEntry>) -> String {
    let mut entries: Vec<String> = outcome
        .successful
        .iter()
        .map(|entry| {
            format!(
                "    <SendMessageBatchResultEntry>\n      <Id>{}</Id>\n{}\n    </SendMessageBatchResultEntry>",
                xml_escape(&entry.id),
                send_result_fields(&entry.result, "      ")
            )
        })
        .collect();
    if !outcome.failed.is_empty() {
        entries.push(batch_error_entries(&outcome.failed));
    }
    let body = entries.join("\n");
    let result = if body.is_empty() {
        "  <SendMessageBatchResult/>".to_string()
    } else {
        format!("  <SendMessageBatchResult>\n{body}\n  </SendMessageBatchResult>")
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<SendMessageBatchResponse xmlns=\"{XMLNS}\">\n{result}\n{}\n</SendMessageBatchResponse>",
        metadata()
    )
}

pub fn format_receive_message(messages: &[ReceivedMessage]) -> String {
    let rendered: String = messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n");
    let result = if rendered.is_empty() {
        "  <ReceiveMessageResult/>".to_string()
    } else {
        format!("  <ReceiveMessageResult>\n{rendered}\n  </ReceiveMessageResult>")
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ReceiveMessageResponse xmlns=\"{XMLNS}\">\n{result}\n{}\n</ReceiveMessageResponse>",
        metadata()
    )
}

fn render_message(msg: &ReceivedMessage) -> String {
    let mut parts = vec![
        format!("      <MessageId>{}</MessageId>", msg.message_id),
        format!(
            "      <ReceiptHandle>{}</ReceiptHandle>",
            xml_escape(&msg.receipt_handle)
        ),
        format!("      <MD5OfBody>{}</MD5OfBody>", msg.md5_of_body),
        format!("      <Body>{}</Body>", xml_escape(&msg.body)),
    ];

    let mut attr_names: Vec<&String> = msg.system_attributes.keys().collect();
    attr_names.sort();
    for name in attr_names {
        parts.push(format!(
            "      <Attribute>\n        <Name>{}</Name>\n        <Value>{}</Value>\n      </Attribute>",
            xml_escape(name),
            xml_escape(&msg.system_attributes[name])
        ));
    }

    if let Some(ref md5) = msg.md5_of_attributes {
        parts.push(format!(
            "      <MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>"
        ));
    }

    let mut msg_attr_names: Vec<&String> = msg.message_attributes.keys().collect();
    msg_attr_names.sort();
    for name in msg_attr_names {
        let attr = &msg.message_attributes[name];
        let value = if attr.is_binary() {
            format!(
                "          <BinaryValue>{}</BinaryValue>",
                xml_escape(attr.binary_value.as_deref().unwrap_or_default())
            )
        } else {
            format!(
                "          <StringValue>{}</StringValue>",
                xml_escape(attr.string_value.as_deref().unwrap_or_default())
            )
        };
        parts.push(format!(
            "      <MessageAttribute>\n        <Name>{}</Name>\n        <Value>\n          <DataType>{}</DataType>\n{value}\n        </Value>\n      </MessageAttribute>",
            xml_escape(name),
            xml_escape(&attr.data_type)
        ));
    }

    format!("    <Message>\n{}\n    </Message>", parts.join("\n"))
}

/// Batch responses whose per-entry success carries only the entry id
/// (DeleteMessageBatch, ChangeMessageVisibilityBatch).
pub fn format_id_batch(action: &str, outcome: &BatchOutcome<String>) -> String {
    let mut entries: Vec<String> = outcome
        .successful
        .iter()
        .map(|id| {
            format!(
                "    <{action}ResultEntry>\n      <Id>{}</Id>\n    </{action}ResultEntry>",
                xml_escape(id)
            )
        })
        .collect();
    if !outcome.failed.is_empty() {
        entries.push(batch_error_entries(&outcome.failed));
    }
    let body = entries.join("\n");
    let result = if body.is_empty() {
        format!("  <{action}Result/>")
    } else {
        format!("  <{action}Result>\n{body}\n  </{action}Result>")
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{action}Response xmlns=\"{XMLNS}\">\n{result}\n{}\n</{action}Response>",
        metadata()
    )
}
