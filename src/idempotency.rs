//! Idempotency keys. Each is derived only from inputs that stay the same when
//! the same logical unit of work is retried; the event id never takes part.

pub fn file_key(payload_sha256_hex: &str) -> String {
    payload_sha256_hex.to_string()
}

pub fn http_key(dataset: &str, endpoint: &str, cursor: Option<&str>) -> String {
    let mut s = format!("ingest-http:{}:{}", dataset, endpoint);
    if let Some(c) = cursor {
        s.push_str(":cursor=");
        s.push_str(c);
    }
    s
}

pub fn stream_key(topic: &str, partition: i32, offset: i64) -> String {
    format!("ingest-stream:{}:{}:{}", topic, partition, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_key_appends_cursor_only_when_present() {
        assert_eq!(
            http_key("merchants", "https://api.local/m", None),
            "ingest-http:merchants:https://api.local/m"
        );
        assert_eq!(
            http_key("merchants", "https://api.local/m", Some("p2")),
            "ingest-http:merchants:https://api.local/m:cursor=p2"
        );
    }

    #[test]
    fn stream_key_uses_source_coordinates() {
        assert_eq!(stream_key("source.posts.v1", 0, 42), "ingest-stream:source.posts.v1:0:42");
    }
}
