use http::Uri;
use pingora_http::RequestHeader;
use std::collections::HashMap;

pub fn query_to_map(uri: &Uri) -> HashMap<String, String> {
    let mut map = HashMap::new();

    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            let mut kv = pair.splitn(2, '=');
            if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }

    map
}

/// A request header as UTF-8, `None` when absent or not valid text.
pub fn header_str<'a>(header: &'a RequestHeader, name: &str) -> Option<&'a str> {
    header.headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_map_splits_pairs() {
        let uri: Uri = "/mcp/virtual-mcp/v1?mode=smart&session_id=abc"
            .parse()
            .unwrap();
        let map = query_to_map(&uri);
        assert_eq!(map.get("mode").map(String::as_str), Some("smart"));
        assert_eq!(map.get("session_id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn query_map_empty_without_query() {
        let uri: Uri = "/mcp/virtual-mcp/v1".parse().unwrap();
        assert!(query_to_map(&uri).is_empty());
    }
}
