//! Default request construction

use super::Connection;
use crate::transport::HttpRequest;

impl Connection {
    /// Request that `start()` would submit right now
    ///
    /// An explicit request from [`Connection::set_request`] is returned as is.
    /// Otherwise the request is derived from the URL plus the parameter query, the
    /// headers (engine defaults unless set explicitly), the parameter body with
    /// its content type, and the caching policy.
    pub fn current_request(&self) -> HttpRequest {
        let (explicit, headers, caching_policy) = {
            let lifecycle = self.lock();
            (
                lifecycle.request.clone(),
                lifecycle.headers.clone(),
                lifecycle.caching_policy,
            )
        };
        if let Some(request) = explicit {
            return request;
        }

        let parameters = self.parameters();
        let mut url = self.url().clone();
        let query = parameters.query_string();
        if !query.is_empty() {
            let merged = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
                _ => query,
            };
            url.set_query(Some(&merged));
        }

        let mut request = HttpRequest::new(self.method(), url);
        request.headers =
            headers.unwrap_or_else(|| self.plug().config().default_headers.clone());
        if let Some((name, value)) = parameters.content_type_header()
            && !request.headers.contains(name)
        {
            request.headers.append(name, value);
        }
        request.body = parameters.body_bytes();
        request.caching_policy = caching_policy;
        request
    }
}

#[cfg(test)]
mod tests {
    use crate::headers::Headers;
    use crate::manager::test_helpers::create_test_plug;
    use crate::parameters::Parameters;
    use crate::transport::HttpRequest;
    use crate::types::{CachingPolicy, Method};

    #[tokio::test]
    async fn test_query_parameters_are_appended() {
        let (plug, _fake, _dir) = create_test_plug().await;
        let conn = plug
            .try_request(
                Method::Get,
                "http://example.test/search?lang=en",
                Parameters::query([("q", "rust lang")]),
            )
            .unwrap();

        let request = conn.current_request();
        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.url.as_str(),
            "http://example.test/search?lang=en&q=rust%20lang"
        );
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_default_headers_apply_until_set() {
        let (plug, _fake, _dir) = create_test_plug().await;
        let conn = plug
            .try_request(Method::Get, "http://example.test/", Parameters::None)
            .unwrap();

        let request = conn.current_request();
        assert_eq!(request.headers.get("Accept"), Some("application/json"));

        conn.add_header("X-Api-Key", "secret").unwrap();
        let request = conn.current_request();
        // Explicit headers replace the defaults entirely
        assert_eq!(request.headers.get("Accept"), None);
        assert_eq!(request.headers.get("X-Api-Key"), Some("secret"));
    }

    #[tokio::test]
    async fn test_json_body_promotes_get_and_sets_content_type() {
        let (plug, _fake, _dir) = create_test_plug().await;
        let conn = plug
            .try_request(
                Method::Get,
                "http://example.test/items",
                Parameters::Json(serde_json::json!({"name": "plug"})),
            )
            .unwrap();
        conn.set_caching_policy(CachingPolicy::ReloadIgnoringLocalCacheData)
            .unwrap();

        let request = conn.current_request();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&br#"{"name":"plug"}"#[..]));
        assert_eq!(request.caching_policy, CachingPolicy::ReloadIgnoringLocalCacheData);
    }

    #[tokio::test]
    async fn test_explicit_content_type_is_kept() {
        let (plug, _fake, _dir) = create_test_plug().await;
        let conn = plug
            .try_request(
                Method::Post,
                "http://example.test/items",
                Parameters::form([("a", "1")]),
            )
            .unwrap();
        let mut headers = Headers::new();
        headers.append("Content-Type", "application/x-custom");
        conn.set_headers(headers).unwrap();

        let request = conn.current_request();
        let values: Vec<_> = request
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(values, vec![("Content-Type", "application/x-custom")]);
    }

    #[tokio::test]
    async fn test_explicit_request_overrides_construction() {
        let (plug, _fake, _dir) = create_test_plug().await;
        let conn = plug
            .try_request(Method::Get, "http://example.test/a", Parameters::None)
            .unwrap();
        let custom = HttpRequest::new(
            Method::Delete,
            url::Url::parse("http://other.test/b").unwrap(),
        );
        conn.set_request(custom.clone()).unwrap();

        assert_eq!(conn.current_request(), custom);
    }
}
