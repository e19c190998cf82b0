//! Request descriptor: the endpoint name and flattened parameters a cache
//! decision is made on.

use std::collections::BTreeMap;

/// Parameters of a request, ordered by name.
pub type Params = BTreeMap<String, String>;

/// Immutable view of a request as seen by the cache policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    endpoint: String,
    params: Params,
}

impl RequestDescriptor {
    pub fn new(endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
        }
    }

    /// Build a descriptor from a request path, its raw query string and the
    /// route parameters captured by the router.
    ///
    /// Route parameters override query parameters of the same name; for a
    /// repeated query key the last occurrence wins.
    pub fn from_request<'a, I>(path: &str, query: Option<&str>, route_params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = query.map(parse_query).unwrap_or_default();
        for (name, value) in route_params {
            params.insert(name.to_string(), value.to_string());
        }
        Self::new(endpoint_from_path(path), params)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Look up a parameter, treating empty values as absent.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Map a request path to its endpoint name.
///
/// The endpoint is the final non-empty path segment, so `/v1/search` and
/// `/v1/search/structured` map to `search` and `structured`. The name drives
/// both key namespacing and TTL category dispatch.
pub fn endpoint_from_path(path: &str) -> &str {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}

fn parse_query(query: &str) -> Params {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_last_segment() {
        assert_eq!(endpoint_from_path("/v1/search"), "search");
        assert_eq!(endpoint_from_path("/v1/search/structured"), "structured");
        assert_eq!(endpoint_from_path("/v1/reverse/"), "reverse");
        assert_eq!(endpoint_from_path("/"), "");
    }

    #[test]
    fn query_is_decoded() {
        let descriptor = RequestDescriptor::from_request("/v1/search", Some("text=main+st"), []);
        assert_eq!(descriptor.endpoint(), "search");
        assert_eq!(descriptor.param("text"), Some("main st"));
    }

    #[test]
    fn route_params_override_query() {
        let descriptor = RequestDescriptor::from_request(
            "/v1/place/abc",
            Some("id=from-query&lang=en"),
            [("id", "from-route")],
        );
        assert_eq!(descriptor.param("id"), Some("from-route"));
        assert_eq!(descriptor.param("lang"), Some("en"));
    }

    #[test]
    fn repeated_query_key_keeps_last() {
        let descriptor = RequestDescriptor::from_request("/v1/search", Some("size=5&size=10"), []);
        assert_eq!(descriptor.param("size"), Some("10"));
    }

    #[test]
    fn empty_values_read_as_absent() {
        let descriptor = RequestDescriptor::from_request("/v1/search", Some("postalcode="), []);
        assert!(descriptor.params().contains_key("postalcode"));
        assert_eq!(descriptor.param("postalcode"), None);
    }
}
