//! Query-string parameters
//!
//! OpenTSDB repeats parameters (`m=...&m=...`), so the query string is
//! extracted as an ordered list of pairs rather than a map.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, Uri},
};
use std::str::FromStr;

use crate::api::error::{ApiError, ApiResult};

/// Decoded query-string parameters in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// Decode the query string of `uri`
    pub fn from_uri(uri: &Uri) -> ApiResult<Self> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|e| ApiError::Validation(e.body_text()))?;
        Ok(Self(pairs))
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order
    pub fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// True when `name` is set to `true`
    pub fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    /// True when `name` is present with any value other than `false`
    pub fn present(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v != "false")
    }

    /// Parse the first value for `name`
    pub fn parse_value<T: FromStr>(&self, name: &str) -> ApiResult<Option<T>> {
        self.get(name)
            .map(|v| {
                v.parse().map_err(|_| {
                    ApiError::Validation(format!("Invalid value for '{}': {}", name, v))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;
        Ok(Self(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(uri: &'static str) -> QueryParams {
        QueryParams::from_uri(&Uri::from_static(uri)).unwrap()
    }

    #[test]
    fn test_repeated_and_encoded() {
        let params = params("/api/query?start=1m-ago&m=sum:cpu%7Bhost%3D*%7D&m=avg:mem&arrays=true&ms");
        assert_eq!(params.get("start"), Some("1m-ago"));
        assert_eq!(params.all("m"), vec!["sum:cpu{host=*}", "avg:mem"]);
        assert!(params.flag("arrays"));
        assert!(!params.flag("ms"));
        assert!(params.present("ms"));
        assert!(!params.present("show_query"));
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let params = params("/api/suggest?q=a+b&type=metrics");
        assert_eq!(params.get("q"), Some("a b"));
        assert_eq!(params.get("type"), Some("metrics"));
    }

    #[test]
    fn test_parse_value() {
        let params = params("/api/suggest?max=10&limit=x");
        assert_eq!(params.parse_value::<usize>("max").unwrap(), Some(10));
        assert_eq!(params.parse_value::<usize>("other").unwrap(), None);
        assert!(params.parse_value::<usize>("limit").is_err());
    }

    #[test]
    fn test_no_query_string() {
        let params = params("/api/query");
        assert!(params.all("m").is_empty());
        assert_eq!(params, QueryParams::default());
    }
}
