//! Request parameters: query strings and bodies
//!
//! A [`Parameters`] value decides how a request's inputs reach the wire: appended
//! to the URL, encoded as a form or JSON body, or passed through as raw bytes. It
//! may also override the requested method (a body never travels with GET).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::Method;

/// Inputs of a request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Parameters {
    /// No parameters
    #[default]
    None,
    /// Pairs appended to the URL query
    Query(Vec<(String, String)>),
    /// `application/x-www-form-urlencoded` body
    Form(Vec<(String, String)>),
    /// `application/json` body
    Json(serde_json::Value),
    /// Raw body with an explicit content type
    Data {
        /// Value of the Content-Type header
        content_type: String,
        /// Body bytes
        #[serde(with = "bytes_serde")]
        body: Bytes,
    },
}

impl Parameters {
    /// Build query parameters from pairs
    pub fn query<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Parameters::Query(collect_pairs(pairs))
    }

    /// Build form parameters from pairs
    pub fn form<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Parameters::Form(collect_pairs(pairs))
    }

    /// Whether these parameters produce a request body
    pub fn has_body(&self) -> bool {
        matches!(
            self,
            Parameters::Form(_) | Parameters::Json(_) | Parameters::Data { .. }
        )
    }

    /// Method actually used for a request asking for `requested`
    ///
    /// GET cannot carry a body, so body-carrying parameters promote it to POST.
    pub fn normalized_method(&self, requested: Method) -> Method {
        if requested == Method::Get && self.has_body() {
            Method::Post
        } else {
            requested
        }
    }

    /// Percent-encoded query (without the leading `?`); empty when not a query
    pub fn query_string(&self) -> String {
        match self {
            Parameters::Query(pairs) => encode_pairs(pairs),
            _ => String::new(),
        }
    }

    /// Encoded request body, if any
    pub fn body_bytes(&self) -> Option<Bytes> {
        match self {
            Parameters::None | Parameters::Query(_) => None,
            Parameters::Form(pairs) => Some(Bytes::from(encode_pairs(pairs))),
            Parameters::Json(value) => Some(Bytes::from(value.to_string())),
            Parameters::Data { body, .. } => Some(body.clone()),
        }
    }

    /// Content-Type header describing [`Parameters::body_bytes`]
    pub fn content_type_header(&self) -> Option<(&'static str, String)> {
        let value = match self {
            Parameters::None | Parameters::Query(_) => return None,
            Parameters::Form(_) => "application/x-www-form-urlencoded".to_string(),
            Parameters::Json(_) => "application/json".to_string(),
            Parameters::Data { content_type, .. } => content_type.clone(),
        };
        Some(("Content-Type", value))
    }
}

impl std::fmt::Display for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parameters::None => f.write_str("None"),
            Parameters::Query(pairs) => write!(f, "?{}", encode_pairs(pairs)),
            Parameters::Form(pairs) => write!(f, "form({})", encode_pairs(pairs)),
            Parameters::Json(value) => write!(f, "json({value})"),
            Parameters::Data { content_type, body } => {
                write!(f, "data({} bytes of {content_type})", body.len())
            }
        }
    }
}

fn collect_pairs<K: Into<String>, V: Into<String>>(
    pairs: impl IntoIterator<Item = (K, V)>,
) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

mod bytes_serde {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<u8>::deserialize(deserializer)?;
        Ok(Bytes::from(raw))
    }
}
