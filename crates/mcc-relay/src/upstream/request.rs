//! Decrypted device requests.

use serde::Serialize;
use serde_json::{Map, Value};

/// A device's request to the internal API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    /// Upper-case HTTP method.
    pub method: String,
    pub url: String,
    pub headers: Map<String, Value>,
    pub data: Option<Value>,
}

impl ApiRequest {
    /// Interpret a decrypted payload.
    ///
    /// The method is read from `type`, then `method`, defaulting to GET. The
    /// request data is read from `data`, then `params`.
    pub fn from_payload(payload: Value) -> Result<Self, String> {
        let Value::Object(mut fields) = payload else {
            return Err("request payload is not a JSON object".into());
        };

        let method = [fields.get("type"), fields.get("method")]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str().filter(|m| !m.is_empty()))
            .unwrap_or("GET")
            .to_ascii_uppercase();

        let url = match fields.remove("url") {
            Some(Value::String(url)) if !url.is_empty() => url,
            _ => return Err("request has no url".into()),
        };

        let headers = match fields.remove("headers") {
            Some(Value::Object(headers)) => headers,
            _ => Map::new(),
        };

        let data = fields
            .remove("data")
            .filter(|v| !v.is_null())
            .or_else(|| fields.remove("params").filter(|v| !v.is_null()));

        Ok(Self {
            method,
            url,
            headers,
            data,
        })
    }

    /// GET calls need no session token.
    pub fn is_idempotent(&self) -> bool {
        self.method == "GET"
    }

    /// The `_request` echo attached to passed-through application errors.
    pub fn echo(&self) -> Value {
        serde_json::json!({
            "data": self.data.clone().unwrap_or(Value::Null),
            "method": self.method,
            "uri": self.url,
        })
    }
}

/// One call to perform: the request plus the credentials to send with it.
#[derive(Debug, Clone, Copy)]
pub struct ApiCall<'a> {
    pub request: &'a ApiRequest,
    /// `relay@@@<shared secret>@@@<site user>`.
    pub authorization: &'a str,
    /// Session token for non-idempotent calls.
    pub csrf_token: Option<&'a str>,
}

/// Build the relay authorization header value for a site user.
pub fn relay_authorization(shared_secret: &str, site_user: &str) -> String {
    format!("relay@@@{shared_secret}@@@{site_user}")
}
