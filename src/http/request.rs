use std::collections::HashMap;
use std::fmt;

/// A request method.
///
/// The gateway never interprets the method; it is copied onto the upstream
/// request as-is. Methods outside the common set are kept verbatim in
/// `Extension`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
    Extension(String),
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::PATCH,
    ];

    /// Parses a request-line method token. Tokens are case-sensitive, so
    /// `get` is an extension method distinct from `GET`.
    ///
    /// Returns `None` only when `token` is not a valid HTTP token.
    ///
    /// ```
    /// # use waypoint::http::request::Method;
    /// assert_eq!(Method::from_str("DELETE"), Some(Method::DELETE));
    /// assert_eq!(Method::from_str("PURGE"), Some(Method::Extension("PURGE".into())));
    /// assert_eq!(Method::from_str("GE T"), None);
    /// ```
    pub fn from_str(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(is_token_char) {
            return None;
        }

        let known = Self::ALL.into_iter().find(|m| m.as_str() == token);
        Some(known.unwrap_or_else(|| Method::Extension(token.to_string())))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(token) => token,
        }
    }
}

/// `tchar` from RFC 9110
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request read from a client connection.
///
/// Owned by the connection task and dropped once its response is written.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request-target as sent, query string included
    pub path: String,
    pub version: String,
    /// Header names keep the client's spelling; look them up with `header`
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// An HTTP/1.1 request with no headers and an empty body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Retrieves a header value by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length; 0 when absent or unparseable
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Media type of the body without parameters, lowercased
    /// (`"application/x-www-form-urlencoded; charset=UTF-8"` gives
    /// `"application/x-www-form-urlencoded"`).
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// The path component of the request-target, without the query string
    /// or fragment.
    pub fn path_only(&self) -> &str {
        let end = self.path.find(['?', '#']).unwrap_or(self.path.len());
        &self.path[..end]
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent.
    /// HTTP/1.0 requires an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }
}
