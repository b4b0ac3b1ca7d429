//! Form field extraction and re-encoding
//!
//! The gateway does not forward request bodies byte for byte. It parses the
//! inbound body as form fields, either URL-encoded or the text parts of
//! `multipart/form-data`, and sends the upstream a fresh URL-encoding of
//! those fields. File parts and non-form bodies contribute no fields.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream;
use multer::Multipart;
use url::form_urlencoded;

use crate::http::request::Request;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Ordered form fields with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    /// Parse a URL-encoded body.
    ///
    /// Parsing is lenient: malformed escapes are kept literally and pairs
    /// without `=` get an empty value. A repeated name keeps the position of
    /// its first occurrence and the value of its last.
    pub fn parse(body: &[u8]) -> Self {
        let mut fields = Self::default();

        for (name, value) in form_urlencoded::parse(body) {
            fields.insert(name.into_owned(), value.into_owned());
        }

        fields
    }

    /// Text fields of a `multipart/form-data` body.
    ///
    /// `content_type` is the full header value carrying the boundary. Parts
    /// with a filename are skipped. A malformed body yields the fields read
    /// before the damage.
    pub async fn parse_multipart(content_type: &str, body: &[u8]) -> Self {
        let mut fields = Self::default();

        let boundary = match multer::parse_boundary(content_type) {
            Ok(boundary) => boundary,
            Err(e) => {
                tracing::debug!(error = %e, "Multipart body without a usable boundary");
                return fields;
            }
        };

        let chunk = Bytes::copy_from_slice(body);
        let mut multipart = Multipart::new(stream::iter([Ok::<_, Infallible>(chunk)]), boundary);

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Stopped reading malformed multipart body");
                    break;
                }
            };

            if field.file_name().is_some() {
                continue;
            }
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.text().await {
                Ok(value) => fields.insert(name, value),
                Err(e) => {
                    tracing::debug!(error = %e, field = %name, "Unreadable multipart field");
                    break;
                }
            }
        }

        fields
    }

    /// Fields of a request whose body is declared as a form, URL-encoded or
    /// multipart. Any other body has no fields.
    pub async fn from_request(request: &Request) -> Self {
        match request.content_type().as_deref() {
            Some(FORM_CONTENT_TYPE) => Self::parse(&request.body),
            Some(MULTIPART_CONTENT_TYPE) => {
                let content_type = request.header("Content-Type").unwrap_or_default();
                Self::parse_multipart(content_type, &request.body).await
            }
            _ => Self::default(),
        }
    }

    /// Empty names are dropped; a repeat overwrites the earlier value in place
    fn insert(&mut self, name: String, value: String) {
        if name.is_empty() {
            return;
        }

        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Serialize as `application/x-www-form-urlencoded` (spaces become `+`)
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
