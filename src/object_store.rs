use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;

use crate::error::MmitError;
use crate::http;
use crate::session::StoreSession;

pub trait ObjectStoreClient: Send + Sync {
    /// Fetches one object. A missing object is `MmitError::ObjectNotFound`.
    fn get(&self, store: &str, prefix: &str, file_name: &str) -> Result<Vec<u8>, MmitError>;

    /// Lists object keys in `store` starting with `prefix_filter`.
    fn list(&self, store: &str, prefix_filter: &str) -> Result<Vec<String>, MmitError>;
}

impl<T: ObjectStoreClient + ?Sized> ObjectStoreClient for &T {
    fn get(&self, store: &str, prefix: &str, file_name: &str) -> Result<Vec<u8>, MmitError> {
        (**self).get(store, prefix, file_name)
    }

    fn list(&self, store: &str, prefix_filter: &str) -> Result<Vec<String>, MmitError> {
        (**self).list(store, prefix_filter)
    }
}

/// Path-style S3-compatible client over plain HTTP.
///
/// Requests are not signed: this works against public buckets and gateways
/// that authorize on their own. Credentials stay in the [`StoreSession`].
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
}

impl HttpObjectStore {
    pub fn connect(session: &StoreSession) -> Result<Self, MmitError> {
        let endpoint = Url::parse(session.endpoint())
            .map_err(|err| MmitError::StoreHttp(format!("invalid endpoint: {err}")))?;
        let client = http::build_client(Duration::from_secs(120)).map_err(MmitError::StoreHttp)?;
        Ok(Self { client, endpoint })
    }

    fn object_url(&self, store: &str, key: &str) -> Result<Url, MmitError> {
        let mut url = self.bucket_url(store)?;
        url.path_segments_mut()
            .map_err(|_| MmitError::StoreHttp("endpoint cannot be a base URL".to_string()))?
            .extend(key.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn bucket_url(&self, store: &str) -> Result<Url, MmitError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| MmitError::StoreHttp("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(store);
        Ok(url)
    }
}

impl ObjectStoreClient for HttpObjectStore {
    fn get(&self, store: &str, prefix: &str, file_name: &str) -> Result<Vec<u8>, MmitError> {
        let key = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        };
        let url = self.object_url(store, &key)?;
        let response = http::send_with_retries(|| self.client.get(url.clone()))
            .map_err(|err| MmitError::StoreHttp(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MmitError::ObjectNotFound(format!("{store}/{key}")));
        }
        if !response.status().is_success() {
            let (status, message) = http::failure(response, "object store request failed");
            return Err(MmitError::StoreStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| MmitError::StoreHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn list(&self, store: &str, prefix_filter: &str) -> Result<Vec<String>, MmitError> {
        let url = self.bucket_url(store)?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let response = http::send_with_retries(|| {
                let mut request = self
                    .client
                    .get(url.clone())
                    .query(&[("list-type", "2"), ("prefix", prefix_filter)]);
                if let Some(token) = &token {
                    request = request.query(&[("continuation-token", token.as_str())]);
                }
                request
            })
            .map_err(|err| MmitError::StoreHttp(err.to_string()))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(MmitError::ObjectNotFound(store.to_string()));
            }
            if !response.status().is_success() {
                let (status, message) = http::failure(response, "object store listing failed");
                return Err(MmitError::StoreStatus { status, message });
            }
            let body = response
                .text()
                .map_err(|err| MmitError::StoreHttp(err.to_string()))?;
            let page = parse_list_page(&body);
            keys.extend(page.keys);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// Extracts keys and pagination state from a ListObjectsV2 XML body.
pub fn parse_list_page(body: &str) -> ListPage {
    let key_re = Regex::new(r"<Key>([^<]*)</Key>").unwrap();
    let token_re = Regex::new(r"<NextContinuationToken>([^<]*)</NextContinuationToken>").unwrap();

    ListPage {
        keys: key_re
            .captures_iter(body)
            .map(|caps| unescape_xml(&caps[1]))
            .collect(),
        truncated: body.contains("<IsTruncated>true</IsTruncated>"),
        next_token: token_re.captures(body).map(|caps| unescape_xml(&caps[1])),
    }
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
