// Catalog client module: a small blocking HTTP client that talks to the
// archive.org search and metadata endpoints. The `Catalog` trait is the
// seam the cache and the UI use, so tests can swap in a fake.

use std::collections::BTreeSet;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::config::{Settings, HTTP_TIMEOUT};
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Read access to the remote item catalog.
pub trait Catalog {
    /// Identifiers matching the configured query and prefix, sorted and
    /// deduplicated.
    fn search_identifiers(&self) -> Result<Vec<String>>;

    /// File names of one item, in catalog order.
    fn list_files(&self, identifier: &str) -> Result<Vec<String>>;

    /// Cheap connectivity check: number of hits for the search query.
    fn probe(&self) -> Result<u64>;
}

/// Shape of the advanced search response. Only the fields we read.
#[derive(Deserialize, Debug)]
struct SearchResponse {
    response: SearchBody,
}

#[derive(Deserialize, Debug)]
struct SearchBody {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Deserialize, Debug)]
struct SearchDoc {
    identifier: Option<String>,
}

/// Shape of `/metadata/<identifier>`. Unknown items come back as `{}`.
#[derive(Deserialize, Debug)]
struct MetadataResponse {
    #[serde(default)]
    files: Vec<MetadataFile>,
}

#[derive(Deserialize, Debug)]
struct MetadataFile {
    name: Option<String>,
}

/// Build the blocking client shared by the catalog and the downloader.
/// Adds the `LOW access:secret` header when credentials are configured.
pub fn http_client(credentials: Option<&Credentials>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("iaps3/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(creds) = credentials {
        let value = HeaderValue::from_str(&creds.authorization_header())
            .map_err(|_| Error::Config("credentials contain invalid header characters".into()))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(Client::builder()
        .default_headers(headers)
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

/// Catalog backed by archive.org.
#[derive(Clone)]
pub struct ArchiveClient {
    client: Client,
    base_url: String,
    query: String,
    prefix: String,
    rows: usize,
}

impl ArchiveClient {
    pub fn new(settings: &Settings, client: Client) -> Self {
        ArchiveClient {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            query: settings.search_query.clone(),
            prefix: settings.identifier_prefix.clone(),
            rows: settings.search_rows,
        }
    }

    fn search(&self, rows: usize) -> Result<SearchBody> {
        let url = format!("{}/advancedsearch.php", self.base_url);
        let rows = rows.to_string();
        let res = self
            .client
            .get(&url)
            .query(&[
                ("q", self.query.as_str()),
                ("fl[]", "identifier"),
                ("rows", rows.as_str()),
                ("output", "json"),
            ])
            .send()?;
        if !res.status().is_success() {
            return Err(Error::Status { status: res.status(), url });
        }
        let body: SearchResponse = res.json()?;
        Ok(body.response)
    }
}

impl Catalog for ArchiveClient {
    fn search_identifiers(&self) -> Result<Vec<String>> {
        let body = self.search(self.rows)?;
        let ids: BTreeSet<String> = body
            .docs
            .into_iter()
            .filter_map(|d| d.identifier)
            .filter(|id| id.starts_with(&self.prefix))
            .collect();
        tracing::debug!(found = body.num_found, kept = ids.len(), "catalog search finished");
        Ok(ids.into_iter().collect())
    }

    fn list_files(&self, identifier: &str) -> Result<Vec<String>> {
        let url = format!("{}/metadata/{}", self.base_url, identifier);
        let res = self.client.get(&url).send()?;
        if !res.status().is_success() {
            return Err(Error::Status { status: res.status(), url });
        }
        let meta: MetadataResponse = res.json()?;
        Ok(meta
            .files
            .into_iter()
            .filter_map(|f| f.name)
            .filter(|n| !n.trim().is_empty())
            .collect())
    }

    fn probe(&self) -> Result<u64> {
        Ok(self.search(1)?.num_found)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;

    /// In-memory catalog for cache and UI tests.
    pub(crate) struct FakeCatalog {
        pub items: Vec<String>,
        pub files: Vec<String>,
    }

    impl FakeCatalog {
        pub(crate) fn with_items(items: &[&str]) -> Self {
            Self {
                items: items.iter().map(|s| s.to_string()).collect(),
                files: Vec::new(),
            }
        }

        pub(crate) fn with_files(files: &[&str]) -> Self {
            Self {
                items: Vec::new(),
                files: files.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl Catalog for FakeCatalog {
        fn search_identifiers(&self) -> Result<Vec<String>> {
            Ok(self.items.clone())
        }

        fn list_files(&self, _identifier: &str) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        fn probe(&self) -> Result<u64> {
            Ok(self.items.len() as u64)
        }
    }

    fn client_for(server: &MockServer) -> ArchiveClient {
        let settings = Settings::rooted_at(".", server.base_url());
        ArchiveClient::new(&settings, http_client(None).unwrap())
    }

    #[test]
    fn search_filters_prefix_sorts_and_dedups() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/advancedsearch.php")
                .query_param("q", "sony_playstation3")
                .query_param("output", "json");
            then.status(200).json_body(serde_json::json!({
                "response": {
                    "numFound": 4,
                    "docs": [
                        {"identifier": "sony_playstation3_z"},
                        {"identifier": "unrelated_item"},
                        {"identifier": "sony_playstation3_a"},
                        {"identifier": "sony_playstation3_z"},
                        {}
                    ]
                }
            }));
        });

        let ids = client_for(&server).search_identifiers().unwrap();
        mock.assert();
        assert_eq!(ids, vec!["sony_playstation3_a", "sony_playstation3_z"]);
    }

    #[test]
    fn list_files_drops_blank_names() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/metadata/sony_playstation3_a");
            then.status(200).json_body(serde_json::json!({
                "files": [{"name": "Game.iso"}, {"name": "  "}, {"format": "Metadata"}, {"name": "Game.xml"}]
            }));
        });

        let files = client_for(&server).list_files("sony_playstation3_a").unwrap();
        assert_eq!(files, vec!["Game.iso", "Game.xml"]);
    }

    #[test]
    fn unknown_item_lists_nothing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/metadata/nope");
            then.status(200).body("{}");
        });
        assert!(client_for(&server).list_files("nope").unwrap().is_empty());
    }

    #[test]
    fn server_error_is_reported_with_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/advancedsearch.php");
            then.status(503);
        });
        let err = client_for(&server).probe().unwrap_err();
        assert!(matches!(err, Error::Status { status, .. } if status.as_u16() == 503));
    }

    #[test]
    fn credentials_are_sent_as_low_auth() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/advancedsearch.php")
                .header("authorization", "LOW key:secret");
            then.status(200)
                .json_body(serde_json::json!({"response": {"numFound": 7, "docs": []}}));
        });

        let creds = Credentials {
            access: "key".into(),
            secret: "secret".into(),
        };
        let settings = Settings::rooted_at(".", server.base_url());
        let client = ArchiveClient::new(&settings, http_client(Some(&creds)).unwrap());
        assert_eq!(client.probe().unwrap(), 7);
        mock.assert();
    }
}
