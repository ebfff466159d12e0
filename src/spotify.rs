//! Music catalog client for the Spotify Web API (client-credentials flow).
//!
//! Only metadata is read here; nothing is streamed from the catalog.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use serenity::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CatalogCredentials;
use crate::error::{BotError, BotResult};
use crate::resolver::{Catalog, CatalogCollection, CatalogKind, CatalogPage, CatalogTrack};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Tokens are refreshed this long before the catalog says they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

/// Paging object. Items stay raw because playlist pages wrap every track in
/// `{ "track": ... }` while album pages do not, and a cursor doesn't say which.
#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    items: Vec<Value>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    name: String,
    tracks: Paging,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Paging,
}

fn catalog_track(track: SpotifyTrack) -> Option<CatalogTrack> {
    let name = track.name.filter(|name| !name.trim().is_empty())?;

    Some(CatalogTrack {
        name,
        artists: track.artists.into_iter().map(|artist| artist.name).collect(),
    })
}

fn catalog_item(value: Value) -> Option<CatalogTrack> {
    let track = match value {
        Value::Object(mut fields) if fields.contains_key("track") => fields.remove("track")?,
        other => other,
    };

    serde_json::from_value::<SpotifyTrack>(track)
        .ok()
        .and_then(catalog_track)
}

impl From<Paging> for CatalogPage {
    fn from(paging: Paging) -> Self {
        CatalogPage {
            items: paging.items.into_iter().map(catalog_item).collect(),
            next: paging.next,
        }
    }
}

pub struct SpotifyCatalog {
    client: Client,
    credentials: CatalogCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyCatalog {
    pub fn new(credentials: CatalogCredentials, timeout: Duration) -> BotResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> BotResult<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        debug!("Requesting a new catalog token");

        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = response.access_token;

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });

        Ok(value)
    }

    /// GET against the catalog. Unknown or malformed ids come back as `None`.
    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> BotResult<Option<T>> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                debug!("Catalog has nothing at {url}");
                Ok(None)
            }
            StatusCode::UNAUTHORIZED => {
                warn!("Catalog rejected the access token");
                *self.token.lock().await = None;

                Err(BotError::BackendUnavailable("catalog rejected the access token".to_string()))
            }
            _ => Ok(Some(response.error_for_status()?.json().await?)),
        }
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn track(&self, id: &str) -> BotResult<Option<CatalogTrack>> {
        let track: Option<SpotifyTrack> = self.get(&format!("{API_BASE_URL}/tracks/{id}"), &[]).await?;

        Ok(track.and_then(catalog_track))
    }

    async fn collection(&self, kind: CatalogKind, id: &str) -> BotResult<Option<CatalogCollection>> {
        let url = match kind {
            CatalogKind::Playlist => format!("{API_BASE_URL}/playlists/{id}"),
            CatalogKind::Album => format!("{API_BASE_URL}/albums/{id}"),
            CatalogKind::Track => {
                return Err(BotError::InvalidInput("a track is not a collection".to_string()))
            }
        };

        let response: Option<CollectionResponse> = self.get(&url, &[]).await?;

        Ok(response.map(|collection| {
            info!("Catalog collection {} has a first page of {}", collection.name, collection.tracks.items.len());

            CatalogCollection {
                name: collection.name,
                first_page: collection.tracks.into(),
            }
        }))
    }

    async fn next_page(&self, cursor: &str) -> BotResult<CatalogPage> {
        let page: Option<Paging> = self.get(cursor, &[]).await?;

        Ok(page.map(CatalogPage::from).unwrap_or_default())
    }

    async fn search(&self, query: &str) -> BotResult<Option<CatalogTrack>> {
        let response: Option<SearchResponse> = self
            .get(
                &format!("{API_BASE_URL}/search"),
                &[("q", query), ("type", "track"), ("limit", "1")],
            )
            .await?;

        Ok(response
            .and_then(|search| search.tracks.items.into_iter().next())
            .and_then(catalog_item))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn playlist_pages_unwrap_track_and_skip_missing_ones() {
        let paging: Paging = serde_json::from_value(json!({
            "items": [
                { "added_at": "2024-01-01T00:00:00Z", "track": { "name": "Song", "artists": [{ "name": "Band" }] } },
                { "added_at": "2024-01-01T00:00:00Z", "track": null },
                { "track": { "artists": [{ "name": "Nameless" }] } }
            ],
            "next": "https://api.spotify.com/v1/playlists/p/tracks?offset=100&limit=100"
        }))
        .unwrap();

        let page = CatalogPage::from(paging);

        assert_eq!(page.items.len(), 3);
        assert_eq!(
            page.items[0],
            Some(CatalogTrack { name: "Song".to_string(), artists: vec!["Band".to_string()] })
        );
        assert_eq!(page.items[1], None);
        assert_eq!(page.items[2], None);
        assert!(page.next.is_some());
    }

    #[test]
    fn album_pages_hold_tracks_directly() {
        let paging: Paging = serde_json::from_value(json!({
            "items": [
                { "name": "Intro", "artists": [{ "name": "A" }, { "name": "B" }], "track_number": 1 }
            ],
            "next": null
        }))
        .unwrap();

        let page = CatalogPage::from(paging);

        assert_eq!(page.items[0].as_ref().map(|t| t.artists.len()), Some(2));
        assert!(page.next.is_none());
    }

    #[test]
    fn collection_response_parses() {
        let collection: CollectionResponse = serde_json::from_value(json!({
            "name": "Mix",
            "tracks": { "items": [], "next": null, "total": 0 }
        }))
        .unwrap();

        assert_eq!(collection.name, "Mix");
        assert!(collection.tracks.items.is_empty());
    }

    #[test]
    fn token_is_refreshed_before_expiry() {
        let now = Instant::now();
        let fresh = CachedToken { value: "t".to_string(), expires_at: now + Duration::from_secs(3600) };
        let stale = CachedToken { value: "t".to_string(), expires_at: now + Duration::from_secs(30) };

        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }
}
