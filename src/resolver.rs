//! Track Resolver.
//!
//! Turns user input into playable [`Track`]s. Catalog links (and catalog-first
//! text searches) go through the [`Catalog`] to get `"title artist"` queries,
//! which are then looked up one by one in the [`MediaSearch`] backend. Anything
//! else goes to the media backend directly.

use std::sync::Arc;

use serenity::async_trait;
use serenity::model::id::UserId;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{BotError, BotResult, NotFoundKind};
use crate::models::Track;

const CATALOG_HOST: &str = "open.spotify.com";
const CATALOG_URI_SCHEME: &str = "spotify";
const MAX_CATALOG_PAGES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Track,
    Playlist,
    Album,
}

impl CatalogKind {
    fn from_segment(segment: &str) -> BotResult<Self> {
        match segment {
            "track" => Ok(CatalogKind::Track),
            "playlist" => Ok(CatalogKind::Playlist),
            "album" => Ok(CatalogKind::Album),
            other => Err(BotError::InvalidInput(format!(
                "I can only play track, playlist or album links, not `{other}`."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLink {
    pub kind: CatalogKind,
    pub id: String,
}

impl CatalogLink {
    /// `None` when the input is not a catalog link at all, `Some(Err(_))` when
    /// it is one but cannot be used.
    pub fn parse(input: &str) -> Option<BotResult<CatalogLink>> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix(&format!("{CATALOG_URI_SCHEME}:")) {
            let mut parts = rest.split(':');
            let kind = parts.next().unwrap_or_default();
            let id = parts.next().unwrap_or_default();

            return Some(Self::build(kind, id));
        }

        let url = Url::parse(input).ok()?;

        if url.host_str() != Some(CATALOG_HOST) {
            return None;
        }

        // Localised links carry a prefix segment such as `intl-pt`.
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [.., kind, id] => Some(Self::build(kind, id)),
            _ => Some(Err(BotError::InvalidInput(
                "That catalog link doesn't point to a track, playlist or album.".to_string(),
            ))),
        }
    }

    fn build(kind: &str, id: &str) -> BotResult<CatalogLink> {
        let kind = CatalogKind::from_segment(kind)?;
        let id = id.split(['?', '&']).next().unwrap_or_default();

        if id.is_empty() {
            return Err(BotError::InvalidInput("That catalog link has no id.".to_string()));
        }

        Ok(CatalogLink {
            kind,
            id: id.to_string(),
        })
    }
}

/// Catalog metadata for one item; only used to build a media query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub name: String,
    pub artists: Vec<String>,
}

impl CatalogTrack {
    pub fn search_query(&self) -> Option<String> {
        let name = self.name.trim();

        if name.is_empty() {
            return None;
        }

        Some(match self.artists.first() {
            Some(artist) => format!("{name} {artist}"),
            None => name.to_string(),
        })
    }
}

/// One page of a collection. `None` items had no usable track metadata.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<Option<CatalogTrack>>,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogCollection {
    pub name: String,
    pub first_page: CatalogPage,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn track(&self, id: &str) -> BotResult<Option<CatalogTrack>>;

    async fn collection(&self, kind: CatalogKind, id: &str) -> BotResult<Option<CatalogCollection>>;

    async fn next_page(&self, cursor: &str) -> BotResult<CatalogPage>;

    async fn search(&self, query: &str) -> BotResult<Option<CatalogTrack>>;
}

#[async_trait]
pub trait MediaSearch: Send + Sync {
    /// Best match for free text.
    async fn search(&self, query: &str) -> BotResult<Option<Track>>;

    /// The single item behind a media URL.
    async fn load(&self, url: &str) -> BotResult<Option<Track>>;

    /// Every entry of a media playlist URL.
    async fn playlist(&self, url: &str) -> BotResult<Vec<Track>>;
}

#[derive(Debug, Clone)]
pub struct Resolution {
    /// Never empty.
    pub tracks: Vec<Track>,
    /// Name of the catalog item the tracks came from, if any.
    pub source_name: Option<String>,
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn is_media_playlist(input: &str) -> bool {
    is_url(input) && (input.contains("&list=") || input.contains("?list="))
}

pub struct Resolver {
    catalog: Option<Arc<dyn Catalog>>,
    media: Arc<dyn MediaSearch>,
}

impl Resolver {
    pub fn new(catalog: Option<Arc<dyn Catalog>>, media: Arc<dyn MediaSearch>) -> Self {
        Self { catalog, media }
    }

    /// Catalog links resolve through the catalog, everything else goes
    /// straight to the media backend.
    pub async fn resolve(&self, input: &str, requester: UserId) -> BotResult<Resolution> {
        let input = non_empty(input)?;

        if let Some(link) = CatalogLink::parse(input) {
            return self.resolve_link(link?, requester).await;
        }

        info!("Resolving {input} through the media backend");

        let tracks = if is_media_playlist(input) {
            self.media.playlist(input).await?
        } else if is_url(input) {
            self.media.load(input).await?.into_iter().collect()
        } else {
            self.media.search(input).await?.into_iter().collect()
        };

        finish(tracks, None, requester)
    }

    /// Like [`Resolver::resolve`], but plain text is looked up in the catalog
    /// first.
    pub async fn resolve_catalog_first(&self, input: &str, requester: UserId) -> BotResult<Resolution> {
        let input = non_empty(input)?;

        if let Some(link) = CatalogLink::parse(input) {
            return self.resolve_link(link?, requester).await;
        }

        let found = self
            .catalog()?
            .search(input)
            .await?
            .ok_or(BotError::NotFound(NotFoundKind::NoCatalogMatch))?;

        let tracks = self.lookup_all(vec![Some(found.clone())]).await;

        finish(tracks, Some(found.name), requester)
    }

    async fn resolve_link(&self, link: CatalogLink, requester: UserId) -> BotResult<Resolution> {
        let catalog = self.catalog()?;

        info!("Resolving catalog {:?} {}", link.kind, link.id);

        let (name, items) = match link.kind {
            CatalogKind::Track => {
                let track = catalog
                    .track(&link.id)
                    .await?
                    .ok_or(BotError::NotFound(NotFoundKind::NoCatalogMatch))?;

                (track.name.clone(), vec![Some(track)])
            }
            CatalogKind::Playlist | CatalogKind::Album => {
                let collection = catalog
                    .collection(link.kind, &link.id)
                    .await?
                    .ok_or(BotError::NotFound(NotFoundKind::NoCatalogMatch))?;

                let items = collect_pages(catalog, collection.first_page).await;

                (collection.name, items)
            }
        };

        let tracks = self.lookup_all(items).await;

        finish(tracks, Some(name), requester)
    }

    /// Looks every catalog item up in order. Items without metadata or
    /// without a media match are dropped.
    async fn lookup_all(&self, items: Vec<Option<CatalogTrack>>) -> Vec<Track> {
        let total = items.len();
        let mut tracks = Vec::with_capacity(total);

        for query in items.iter().flatten().filter_map(CatalogTrack::search_query) {
            match self.media.search(&query).await {
                Ok(Some(track)) => tracks.push(track),
                Ok(None) => debug!("No playable match for {query}"),
                Err(why) => debug!("Lookup for {query} failed: {why}"),
            }
        }

        if tracks.len() < total {
            info!("Resolved {} of {total} catalog items", tracks.len());
        }

        tracks
    }

    fn catalog(&self) -> BotResult<&dyn Catalog> {
        self.catalog
            .as_deref()
            .ok_or_else(|| BotError::BackendUnavailable("music catalog is not configured".to_string()))
    }
}

async fn collect_pages(catalog: &dyn Catalog, first_page: CatalogPage) -> Vec<Option<CatalogTrack>> {
    let mut items = first_page.items;
    let mut next = first_page.next;
    let mut pages = 1;

    while let Some(cursor) = next.take() {
        if pages >= MAX_CATALOG_PAGES {
            warn!("Stopping after {pages} catalog pages");
            break;
        }

        match catalog.next_page(&cursor).await {
            Ok(page) => {
                items.extend(page.items);
                next = page.next;
                pages += 1;
            }
            Err(why) => {
                warn!("Catalog page {cursor} failed, keeping {} items: {why}", items.len());
                break;
            }
        }
    }

    items
}

fn non_empty(input: &str) -> BotResult<&str> {
    let input = input.trim();

    if input.is_empty() {
        return Err(BotError::InvalidInput("Tell me what to play.".to_string()));
    }

    Ok(input)
}

fn finish(tracks: Vec<Track>, source_name: Option<String>, requester: UserId) -> BotResult<Resolution> {
    if tracks.is_empty() {
        return Err(BotError::NotFound(NotFoundKind::NoPlayableMatch));
    }

    Ok(Resolution {
        tracks: tracks
            .into_iter()
            .map(|track| track.requested_by(requester))
            .collect(),
        source_name,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::models::test_track;

    const USER: UserId = UserId(7);

    fn item(name: &str, artist: &str) -> Option<CatalogTrack> {
        Some(CatalogTrack {
            name: name.to_string(),
            artists: vec![artist.to_string()],
        })
    }

    #[derive(Default)]
    struct FakeCatalog {
        tracks: HashMap<String, CatalogTrack>,
        collections: HashMap<String, CatalogCollection>,
        pages: HashMap<String, CatalogPage>,
        searches: HashMap<String, CatalogTrack>,
        fetched_pages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn track(&self, id: &str) -> BotResult<Option<CatalogTrack>> {
            Ok(self.tracks.get(id).cloned())
        }

        async fn collection(&self, _: CatalogKind, id: &str) -> BotResult<Option<CatalogCollection>> {
            Ok(self.collections.get(id).cloned())
        }

        async fn next_page(&self, cursor: &str) -> BotResult<CatalogPage> {
            self.fetched_pages.lock().unwrap().push(cursor.to_string());

            self.pages
                .get(cursor)
                .cloned()
                .ok_or_else(|| BotError::BackendUnavailable("page gone".to_string()))
        }

        async fn search(&self, query: &str) -> BotResult<Option<CatalogTrack>> {
            Ok(self.searches.get(query).cloned())
        }
    }

    /// Knows a fixed set of queries; `"boom"` queries fail outright.
    #[derive(Default)]
    struct FakeMedia {
        known: HashMap<String, Track>,
        playlists: HashMap<String, Vec<Track>>,
    }

    impl FakeMedia {
        fn knowing(queries: &[&str]) -> Self {
            Self {
                known: queries
                    .iter()
                    .map(|query| (query.to_string(), test_track(query)))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MediaSearch for FakeMedia {
        async fn search(&self, query: &str) -> BotResult<Option<Track>> {
            if query.contains("boom") {
                return Err(BotError::BackendUnavailable("search exploded".to_string()));
            }

            Ok(self.known.get(query).cloned())
        }

        async fn load(&self, url: &str) -> BotResult<Option<Track>> {
            Ok(self.known.get(url).cloned())
        }

        async fn playlist(&self, url: &str) -> BotResult<Vec<Track>> {
            Ok(self.playlists.get(url).cloned().unwrap_or_default())
        }
    }

    fn resolver(catalog: FakeCatalog, media: FakeMedia) -> Resolver {
        Resolver::new(Some(Arc::new(catalog)), Arc::new(media))
    }

    fn titles(resolution: &Resolution) -> Vec<&str> {
        resolution.tracks.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn classifies_catalog_links() {
        let link = CatalogLink::parse("https://open.spotify.com/track/abc123?si=xyz")
            .unwrap()
            .unwrap();
        assert_eq!(link, CatalogLink { kind: CatalogKind::Track, id: "abc123".to_string() });

        let link = CatalogLink::parse("https://open.spotify.com/intl-pt/playlist/pl1").unwrap().unwrap();
        assert_eq!(link.kind, CatalogKind::Playlist);
        assert_eq!(link.id, "pl1");

        let link = CatalogLink::parse("spotify:album:al9").unwrap().unwrap();
        assert_eq!(link, CatalogLink { kind: CatalogKind::Album, id: "al9".to_string() });
    }

    #[test]
    fn non_catalog_input_is_not_a_link() {
        assert!(CatalogLink::parse("never gonna give you up").is_none());
        assert!(CatalogLink::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_none());
    }

    #[test]
    fn unsupported_catalog_links_are_invalid_input() {
        assert!(matches!(
            CatalogLink::parse("https://open.spotify.com/artist/a1"),
            Some(Err(BotError::InvalidInput(_)))
        ));
        assert!(matches!(
            CatalogLink::parse("https://open.spotify.com/"),
            Some(Err(BotError::InvalidInput(_)))
        ));
        assert!(matches!(
            CatalogLink::parse("spotify:track:"),
            Some(Err(BotError::InvalidInput(_)))
        ));
    }

    #[test]
    fn search_query_is_title_then_first_artist() {
        let track = CatalogTrack {
            name: "Song".to_string(),
            artists: vec!["Band".to_string(), "Guest".to_string()],
        };
        assert_eq!(track.search_query().as_deref(), Some("Song Band"));

        let nameless = CatalogTrack { name: " ".to_string(), artists: vec![] };
        assert_eq!(nameless.search_query(), None);
    }

    #[tokio::test]
    async fn plain_text_without_match_is_not_found() {
        let resolver = resolver(FakeCatalog::default(), FakeMedia::default());

        let result = resolver.resolve("nothing matches this", USER).await;

        assert!(matches!(result, Err(BotError::NotFound(NotFoundKind::NoPlayableMatch))));
    }

    #[tokio::test]
    async fn plain_text_resolves_to_top_result_with_requester() {
        let resolver = resolver(FakeCatalog::default(), FakeMedia::knowing(&["lofi beats"]));

        let resolution = resolver.resolve("  lofi beats ", USER).await.unwrap();

        assert_eq!(titles(&resolution), vec!["lofi beats"]);
        assert_eq!(resolution.tracks[0].requester, Some(USER));
        assert!(resolution.source_name.is_none());
    }

    #[tokio::test]
    async fn media_playlist_urls_expand() {
        let url = "https://www.youtube.com/watch?v=a&list=PL1";
        let media = FakeMedia {
            playlists: HashMap::from([(url.to_string(), vec![test_track("a"), test_track("b")])]),
            ..Default::default()
        };

        let resolution = resolver(FakeCatalog::default(), media).resolve(url, USER).await.unwrap();

        assert_eq!(titles(&resolution), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn collection_drops_failed_items_and_keeps_order() {
        let catalog = FakeCatalog {
            collections: HashMap::from([(
                "pl1".to_string(),
                CatalogCollection {
                    name: "Road Trip".to_string(),
                    first_page: CatalogPage {
                        items: vec![item("one", "A"), item("two", "B"), None],
                        next: Some("page-2".to_string()),
                    },
                },
            )]),
            pages: HashMap::from([(
                "page-2".to_string(),
                CatalogPage {
                    items: vec![item("boom", "C"), item("four", "D"), item("five", "E")],
                    next: None,
                },
            )]),
            ..Default::default()
        };
        let media = FakeMedia::knowing(&["one A", "four D", "five E"]);

        let resolution = resolver(catalog, media)
            .resolve("https://open.spotify.com/playlist/pl1", USER)
            .await
            .unwrap();

        assert_eq!(titles(&resolution), vec!["one A", "four D", "five E"]);
        assert_eq!(resolution.source_name.as_deref(), Some("Road Trip"));
    }

    #[tokio::test]
    async fn pagination_runs_until_exhausted() {
        let catalog = FakeCatalog {
            collections: HashMap::from([(
                "al1".to_string(),
                CatalogCollection {
                    name: "Album".to_string(),
                    first_page: CatalogPage {
                        items: vec![item("a", "X")],
                        next: Some("p2".to_string()),
                    },
                },
            )]),
            pages: HashMap::from([
                (
                    "p2".to_string(),
                    CatalogPage { items: vec![item("b", "X")], next: Some("p3".to_string()) },
                ),
                ("p3".to_string(), CatalogPage { items: vec![item("c", "X")], next: None }),
            ]),
            ..Default::default()
        };
        let catalog = Arc::new(catalog);
        let resolver = Resolver::new(
            Some(catalog.clone() as Arc<dyn Catalog>),
            Arc::new(FakeMedia::knowing(&["a X", "b X", "c X"])),
        );

        let resolution = resolver.resolve("spotify:album:al1", USER).await.unwrap();

        assert_eq!(titles(&resolution), vec!["a X", "b X", "c X"]);
        assert_eq!(*catalog.fetched_pages.lock().unwrap(), vec!["p2", "p3"]);
    }

    #[tokio::test]
    async fn unknown_catalog_item_is_no_catalog_match() {
        let resolver = resolver(FakeCatalog::default(), FakeMedia::default());

        let result = resolver.resolve("https://open.spotify.com/track/missing", USER).await;

        assert!(matches!(result, Err(BotError::NotFound(NotFoundKind::NoCatalogMatch))));
    }

    #[tokio::test]
    async fn catalog_item_without_media_equivalent_is_no_playable_match() {
        let catalog = FakeCatalog {
            tracks: HashMap::from([("t1".to_string(), item("obscure", "Nobody").unwrap())]),
            ..Default::default()
        };

        let result = resolver(catalog, FakeMedia::default())
            .resolve("https://open.spotify.com/track/t1", USER)
            .await;

        assert!(matches!(result, Err(BotError::NotFound(NotFoundKind::NoPlayableMatch))));
    }

    #[tokio::test]
    async fn catalog_links_need_a_configured_catalog() {
        let resolver = Resolver::new(None, Arc::new(FakeMedia::knowing(&["x"])));

        let result = resolver.resolve("https://open.spotify.com/track/t1", USER).await;
        assert!(matches!(result, Err(BotError::BackendUnavailable(_))));

        let resolution = resolver.resolve("x", USER).await.unwrap();
        assert_eq!(titles(&resolution), vec!["x"]);
    }

    #[tokio::test]
    async fn catalog_first_search_uses_catalog_metadata() {
        let catalog = FakeCatalog {
            searches: HashMap::from([("hey jude".to_string(), item("Hey Jude", "The Beatles").unwrap())]),
            ..Default::default()
        };
        let resolver = resolver(catalog, FakeMedia::knowing(&["Hey Jude The Beatles"]));

        let resolution = resolver.resolve_catalog_first("hey jude", USER).await.unwrap();
        assert_eq!(titles(&resolution), vec!["Hey Jude The Beatles"]);
        assert_eq!(resolution.source_name.as_deref(), Some("Hey Jude"));

        let result = resolver.resolve_catalog_first("unknown", USER).await;
        assert!(matches!(result, Err(BotError::NotFound(NotFoundKind::NoCatalogMatch))));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let resolver = resolver(FakeCatalog::default(), FakeMedia::default());

        assert!(matches!(resolver.resolve("   ", USER).await, Err(BotError::InvalidInput(_))));
    }
}
