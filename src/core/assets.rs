use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use futures_util::future;

use crate::core::config::GameConfig;
use crate::core::surface::Surface;

/// Where asset bytes come from. The real host fetches over HTTP; tests feed
/// bytes from memory.
pub trait AssetSource {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>>;
}

/// Fetches assets from the game server's `assets/` root.
pub struct HttpAssetSource {
    client: reqwest::Client,
    base: String,
}

impl HttpAssetSource {
    pub fn new(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/assets/{}", self.base, path)
    }
}

impl AssetSource for HttpAssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("fetching {url}"))?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("reading {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Decoded image assets keyed by the path they were declared under.
/// Write-once during prefetch, read-only for the rest of the session, never
/// evicted.
#[derive(Default, Debug)]
pub struct AssetCache {
    images: HashMap<String, Surface>,
}

impl AssetCache {
    pub fn insert(&mut self, path: String, surface: Surface) {
        self.images.insert(path, surface);
    }

    pub fn get(&self, path: &str) -> Option<&Surface> {
        self.images.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.images.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

enum Fetched {
    Image { path: String, surface: Surface },
    Script { path: String, source: String },
}

/// Fetch every asset the config declares, all concurrently. The phase
/// resolves only once every fetch has; the first failure rejects the whole
/// phase and the rest are abandoned. Ordering between assets is not
/// preserved or needed.
pub async fn prefetch_all<S: AssetSource>(
    source: &S,
    config: &GameConfig,
) -> Result<(AssetCache, Vec<(String, String)>)> {
    let mut jobs: Vec<Pin<Box<dyn Future<Output = Result<Fetched>> + '_>>> = Vec::new();
    for path in &config.image_filenames {
        jobs.push(Box::pin(fetch_image(source, path)));
    }
    for path in &config.lua_filenames {
        jobs.push(Box::pin(fetch_script(source, path)));
    }

    let mut cache = AssetCache::default();
    let mut scripts = Vec::new();
    for fetched in future::try_join_all(jobs).await? {
        match fetched {
            Fetched::Image { path, surface } => cache.insert(path, surface),
            Fetched::Script { path, source } => scripts.push((path, source)),
        }
    }
    Ok((cache, scripts))
}

async fn fetch_image<S: AssetSource>(source: &S, path: &str) -> Result<Fetched> {
    let bytes = source.fetch(path).await?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("decoding image '{path}'"))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(Fetched::Image {
        path: path.to_string(),
        surface: Surface::from_rgba(width, height, image.into_raw())?,
    })
}

async fn fetch_script<S: AssetSource>(source: &S, path: &str) -> Result<Fetched> {
    let bytes = source.fetch(path).await?;
    let text =
        String::from_utf8(bytes).with_context(|| format!("script '{path}' is not valid UTF-8"))?;
    Ok(Fetched::Script {
        path: path.to_string(),
        source: text,
    })
}
