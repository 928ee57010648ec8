//! Just enough HLS to play a recorded segment: master and media playlist
//! parsing, level selection, and fragment fetching.

use crate::playback::output::OutputPipe;
use crate::playback::{ErrorCategory, PlayerError};
use futures::StreamExt;
use reqwest::Client;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: Url,
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub uri: Url,
    pub duration: f64,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Whole seconds, as `#EXT-X-TARGETDURATION` is a decimal integer
    pub target_duration: u64,
    pub media_sequence: u64,
    pub fragments: Vec<Fragment>,
    /// `#EXT-X-ENDLIST` seen: no more fragments will be added
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("bad uri `{0}`: {1}")]
    BadUri(String, url::ParseError),
    #[error("bad value for {0}: `{1}`")]
    BadValue(&'static str, String),
    #[error("#EXT-X-STREAM-INF without a uri")]
    DanglingVariant,
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    // attribute lists are comma separated, but quoted values may contain commas
    let mut rest = attrs;
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after.split_once(',') {
                Some((v, n)) => (v, n),
                None => (after, ""),
            }
        };
        if key.trim() == name {
            return Some(value);
        }
        rest = next;
    }
    None
}

fn parse_resolution(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.split_once(['x', 'X'])?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

pub fn parse_playlist(text: &str, base: &Url) -> Result<Playlist, PlaylistError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err(PlaylistError::MissingHeader);
    }

    let join = |uri: &str| base.join(uri).map_err(|e| PlaylistError::BadUri(uri.to_string(), e));

    let mut variants = Vec::new();
    let mut pending_variant: Option<(u64, Option<(u32, u32)>)> = None;

    let mut target_duration: u64 = 0;
    let mut media_sequence = 0;
    let mut fragments = Vec::new();
    let mut pending_duration: Option<f64> = None;
    let mut ended = false;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let bandwidth = attribute(attrs, "BANDWIDTH")
                .map(|b| b.parse().map_err(|_| PlaylistError::BadValue("BANDWIDTH", b.to_string())))
                .transpose()?
                .unwrap_or(0);
            let resolution = attribute(attrs, "RESOLUTION").and_then(parse_resolution);
            pending_variant = Some((bandwidth, resolution));
        } else if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = v
                .parse()
                .map_err(|_| PlaylistError::BadValue("EXT-X-TARGETDURATION", v.to_string()))?;
        } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = v
                .parse()
                .map_err(|_| PlaylistError::BadValue("EXT-X-MEDIA-SEQUENCE", v.to_string()))?;
        } else if let Some(v) = line.strip_prefix("#EXTINF:") {
            let raw = v.split(',').next().unwrap_or("");
            let duration = raw
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| PlaylistError::BadValue("EXTINF", raw.to_string()))?;
            pending_duration = Some(duration);
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some((bandwidth, resolution)) = pending_variant.take() {
            variants.push(Variant {
                uri: join(line)?,
                bandwidth,
                resolution,
            });
        } else {
            let sequence = media_sequence + fragments.len() as u64;
            fragments.push(Fragment {
                uri: join(line)?,
                duration: pending_duration.take().unwrap_or(target_duration as f64),
                sequence,
            });
        }
    }

    if pending_variant.is_some() {
        return Err(PlaylistError::DanglingVariant);
    }
    if !variants.is_empty() {
        return Ok(Playlist::Master(variants));
    }
    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        media_sequence,
        fragments,
        ended,
    }))
}

/// Highest bandwidth wins; ties keep the first listed.
pub fn pick_level(variants: &[Variant]) -> Option<usize> {
    variants
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, v)| v.bandwidth)
        .map(|(i, _)| i)
}

/// A loaded manifest ready for fragment fetching.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub levels: usize,
    pub level: usize,
    pub level_url: Url,
    pub playlist: MediaPlaylist,
}

#[derive(Debug, Clone)]
pub struct HlsLoader {
    http: Client,
    debug: bool,
}

impl HlsLoader {
    pub fn new(http: Client, debug: bool) -> Self {
        HlsLoader { http, debug }
    }

    async fn fetch_text(&self, url: &Url, category: ErrorCategory) -> Result<String, PlayerError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlayerError::new(category, format!("{url}: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| PlayerError::new(category, format!("{url}: {e}")))
    }

    pub async fn load_level(&self, url: &Url) -> Result<MediaPlaylist, PlayerError> {
        let text = self.fetch_text(url, ErrorCategory::Level).await?;
        match parse_playlist(&text, url) {
            Ok(Playlist::Media(media)) => Ok(media),
            Ok(Playlist::Master(_)) => Err(PlayerError::new(ErrorCategory::Level, "nested master playlist")),
            Err(e) => Err(PlayerError::new(ErrorCategory::Level, e.to_string())),
        }
    }

    /// Load `url`; a master playlist is followed to its best level.
    pub async fn load(&self, url: &str) -> Result<LoadedManifest, PlayerError> {
        let url = Url::parse(url).map_err(|e| PlayerError::new(ErrorCategory::Manifest, format!("{url}: {e}")))?;
        let text = self.fetch_text(&url, ErrorCategory::Manifest).await?;
        let playlist =
            parse_playlist(&text, &url).map_err(|e| PlayerError::new(ErrorCategory::Manifest, e.to_string()))?;

        match playlist {
            Playlist::Media(playlist) => Ok(LoadedManifest {
                levels: 1,
                level: 0,
                level_url: url,
                playlist,
            }),
            Playlist::Master(variants) => {
                let level = pick_level(&variants)
                    .ok_or_else(|| PlayerError::new(ErrorCategory::Manifest, "no variants"))?;
                let variant = &variants[level];
                if self.debug {
                    tracing::debug!(
                        "selected level {} of {} ({} bps, {:?})",
                        level,
                        variants.len(),
                        variant.bandwidth,
                        variant.resolution
                    );
                }
                let playlist = self.load_level(&variant.uri).await?;
                Ok(LoadedManifest {
                    levels: variants.len(),
                    level,
                    level_url: variant.uri.clone(),
                    playlist,
                })
            }
        }
    }

    /// Stream one fragment into `pipe`, returning the byte count.
    pub async fn fetch_fragment(&self, fragment: &Fragment, pipe: &mut OutputPipe) -> Result<u64, PlayerError> {
        let fragment_error = |e: reqwest::Error| PlayerError::new(ErrorCategory::Fragment, format!("{}: {e}", fragment.uri));
        let response = self
            .http
            .get(fragment.uri.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fragment_error)?;

        let mut total = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(fragment_error)?;
            total += chunk.len() as u64;
            pipe.write_fragment(&chunk)
                .await
                .map_err(|e| PlayerError::new(ErrorCategory::Media, e.to_string()))?;
        }
        Ok(total)
    }
}
