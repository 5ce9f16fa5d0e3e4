//! ICY in-band metadata from a live audio stream.
//!
//! With `Icy-MetaData: 1` the server interleaves the audio with metadata:
//! `metaint` audio bytes, one length byte (×16), that many bytes of
//! `StreamTitle='..';` text, then audio again. Blocks can straddle network
//! chunks, so the framing lives in a small state machine fed with whatever
//! the transport hands us.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tokio::time::{timeout, Instant};
use tracing::debug;

use super::http::classify;
use super::{observation, SourceAdapter};
use crate::config::StreamConfig;
use crate::error::SourceError;
use crate::protocol::{SourceKind, StationEntry, TrackObservation};

pub const MAX_METAINT: usize = 256_000;
pub const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug)]
enum Phase {
    Audio { remaining: usize },
    Length,
    Metadata { len: usize, buf: Vec<u8> },
}

/// Splits a raw ICY byte stream into metadata blocks.
#[derive(Debug)]
pub struct IcyFramer {
    metaint: usize,
    phase: Phase,
    bytes_seen: u64,
}

impl IcyFramer {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            phase: Phase::Audio { remaining: metaint },
            bytes_seen: 0,
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Feed the next slice of the body. Returns every metadata block that
    /// completed inside it, in stream order. Empty blocks are not returned.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<Vec<u8>> {
        self.bytes_seen += data.len() as u64;
        let mut blocks = Vec::new();

        while !data.is_empty() {
            let phase = std::mem::replace(&mut self.phase, Phase::Length);
            self.phase = match phase {
                Phase::Audio { remaining } => {
                    let take = remaining.min(data.len());
                    data = &data[take..];
                    if remaining == take {
                        Phase::Length
                    } else {
                        Phase::Audio { remaining: remaining - take }
                    }
                }
                Phase::Length => {
                    let len = data[0] as usize * 16;
                    data = &data[1..];
                    if len == 0 {
                        Phase::Audio { remaining: self.metaint }
                    } else {
                        Phase::Metadata { len, buf: Vec::with_capacity(len) }
                    }
                }
                Phase::Metadata { len, mut buf } => {
                    let take = (len - buf.len()).min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if buf.len() == len {
                        blocks.push(buf);
                        Phase::Audio { remaining: self.metaint }
                    } else {
                        Phase::Metadata { len, buf }
                    }
                }
            };
        }
        blocks
    }
}

/// Value of `StreamTitle` in a metadata block, either quote style.
pub fn parse_stream_title(meta: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(meta);
    let text = text.trim_matches(char::from(0)).trim();

    for (open, close) in [("StreamTitle='", "';"), ("StreamTitle=\"", "\";")] {
        let Some(start) = text.find(open) else {
            continue;
        };
        let rest = &text[start + open.len()..];
        if let Some(end) = rest.find(close) {
            let title = rest[..end].trim();
            return (!title.is_empty()).then(|| title.to_string());
        }
    }
    None
}

/// `"Artist - Title"` on the first separator; no separator means an unknown artist.
pub fn split_artist_title(stream_title: &str) -> (String, String) {
    match stream_title.split_once(" - ") {
        Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
        None => (UNKNOWN_ARTIST.to_string(), stream_title.trim().to_string()),
    }
}

/// Turn a StreamTitle into an observation, rejecting advertisements.
pub fn extract_track(
    stream_title: &str,
    ad_markers: &[String],
) -> Result<TrackObservation, SourceError> {
    if ad_markers
        .iter()
        .any(|m| !m.is_empty() && stream_title.contains(m.as_str()))
    {
        return Err(SourceError::Advertisement(stream_title.to_string()));
    }
    let (artist, title) = split_artist_title(stream_title);
    observation(&artist, &title).ok_or(SourceError::MissingStructure("empty stream title"))
}

pub fn parse_metaint(headers: &HeaderMap) -> Result<usize, SourceError> {
    let raw = headers.get("icy-metaint").ok_or(SourceError::NoMetaInt)?;
    let text = raw
        .to_str()
        .map_err(|_| SourceError::InvalidMetaInt(format!("{:?}", raw)))?
        .trim();
    match text.parse::<usize>() {
        Ok(n) if (1..=MAX_METAINT).contains(&n) => Ok(n),
        _ => Err(SourceError::InvalidMetaInt(text.to_string())),
    }
}

pub struct StreamAdapter {
    client: Client,
    timeout: Duration,
    max_chunks: usize,
    chunk_size: usize,
    ad_markers: Vec<String>,
}

impl StreamAdapter {
    /// `client` should carry no overall request timeout: the body is an
    /// endless stream and is bounded here by `timeout` and the chunk ceiling.
    pub fn new(client: Client, timeout: Duration, config: &StreamConfig) -> Self {
        Self {
            client,
            timeout,
            max_chunks: config.max_chunks.max(1),
            chunk_size: config.chunk_size.max(1),
            ad_markers: config.ad_markers.clone(),
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<TrackObservation, SourceError> {
        let deadline = Instant::now() + self.timeout;

        let request = self.client.get(url).header("Icy-MetaData", "1").send();
        let mut response = timeout(self.timeout, request)
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let metaint = parse_metaint(response.headers())?;

        let mut framer = IcyFramer::new(metaint);
        let mut chunks = 0usize;
        loop {
            let remain = deadline.saturating_duration_since(Instant::now());
            if remain.is_zero() {
                return Err(SourceError::Timeout);
            }
            let next = timeout(remain, response.chunk())
                .await
                .map_err(|_| SourceError::Timeout)?
                .map_err(classify)?;
            let Some(bytes) = next else {
                return Err(SourceError::StreamEnded);
            };

            for piece in bytes.chunks(self.chunk_size) {
                chunks += 1;
                if chunks > self.max_chunks {
                    return Err(SourceError::ChunkCeiling(self.max_chunks));
                }
                for block in framer.push(piece) {
                    if let Some(title) = parse_stream_title(&block) {
                        debug!(
                            "[icy] {} title after {} bytes: {}",
                            url,
                            framer.bytes_seen(),
                            title
                        );
                        return extract_track(&title, &self.ad_markers);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for StreamAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::StreamMetadata
    }

    /// The station slug is the stream URL.
    async fn fetch(&self, station: &StationEntry) -> Option<TrackObservation> {
        match self.try_fetch(&station.slug).await {
            Ok(obs) => Some(obs),
            Err(e) => {
                debug!("[icy] {}: {}", station.name, e);
                None
            }
        }
    }
}
