#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub const METAINT: usize = 64;

pub const AGGREGATOR_PAGE: &str = r#"
<html><body>
  <h2>Muziekspeler</h2>
  <div class="player"><h4>Nu live</h4><p>Speler</p></div>
  <section>
    <h2>Radio 2</h2>
    <div class="now"><h4>In The Air Tonight
      <small>14:02</small></h4><p>Phil Collins</p></div>
  </section>
  <section>
    <h2>Radio 10</h2>
    <div class="now"><h4>#88: Mama</h4><p>Genesis</p></div>
  </section>
</body></html>
"#;

pub const PLAYLIST_A_PAGE: &str = r#"
<html><body>
  <div data-station="radio-10">
    <ul>
      <li class="playlist-item">
        <span itemprop="byArtist">Genesis</span>
        <span itemprop="name">#88: Mama</span>
      </li>
    </ul>
  </div>
</body></html>
"#;

pub const PLAYLIST_B_BLOCKS: &str = r#"
<html><body>
  <div class="song">
    <a href="/nl/veronica/artist/toto">Toto</a>
    <a href="/nl/veronica/title/africa">Africa</a>
  </div>
</body></html>
"#;

pub const PLAYLIST_B_TABLE: &str = r#"
<html><body>
  <table>
    <tr><td>Tijd</td><td>Artiest</td><td>Titel</td></tr>
    <tr><td>14:05</td><td>ABBA</td><td>SOS</td></tr>
  </table>
</body></html>
"#;

/// One ICY metadata block: length byte then the padded text.
pub fn meta_block(text: &str) -> Vec<u8> {
    let mut payload = text.as_bytes().to_vec();
    let padded = payload.len().div_ceil(16) * 16;
    payload.resize(padded, 0);
    let mut out = vec![(padded / 16) as u8];
    out.extend(payload);
    out
}

/// `blocks` interleaved with `metaint`-sized runs of fake audio.
pub fn icy_body(metaint: usize, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for block in blocks {
        out.extend(std::iter::repeat(0x55u8).take(metaint));
        out.extend(block);
    }
    out.extend(std::iter::repeat(0x55u8).take(metaint));
    out
}

/// Serve `body` in `piece`-sized chunks so blocks straddle chunk boundaries.
fn icy_response(metaint: Option<usize>, body: Vec<u8>, piece: usize) -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = body
        .chunks(piece)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "audio/mpeg");
    if let Some(metaint) = metaint {
        builder = builder.header("icy-metaint", metaint.to_string());
    }
    builder
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

async fn stream_joe() -> Response {
    let body = icy_body(
        METAINT,
        &[
            vec![0],
            meta_block("StreamTitle='Queen - Innuendo';StreamUrl='';"),
        ],
    );
    icy_response(Some(METAINT), body, 7)
}

async fn stream_ad() -> Response {
    let body = icy_body(METAINT, &[meta_block("StreamTitle='Adw_ad - promo';")]);
    icy_response(Some(METAINT), body, 50)
}

async fn stream_plain() -> Response {
    icy_response(None, vec![0x55; 512], 128)
}

async fn stream_silent() -> Response {
    let body = icy_body(METAINT, &[vec![0], vec![0], vec![0]]);
    icy_response(Some(METAINT), body, 32)
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Html("too late")
}

pub fn router() -> Router {
    Router::new()
        .route("/aggregator", get(|| async { Html(AGGREGATOR_PAGE) }))
        .route("/a/radio-10", get(|| async { Html(PLAYLIST_A_PAGE) }))
        .route(
            "/a/sky-radio",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route("/b/veronica", get(|| async { Html(PLAYLIST_B_BLOCKS) }))
        .route("/b/arrow", get(|| async { Html(PLAYLIST_B_TABLE) }))
        .route("/stream/joe", get(stream_joe))
        .route("/stream/ad", get(stream_ad))
        .route("/stream/plain", get(stream_plain))
        .route("/stream/silent", get(stream_silent))
        .route("/slow", get(slow))
}

/// Bind the fixture router on an ephemeral local port.
pub async fn spawn_fixture_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture server");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        axum::serve(listener, router()).await.ok();
    });
    addr
}
