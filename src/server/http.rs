use std::net::TcpListener;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tokio::sync::oneshot;
use tower::ServiceExt;
use tower_http::services::ServeDir;

pub(super) const RELOAD_SCRIPT: &str = "/__kiln/reload.js";

#[derive(Debug)]
struct Site {
    root: Utf8PathBuf,
    reload_port: u16,
}

pub(super) fn router(root: Utf8PathBuf, reload_port: u16) -> Router {
    Router::new()
        .route(RELOAD_SCRIPT, get(reload_script))
        .fallback(serve_file)
        .with_state(Arc::new(Site { root, reload_port }))
}

/// Serves `router` on an already bound listener until `shutdown` fires.
pub(super) async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await
}

async fn reload_script(State(site): State<Arc<Site>>) -> impl IntoResponse {
    let script = format!(
        r#"
const socket = new WebSocket(`ws://${{location.hostname}}:{}`);
socket.addEventListener("message", () => {{
    window.location.reload();
}});
"#,
        site.reload_port
    );

    ([(header::CONTENT_TYPE, "text/javascript")], script)
}

async fn serve_file(State(site): State<Arc<Site>>, req: Request) -> Response {
    if let Some(path) = html_target(&site.root, req.uri().path())
        && let Ok(html) = tokio::fs::read_to_string(&path).await
    {
        return Html(inject_reload(&html)).into_response();
    }

    match ServeDir::new(&site.root).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

/// The HTML file a request path resolves to, if any. Directories resolve to
/// their `index.html`.
fn html_target(root: &Utf8Path, uri_path: &str) -> Option<Utf8PathBuf> {
    let rel = Utf8Path::new(uri_path.trim_start_matches('/'));
    if !rel.components().all(|c| matches!(c, Utf8Component::Normal(_))) {
        return None;
    }

    let mut path = root.join(rel);
    if path.is_dir() {
        path.push("index.html");
    }

    match path.extension() {
        Some("html" | "htm") if path.is_file() => Some(path),
        _ => None,
    }
}

/// Adds the live-reload script tag before the closing `</body>`, or at the
/// end for fragments without one.
pub(super) fn inject_reload(html: &str) -> String {
    let tag = format!(r#"<script src="{RELOAD_SCRIPT}"></script>"#);

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
