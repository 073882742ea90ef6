//! Development server: static files over HTTP plus a live-reload channel.

mod http;
mod reload;

use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tokio::sync::oneshot;

use crate::error::ServerError;

use reload::ReloadHub;

/// Serves a directory on `127.0.0.1` and pushes reload notifications to
/// connected browsers. HTML pages get the reload script injected.
#[derive(Debug)]
pub struct DevServer {
    root: Utf8PathBuf,
    port: u16,
    reload: ReloadHub,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DevServer {
    /// Binds the HTTP port synchronously, so a port already in use is
    /// reported here rather than from the server thread. Port `0` picks a
    /// free port.
    pub fn start(root: impl Into<Utf8PathBuf>, port: u16) -> Result<Self, ServerError> {
        let root = root.into();

        let bind = |source| ServerError::Bind { port, source };
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).map_err(bind)?;
        listener.set_nonblocking(true).map_err(bind)?;
        let port = listener.local_addr().map_err(bind)?.port();

        let reload = ReloadHub::start()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let router = http::router(root.clone(), reload.port());
        let (tx, rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("kiln-http".into())
            .spawn(move || {
                if let Err(e) = runtime.block_on(http::serve(listener, router, rx)) {
                    tracing::error!("HTTP server stopped: {e}");
                }
            })
            .map_err(ServerError::Runtime)?;

        tracing::info!(
            url = %style(format!("http://localhost:{port}/")).yellow(),
            reload = reload.port(),
            "serving {root}"
        );

        Ok(Self {
            root,
            port,
            reload,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn reload_port(&self) -> u16 {
        self.reload.port()
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Tells every connected browser to reload. Silent when nobody is
    /// connected.
    pub fn notify_reload(&self) {
        tracing::info!("reloading browsers");
        self.reload.notify();
    }

    /// Shuts the HTTP server down and waits for it.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("HTTP server thread panicked");
        }
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use super::*;

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn site() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        fs::write(root.join("index.html"), "<html><body>hello</body></html>").unwrap();
        fs::create_dir_all(root.join("assets/css")).unwrap();
        fs::write(root.join("assets/css/style.css"), "body{color:red}").unwrap();
        (tmp, root)
    }

    #[test]
    fn port_in_use_fails_to_start() {
        let (_tmp, root) = site();
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = DevServer::start(&root, port).unwrap_err();
        assert!(matches!(err, ServerError::Bind { port: p, .. } if p == port));
    }

    #[test]
    fn serves_files_and_injects_reload_script() {
        let (_tmp, root) = site();
        let server = DevServer::start(&root, 0).unwrap();

        let page = get(server.port(), "/");
        assert!(page.starts_with("HTTP/1.1 200"), "got: {page}");
        assert!(page.contains(r#"hello<script src="/__kiln/reload.js"></script></body>"#));

        let css = get(server.port(), "/assets/css/style.css");
        assert!(css.starts_with("HTTP/1.1 200"));
        assert!(css.ends_with("body{color:red}"));
        assert!(!css.contains("reload.js"));

        let script = get(server.port(), "/__kiln/reload.js");
        assert!(script.contains(&format!(":{}`", server.reload_port())));

        let missing = get(server.port(), "/nope.css");
        assert!(missing.starts_with("HTTP/1.1 404"));

        server.stop();
    }
}
