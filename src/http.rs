//! Development server for the built site.
//!
//! `serve` and `default` point it at the environment's `build_dir`, so the
//! browser sees exactly what the last Build Run wrote. Requests map straight
//! onto files below that directory; nothing is rendered on the fly.

use std::net::SocketAddr;
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `build_dir` on `127.0.0.1:port` from a background thread with its
/// own single-threaded runtime. The handle yields the server's exit status.
pub fn start(build_dir: Utf8PathBuf, port: u16) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(
        url = %style(format!("http://localhost:{port}/")).yellow(),
        dir = %build_dir,
        "starting a HTTP server"
    );

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(build_dir, port))
    })
}

async fn serve(build_dir: Utf8PathBuf, port: u16) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    // Directory requests fall back to their index.html.
    let router = Router::new().fallback_service(ServeDir::new(build_dir));

    axum::serve(address, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;
    use tempfile::TempDir;

    fn get(port: u16, path: &str) -> String {
        for _ in 0..50 {
            if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)) {
                write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").unwrap();
                let mut response = String::new();
                stream.read_to_string(&mut response).unwrap();
                return response;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("server on port {port} never came up");
    }

    #[test]
    fn test_serves_files_from_the_build_dir() {
        let dir = TempDir::new().unwrap();
        let build_dir = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(build_dir.join("index.html"), "<h1>Gem Check</h1>").unwrap();
        std::fs::create_dir(build_dir.join("stylesheets")).unwrap();
        std::fs::write(build_dir.join("stylesheets/main.css"), "body{}").unwrap();

        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let _server = start(build_dir, port);

        let index = get(port, "/");
        assert!(index.starts_with("HTTP/1.1 200"), "{index}");
        assert!(index.ends_with("<h1>Gem Check</h1>"));

        assert!(get(port, "/stylesheets/main.css").ends_with("body{}"));
        assert!(get(port, "/missing.html").starts_with("HTTP/1.1 404"));
    }
}
