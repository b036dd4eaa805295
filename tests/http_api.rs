//! End-to-end tests over a real listener, with shell scripts standing in
//! for the TeX engines.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio_test::assert_ok;
use xelatex_render::{
    AppState, Compiler, Orchestrator, RenderApi, Server, ServerConfig, WorkspaceManager,
};

/// Records each run in `calls`, flags overlapping runs in `overlaps`, fails
/// on `\undefined`, and otherwise writes a PDF echoing the source.
const ENGINE: &str = r#"#!/bin/sh
for src; do :; done
job="${src%.tex}"
echo "$job" >> "$CALLS"
if [ -e busy ]; then echo overlap >> "$OVERLAPS"; fi
touch busy
sleep "${ENGINE_DELAY:-0}"
rm -f busy
if grep -q 'undefined' "$src"; then
  printf '! Undefined control sequence.\nl.1 \\undefined\n' > "$job.log"
  exit 1
fi
printf 'fake engine\n' > "$job.log"
{ printf '%%PDF-1.5\n'; cat "$src"; } > "$job.pdf"
"#;

struct TestServer {
    _bin: TempDir,
    root: TempDir,
    calls: PathBuf,
    overlaps: PathBuf,
    base: String,
    server: Server,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(delay: &str) -> Self {
        let bin = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let calls = bin.path().join("calls");
        let overlaps = bin.path().join("overlaps");

        let script = ENGINE
            .replace("\"$CALLS\"", &format!("'{}'", calls.display()))
            .replace("\"$OVERLAPS\"", &format!("'{}'", overlaps.display()))
            .replace("${ENGINE_DELAY:-0}", delay);
        let xelatex = write_script(bin.path(), "xelatex", &script);
        let latexmk = write_script(bin.path(), "latexmk", &script);

        let compiler = Compiler::new()
            .with_xelatex_bin(xelatex)
            .with_latexmk_bin(latexmk);
        let state = AppState::new(Orchestrator::new(
            compiler,
            WorkspaceManager::new(root.path()),
        ));
        let jobs = state.shutdown.clone();
        let router = RenderApi::router(state, 1024 * 1024);

        let mut server = Server::new(
            ServerConfig {
                addr: "127.0.0.1:0".parse().unwrap(),
            },
            router,
            jobs,
        );
        let addr = server.start().await.unwrap();

        Self {
            _bin: bin,
            root,
            calls,
            overlaps,
            base: format!("http://{}", addr),
            server,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn runs(&self) -> usize {
        std::fs::read_to_string(&self.calls)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn overlapped(&self) -> bool {
        self.overlaps.exists()
    }

    fn workspace_entries(&self) -> Vec<String> {
        std::fs::read_dir(self.root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    async fn new_session(&self) -> String {
        let resp = self
            .client
            .post(self.url("/api/xelatex/session"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.text().await.unwrap()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const DOCUMENT: &str = "\\documentclass{article}\n\\begin{document}\nHello\n\\end{document}\n";

#[tokio::test]
async fn body_upload_runs_xelatex_twice_and_leaves_nothing_behind() {
    let mut srv = TestServer::start("0").await;

    let resp = assert_ok!(
        srv.client
            .post(srv.url("/api/xelatex/body"))
            .body(DOCUMENT)
            .send()
            .await
    );
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/pdf");
    let pdf = resp.bytes().await.unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    assert_eq!(srv.runs(), 2);
    assert!(srv.workspace_entries().is_empty());
    srv.server.shutdown().await;
}

#[tokio::test]
async fn failing_first_pass_is_not_repeated() {
    let mut srv = TestServer::start("0").await;

    let resp = srv
        .client
        .post(srv.url("/api/xelatex/body"))
        .body("\\undefined")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let text = resp.text().await.unwrap();
    assert!(text.contains("Undefined control sequence"));

    assert_eq!(srv.runs(), 1);
    assert!(srv.workspace_entries().is_empty());
    srv.server.shutdown().await;
}

#[tokio::test]
async fn identical_sources_give_identical_pdfs() {
    let mut srv = TestServer::start("0").await;

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let resp = srv
            .client
            .post(srv.url("/api/xelatex/body"))
            .body(DOCUMENT)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        outputs.push(resp.bytes().await.unwrap());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert!(srv.workspace_entries().is_empty());
    srv.server.shutdown().await;
}

#[tokio::test]
async fn multipart_upload_returns_named_pdf() {
    let mut srv = TestServer::start("0").await;

    let part = reqwest::multipart::Part::text(DOCUMENT).file_name("thesis.tex");
    let form = reqwest::multipart::Form::new().part("tex", part);
    let resp = srv
        .client
        .post(srv.url("/api/xelatex"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"thesis.pdf\""
    );
    assert!(srv.workspace_entries().is_empty());
    srv.server.shutdown().await;
}

#[tokio::test]
async fn session_lifecycle() {
    let mut srv = TestServer::start("0").await;

    let missing = srv
        .client
        .put(srv.url("/api/xelatex/session/does-not-exist"))
        .body(DOCUMENT)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(srv.workspace_entries().is_empty());

    let session = srv.new_session().await;
    for engine in ["latexmk", "xelatex"] {
        let resp = srv
            .client
            .put(srv.url(&format!("/api/xelatex/session/{}?engine={}", session, engine)))
            .body(DOCUMENT)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "engine {}", engine);
        assert!(resp.bytes().await.unwrap().starts_with(b"%PDF"));
    }

    // One latexmk run plus two xelatex runs, all in the kept workspace.
    assert_eq!(srv.runs(), 3);
    assert_eq!(
        srv.workspace_entries(),
        vec![format!("xelatex-session-{}", session)]
    );
    srv.server.shutdown().await;
}

#[tokio::test]
async fn concurrent_session_compiles_are_serialized() {
    let mut srv = TestServer::start("0.3").await;
    let session = srv.new_session().await;
    let url = srv.url(&format!("/api/xelatex/session/{}", session));

    let first = srv.client.put(&url).body(DOCUMENT).send();
    let second = srv.client.put(&url).body(DOCUMENT).send();
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().status(), StatusCode::OK);
    assert_eq!(second.unwrap().status(), StatusCode::OK);
    assert_eq!(srv.runs(), 2);
    assert!(!srv.overlapped());
    srv.server.shutdown().await;
}
