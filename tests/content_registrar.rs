//! Content registrar behaviour against real directories.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use futures_util::future::join_all;
use serde_json::json;

use oppy::content::{FnHandler, Handler, HandlerError};

mod common;
use common::{get, registrar, send, write};

const WIDGET_UNIT: &str = r#"
handler = "respond"
[options]
body = "widget"
"#;

#[tokio::test]
async fn small_files_are_cached_and_large_files_stream() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "index.html", "0123456789");
    let big: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    write(dir.path(), "big.bin", &big);

    let registrar = registrar(dir.path(), json!({}));
    let summary = registrar.reload_file_system().await;
    assert_eq!(summary.added, 2);
    assert_eq!(summary.failed, 0);

    let files = registrar.file_handler();
    assert!(files.is_cached("/index.html"));
    assert!(files.is_indexed("/big.bin"));
    assert!(!files.is_cached("/big.bin"));

    let (status, body) = get(&registrar, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"0123456789");

    let (status, body) = get(&registrar, "/big.bin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), big.len());
    assert!(body[..] == big[..]);

    let (status, body) = send(&registrar, Method::HEAD, "/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn cache_ceiling_comes_from_host_config() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.html", "x".repeat(100));

    let registrar = registrar(dir.path(), json!({ "file": { "maxCachePerFile": 10 } }));
    registrar.reload_file_system().await;

    assert_eq!(registrar.file_handler().max_cache_per_file(), 10);
    assert!(!registrar.file_handler().is_cached("/page.html"));
    let (status, body) = get(&registrar, "/page.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), 100);
}

#[tokio::test]
async fn deleting_a_file_falls_through_to_404() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "index.html", "0123456789");

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;
    assert_eq!(get(&registrar, "/").await.0, StatusCode::OK);

    std::fs::remove_file(dir.path().join("index.html")).unwrap();
    let summary = registrar.reload_file_system().await;
    assert_eq!(summary.removed, 1);

    assert!(!registrar.file_handler().is_cached("/index.html"));
    assert_eq!(get(&registrar, "/").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(&registrar, "/index.html").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unit_claims_its_namesakes_and_everything_below() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/widget.unit", WIDGET_UNIT);
    write(dir.path(), "a/widget.html", "static widget");
    write(dir.path(), "a/widget/index.html", "static index");
    write(dir.path(), "a/widget/sub/page.html", "static page");
    write(dir.path(), "a/other.html", "other");

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;

    for path in [
        "/a/widget",
        "/a/widget/",
        "/a/widget.html",
        "/a/widget/index.html",
        "/a/widget/sub",
        "/a/widget/sub/page.html",
    ] {
        let (status, body) = get(&registrar, path).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(&body[..], b"widget", "{path}");
    }

    let (status, body) = get(&registrar, "/a/other.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"other");
}

#[tokio::test]
async fn files_added_under_a_unit_directory_later_are_claimed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/widget.unit", WIDGET_UNIT);
    write(dir.path(), "a/widget/index.html", "static index");

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;
    assert_eq!(registrar.script_handler().unit_count(), 1);

    write(dir.path(), "a/widget/new/p.html", "static p");
    write(dir.path(), "a/widget/x/y/z.html", "static z");
    let summary = registrar.reload_file_system().await;
    assert_eq!(summary.added, 2);

    let routes = registrar.script_handler().routes();
    for path in [
        "/a/widget/new/p.html",
        "/a/widget/new",
        "/a/widget/x/y/z.html",
        "/a/widget/x/y",
        "/a/widget/x",
    ] {
        assert!(routes.iter().any(|r| r == path), "{path} missing from {routes:?}");
        let (status, body) = get(&registrar, path).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(&body[..], b"widget", "{path}");
    }
    assert!(!routes.iter().any(|r| r == "/a"));
}

#[tokio::test]
async fn deeper_unit_owns_files_in_its_own_directory() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.unit", "handler = \"respond\"\n[options]\nbody = \"outer\"\n");
    write(dir.path(), "a/widget.unit", WIDGET_UNIT);

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;
    assert_eq!(registrar.script_handler().unit_count(), 2);

    write(dir.path(), "a/widget/late.html", "static late");
    registrar.reload_file_system().await;

    for _ in 0..3 {
        let (status, body) = get(&registrar, "/a/widget/late.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"widget");
    }
}

#[tokio::test]
async fn idle_reload_after_reads_changes_nothing_visible() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "index.html", "home");
    write(dir.path(), "about.html", "about");
    write(dir.path(), "widget.unit", WIDGET_UNIT);

    let registrar = registrar(dir.path(), json!({}));
    assert_eq!(registrar.reload_file_system().await.added, 3);
    assert_eq!(&get(&registrar, "/").await.1[..], b"home");
    let routes = registrar.script_handler().routes();

    // access times are part of the fingerprint, so read files may be
    // reported as modified once; nothing may be added or removed
    let summary = registrar.reload_file_system().await;
    assert_eq!(summary.added + summary.removed + summary.failed, 0, "{summary:?}");
    assert!(summary.modified <= 3, "{summary:?}");

    assert_eq!(registrar.snapshot().len(), 3);
    assert_eq!(registrar.script_handler().unit_count(), 1);
    assert_eq!(registrar.script_handler().routes(), routes);
    assert_eq!(&get(&registrar, "/").await.1[..], b"home");
    assert_eq!(&get(&registrar, "/about.html").await.1[..], b"about");
    assert_eq!(&get(&registrar, "/widget").await.1[..], b"widget");
}

#[tokio::test]
async fn unit_sources_are_never_served_raw() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "widget.unit", WIDGET_UNIT);

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;

    assert!(!registrar.file_handler().is_indexed("/widget.unit"));
    let (_, body) = get(&registrar, "/widget.unit").await;
    assert_eq!(&body[..], b"widget");
}

#[tokio::test]
async fn broken_units_fail_closed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.unit", "handler = [not toml");
    write(dir.path(), "anonymous.unit", "matching = \"ExactMatch\"\n");
    write(dir.path(), "unknown.unit", "handler = \"nope\"\n");

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;

    let script = registrar.script_handler();
    assert_eq!(script.unit_count(), 0);
    for path in ["/broken.unit", "/anonymous.unit", "/unknown.unit"] {
        assert!(!registrar.file_handler().is_indexed(path), "{path}");
        assert_eq!(get(&registrar, path).await.0, StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn recompiling_a_unit_replaces_it_and_deleting_it_restores_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "widget.unit", WIDGET_UNIT);
    write(dir.path(), "widget.html", "static widget");

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;
    assert_eq!(&get(&registrar, "/widget.html").await.1[..], b"widget");

    write(
        dir.path(),
        "widget.unit",
        "handler = \"respond\"\nmatching = \"ExactMatch\"\n[options]\nbody = \"widget v2\"\nstatus = 201\n",
    );
    let summary = registrar.reload_file_system().await;
    // reads of widget.html may also have moved its access time
    assert!((1..=2).contains(&summary.modified), "{summary:?}");
    assert_eq!(summary.added + summary.removed + summary.failed, 0);

    let (status, body) = get(&registrar, "/widget").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(&body[..], b"widget v2");
    assert_eq!(registrar.script_handler().unit_count(), 1);
    // exact matching no longer claims the sibling page
    assert_eq!(&get(&registrar, "/widget.html").await.1[..], b"static widget");

    std::fs::remove_file(dir.path().join("widget.unit")).unwrap();
    registrar.reload_file_system().await;

    assert_eq!(registrar.script_handler().unit_count(), 0);
    assert!(registrar.script_handler().routes().is_empty());
    let (status, body) = get(&registrar, "/widget.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"static widget");
}

#[tokio::test]
async fn standalone_handlers_are_replaced_not_duplicated() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "index.html", "home");
    write(
        dir.path(),
        "banner.unit",
        "handler = \"respond\"\nstandalone = true\n[options]\nbody = \"maintenance\"\n",
    );

    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;
    assert_eq!(registrar.pipeline().len(), 3);
    assert_eq!(registrar.script_handler().standalone_count(), 1);
    assert_eq!(&get(&registrar, "/anything").await.1[..], b"maintenance");

    write(
        dir.path(),
        "banner.unit",
        "handler = \"respond\"\nstandalone = true\n[options]\nbody = \"maintenance, again\"\n",
    );
    registrar.reload_file_system().await;
    assert_eq!(registrar.pipeline().len(), 3);
    assert_eq!(&get(&registrar, "/").await.1[..], b"maintenance, again");

    std::fs::remove_file(dir.path().join("banner.unit")).unwrap();
    registrar.reload_file_system().await;
    assert_eq!(registrar.pipeline().len(), 2);
    assert_eq!(registrar.script_handler().standalone_count(), 0);
    assert_eq!(&get(&registrar, "/").await.1[..], b"home");
    assert_eq!(get(&registrar, "/anything").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handler_failures_become_500() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "index.html", "home");
    let registrar = registrar(dir.path(), json!({}));
    registrar.reload_file_system().await;

    let failing: Arc<dyn Handler> = Arc::new(FnHandler::new("failing", |ctx, next| {
        Box::pin(async move {
            match ctx.oppy_path().as_str() {
                "/error" => Err(HandlerError::other("backend unavailable")),
                "/panic" => panic!("handler exploded"),
                _ => next.run(ctx).await,
            }
        })
    }));
    registrar.insert_handler(0, failing.clone());

    let (status, body) = get(&registrar, "/error").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!String::from_utf8_lossy(&body).contains("backend unavailable"));
    assert_eq!(get(&registrar, "/panic").await.0, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&get(&registrar, "/").await.1[..], b"home");

    assert!(registrar.remove_handler(&failing));
    assert_eq!(get(&registrar, "/error").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn custom_error_page_template() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "errors/page.html", "<h1>custom {{code}}: {{reason}}</h1>");

    let registrar = registrar(dir.path(), json!({ "errorPage": "errors/page.html" }));
    registrar.reload_file_system().await;

    let (status, body) = get(&registrar, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"<h1>custom 404: Not Found</h1>");
}

#[tokio::test]
async fn concurrent_reloads_settle_on_the_disk_state() {
    let dir = tempfile::tempdir().unwrap();
    let registrar = registrar(dir.path(), json!({}));

    let writer = {
        let root = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            for i in 0..20 {
                write(&root, &format!("f{i}.txt"), format!("file {i}"));
                if i % 3 == 0 {
                    std::fs::remove_file(root.join(format!("f{i}.txt"))).unwrap();
                }
            }
        })
    };
    let reloads = join_all((0..8).map(|_| registrar.reload_file_system())).await;
    writer.await.unwrap();
    assert!(reloads.iter().all(|summary| summary.failed == 0));

    registrar.reload_file_system().await;
    let snapshot = registrar.snapshot();
    for i in 0..20 {
        let oppy_path = format!("/f{i}.txt");
        let on_disk = dir.path().join(format!("f{i}.txt")).exists();
        assert_eq!(registrar.file_handler().is_indexed(&oppy_path), on_disk, "{oppy_path}");
        assert_eq!(
            snapshot.keys().any(|p| p.ends_with(format!("f{i}.txt"))),
            on_disk,
            "{oppy_path}"
        );
    }
}

#[tokio::test]
async fn watcher_picks_up_new_files() {
    let dir = tempfile::tempdir().unwrap();
    let registrar = registrar(dir.path(), json!({ "watch": { "debounceMs": 10 } }));
    registrar.activate().await;
    assert_eq!(get(&registrar, "/late.html").await.0, StatusCode::NOT_FOUND);

    write(dir.path(), "late.html", "late");

    let registrar_ref = registrar.clone();
    let served = common::eventually(Duration::from_secs(10), move || {
        let registrar = registrar_ref.clone();
        async move { get(&registrar, "/late.html").await.0 == StatusCode::OK }
    })
    .await;
    registrar.deactivate();
    assert!(served);
}

#[tokio::test]
async fn lambda_handlers_answer_requests() {
    let dir = tempfile::tempdir().unwrap();
    let registrar = registrar(dir.path(), json!({}));
    registrar.push_handler(Arc::new(FnHandler::new("teapot", |_ctx, _next| {
        Box::pin(async { Ok(StatusCode::IM_A_TEAPOT.into_response()) })
    })));
    registrar.reload_file_system().await;

    assert_eq!(get(&registrar, "/tea").await.0, StatusCode::IM_A_TEAPOT);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_files_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let shared = tempfile::tempdir().unwrap();
    write(shared.path(), "shared.css", "body { margin: 0 }");
    std::os::unix::fs::symlink(shared.path().join("shared.css"), dir.path().join("shared.css")).unwrap();

    let registrar = registrar(dir.path(), json!({}));
    let summary = registrar.reload_file_system().await;
    assert_eq!(summary.added, 1);

    let (status, body) = get(&registrar, "/shared.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"body { margin: 0 }");
}
