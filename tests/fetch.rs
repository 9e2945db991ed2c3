mod stub;

use std::path::Path;
use std::time::{Duration, Instant};

use histoslide::config::PipelineConfig;
use histoslide::fetch::{FetchError, Fetcher};
use stub::{StubResponse, StubServer, image_bytes};
use tokio_util::sync::CancellationToken;

fn fetcher() -> anyhow::Result<Fetcher> {
    let mut config = PipelineConfig::default();
    config.limits.max_redirects = 3;
    config.limits.download_timeout_secs = 10;
    Fetcher::new(&config)
}

fn image_server() -> StubServer {
    StubServer::spawn(|req| match req.path.as_str() {
        "/loop" => StubResponse::redirect("/loop"),
        "/hop1" => StubResponse::redirect("/hop2"),
        "/hop2" => StubResponse::redirect("/files/big.jpg"),
        "/files/big.jpg" => StubResponse::bytes(image_bytes(20_000), "image/jpeg"),
        "/files/tiny.jpg" => StubResponse::bytes(b"0123456789".to_vec(), "image/jpeg"),
        "/no-location" => StubResponse::status(302),
        "/slow.jpg" => {
            std::thread::sleep(Duration::from_millis(1_500));
            StubResponse::bytes(image_bytes(20_000), "image/jpeg")
        }
        _ => StubResponse::status(404),
    })
}

fn live() -> CancellationToken {
    CancellationToken::new()
}

fn dir_entries(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    names.sort_unstable();
    Ok(names)
}

#[tokio::test]
async fn self_redirect_is_rejected_with_too_many_redirects() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("loop.jpg");

    let err = fetcher()?
        .fetch(&format!("{}/loop", server.base_url), &dest, None, &live())
        .await
        .expect_err("self redirect must fail");

    assert!(matches!(err, FetchError::TooManyRedirects { limit: 3 }), "{err:?}");
    assert!(!dest.exists());
    assert_eq!(server.hits("/loop"), 4);
    Ok(())
}

#[tokio::test]
async fn undersized_body_is_deleted() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("tiny.jpg");

    let err = fetcher()?
        .fetch(&format!("{}/files/tiny.jpg", server.base_url), &dest, None, &live())
        .await
        .expect_err("10-byte body must be rejected");

    assert!(matches!(err, FetchError::TooSmall(10)), "{err:?}");
    assert!(!dest.exists());
    assert!(dir_entries(temp.path())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn redirects_are_followed_with_headers_kept() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("nested").join("big.jpg");

    let bytes = fetcher()?
        .fetch(
            &format!("{}/hop1", server.base_url),
            &dest,
            Some("https://catalog.example/"),
            &live(),
        )
        .await?;

    assert_eq!(bytes, 20_000);
    assert_eq!(std::fs::metadata(&dest)?.len(), 20_000);
    assert_eq!(dir_entries(&temp.path().join("nested"))?, vec!["big.jpg"]);

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.referer.as_deref(), Some("https://catalog.example/"));
        assert!(
            request
                .user_agent
                .as_deref()
                .is_some_and(|ua| ua.starts_with("Mozilla/5.0"))
        );
    }
    Ok(())
}

#[tokio::test]
async fn bad_status_removes_stale_file() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("missing.jpg");
    std::fs::write(&dest, b"stale")?;

    let fetcher = fetcher()?;
    let err = fetcher
        .fetch(&format!("{}/missing.jpg", server.base_url), &dest, None, &live())
        .await
        .expect_err("404 must fail");
    assert!(matches!(err, FetchError::BadStatus(404)), "{err:?}");
    assert!(!dest.exists());

    let err = fetcher
        .fetch(&format!("{}/no-location", server.base_url), &dest, None, &live())
        .await
        .expect_err("redirect without location must fail");
    assert!(matches!(err, FetchError::BadStatus(302)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn connection_failure_is_a_network_error() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("down.jpg");

    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };

    let err = fetcher()?
        .fetch(&format!("http://{addr}/image.jpg"), &dest, None, &live())
        .await
        .expect_err("closed port must fail");
    assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    assert!(!dest.exists());
    Ok(())
}

#[tokio::test]
async fn validate_existing_deletes_undersized_files() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let small = temp.path().join("small.png");
    let large = temp.path().join("large.png");
    std::fs::write(&small, vec![0_u8; 8_000])?;
    std::fs::write(&large, vec![0_u8; 8_001])?;

    let fetcher = fetcher()?;
    assert!(!fetcher.validate_existing(&small).await?);
    assert!(!small.exists());
    assert!(fetcher.validate_existing(&large).await?);
    assert!(!fetcher.validate_existing(&temp.path().join("absent.png")).await?);
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_download_in_flight() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("slow.jpg");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = fetcher()?
        .fetch(&format!("{}/slow.jpg", server.base_url), &dest, None, &cancel)
        .await
        .expect_err("cancelled download must fail");

    assert!(matches!(err, FetchError::Cancelled), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert!(dir_entries(temp.path())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn already_cancelled_token_sends_nothing() -> anyhow::Result<()> {
    let server = image_server();
    let temp = tempfile::TempDir::new()?;
    let dest = temp.path().join("big.jpg");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fetcher()?
        .fetch(&format!("{}/files/big.jpg", server.base_url), &dest, None, &cancel)
        .await
        .expect_err("cancelled download must fail");

    assert!(matches!(err, FetchError::Cancelled), "{err:?}");
    assert!(server.requests().is_empty());
    Ok(())
}
