#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use mangapipe::cli::PipelineArgs;

pub struct FakeSite {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeSite {
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn args(&self, data_dir: &std::path::Path) -> PipelineArgs {
        PipelineArgs {
            base_url: self.base_url.clone(),
            data_dir: data_dir.display().to_string(),
            status_file: None,
            concurrency: 4,
            max_retries: 3,
            retry_delay_ms: 1,
            timeout_secs: 5,
            validate_covers: false,
            strict: false,
        }
    }
}

impl Drop for FakeSite {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Two list pages (page 3 is a 404), three titles and their chapters.
///
/// * `Solo Leveling`: two chapters; chapter 2's page has no images.
/// * `Eleceed`: one chapter with images.
/// * `Omniscient Reader`: detail page always answers 500.
pub fn spawn_manga_site() -> FakeSite {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let hits = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let counter = Arc::clone(&hits);
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let path = request.url().split('?').next().unwrap_or("").to_owned();
            *counter.lock().unwrap().entry(path.clone()).or_default() += 1;

            let (status, body) = route(&path);
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("build header");
            let _ = request.respond(
                tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header),
            );
        }
    });

    FakeSite {
        base_url,
        hits,
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

fn route(path: &str) -> (u16, String) {
    match path {
        "/page/1/" => (
            200,
            list_page(&[
                ("Solo Leveling", "/manga/solo-leveling/", &["Chapter 1"]),
                ("Eleceed", "/manga/eleceed/", &["Chapter 1"]),
            ]),
        ),
        "/page/2/" => (
            200,
            list_page(&[
                ("Omniscient Reader", "/manga/omniscient-reader/", &["Chapter 1"]),
                ("Solo Leveling", "/manga/solo-leveling/", &["Chapter 2"]),
            ]),
        ),
        "/manga/solo-leveling/" => (
            200,
            detail_page(
                "Ongoing",
                &["Action", "Fantasy"],
                &[
                    ("Chapter 2", "/manga/solo-leveling/chapter-2/"),
                    ("Chapter 1", "/manga/solo-leveling/chapter-1/"),
                ],
            ),
        ),
        "/manga/eleceed/" => (
            200,
            detail_page("Ongoing", &["Action"], &[("Chapter 1", "/manga/eleceed/chapter-1/")]),
        ),
        "/manga/omniscient-reader/" => (500, "upstream error".to_owned()),
        "/manga/solo-leveling/chapter-1/" => {
            (200, chapter_page(&["/img/sl-1-1.jpg", "/img/sl-1-2.jpg"]))
        }
        "/manga/solo-leveling/chapter-2/" => {
            (200, "<html><body><p>coming soon</p></body></html>".to_owned())
        }
        "/manga/eleceed/chapter-1/" => (200, chapter_page(&["/img/el-1-1.jpg"])),
        _ => (404, "not found".to_owned()),
    }
}

fn list_page(items: &[(&str, &str, &[&str])]) -> String {
    let mut html = String::from("<html><body><div class=\"page-listing-item\">");
    for (title, href, chapters) in items {
        html.push_str(&format!(
            r#"<div class="page-item-detail manga">
  <div class="item-thumb"><a href="{href}"><img src="/covers{href}cover.jpg"></a></div>
  <div class="item-summary">
    <h3 class="post-title"><a href="{href}">{title}</a></h3>
    <div class="list-chapter">"#
        ));
        for chapter in *chapters {
            let slug = chapter.to_lowercase().replace(' ', "-");
            html.push_str(&format!(
                r#"<div class="chapter-item"><span class="chapter"><a href="{href}{slug}/">{chapter}</a></span></div>"#
            ));
        }
        html.push_str("</div></div></div>");
    }
    html.push_str("</div></body></html>");
    html
}

fn detail_page(status: &str, genres: &[&str], chapters: &[(&str, &str)]) -> String {
    let genres = genres
        .iter()
        .map(|g| format!(r#"<a href="/genre/{g}/">{g}</a>"#))
        .collect::<Vec<_>>()
        .join(", ");
    let chapters = chapters
        .iter()
        .map(|(title, href)| {
            format!(
                r#"<li class="wp-manga-chapter"><a href="{href}">{title}</a><span class="chapter-release-date"><i>March 1, 2024</i></span></li>"#
            )
        })
        .collect::<String>();
    format!(
        r##"<html><body>
<div class="summary_image"><a href="#"><img data-src="/covers/detail.jpg"></a></div>
<div class="post-content_item"><div class="summary-heading"><h5>Rank</h5></div><div class="summary-content">5th</div></div>
<div class="post-content_item"><div class="summary-heading"><h5>Status</h5></div><div class="summary-content">{status}</div></div>
<div class="genres-content">{genres}</div>
<div class="add-bookmark"><div class="action_detail"><span>1,024 Users bookmarked This</span></div></div>
<div class="description-summary"><div class="summary__content"><p>A hunter story.</p></div></div>
<div class="listing-chapters_wrap"><ul class="main version-chap">{chapters}</ul></div>
</body></html>"##
    )
}

fn chapter_page(images: &[&str]) -> String {
    let images = images
        .iter()
        .map(|src| {
            format!(
                r#"<div class="page-break"><img class="wp-manga-chapter-img" src=" {src} "></div>"#
            )
        })
        .collect::<String>();
    format!(r#"<html><body><div class="reading-content">{images}</div></body></html>"#)
}
