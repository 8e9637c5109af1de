//! Field extraction for the three page kinds of a Madara-style manga site.
//!
//! Every function here is pure: the same markup, page URL and anchor date
//! always produce the same output.

use std::sync::LazyLock;

use chrono::{Days, Months, NaiveDate};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::formats::{Chapter, ChapterLink, TitleRecord, TitleSummary};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{kind} markup did not match the expected layout")]
    UnexpectedMarkup { kind: &'static str },
    #[error("chapter page has no images")]
    NoImages,
    #[error("invalid css selector {selector:?}: {reason}")]
    InvalidSelector { selector: &'static str, reason: String },
}

/// Fields of a title detail page. Title and URL come from discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    pub cover: Option<String>,
    pub rank: Option<String>,
    pub alternative_titles: Vec<String>,
    pub genres: Vec<String>,
    pub status: Option<String>,
    pub bookmark_count: u64,
    pub summary: String,
    /// In page order; callers sort.
    pub chapters: Vec<Chapter>,
}

impl DetailPage {
    pub fn into_record(self, title: &str, url: &str) -> TitleRecord {
        let mut record = TitleRecord::new(title, url);
        record.cover = self.cover;
        record.rank = self.rank;
        record.alternative_titles = self.alternative_titles;
        record.genres = self.genres;
        record.status = self.status;
        record.bookmark_count = self.bookmark_count;
        record.summary = self.summary;
        record.chapters = self.chapters;
        record
    }
}

pub fn parse_list_page(html: &str, page_url: &Url) -> Result<Vec<TitleSummary>, ParseError> {
    let document = Html::parse_document(html);
    let item_sel = selector(".page-item-detail")?;
    let title_sel = selector(".post-title a")?;
    let thumb_sel = selector(".item-thumb img")?;
    let chapter_sel = selector(".list-chapter .chapter-item a")?;

    let items = document.select(&item_sel).collect::<Vec<_>>();
    if items.is_empty() {
        return Err(ParseError::UnexpectedMarkup { kind: "list page" });
    }

    let mut summaries = Vec::new();
    for item in items {
        let Some(title_link) = item.select(&title_sel).next() else {
            continue;
        };
        let title = text_of(title_link);
        let Some(href) = attr(title_link, "href") else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let image = item
            .select(&thumb_sel)
            .next()
            .and_then(image_source)
            .map(|src| resolve(page_url, &src));

        let chapters = item
            .select(&chapter_sel)
            .filter_map(|a| {
                let chapter_url = attr(a, "href")?;
                Some(ChapterLink {
                    chapter_title: text_of(a),
                    chapter_url: resolve(page_url, &chapter_url),
                })
            })
            .collect();

        summaries.push(TitleSummary {
            title,
            url: resolve(page_url, &href),
            image,
            chapters,
        });
    }

    Ok(summaries)
}

pub fn parse_detail_page(
    html: &str,
    page_url: &Url,
    today: NaiveDate,
) -> Result<DetailPage, ParseError> {
    let document = Html::parse_document(html);
    let content_item_sel = selector(".post-content_item")?;
    let heading_sel = selector(".summary-heading")?;
    let content_sel = selector(".summary-content")?;
    let cover_sel = selector(".summary_image img")?;
    let genre_sel = selector(".genres-content a")?;
    let bookmark_sel = selector(".add-bookmark .action_detail span")?;
    let description_sel = selector(".description-summary .summary__content")?;
    let chapter_item_sel =
        selector(".listing-chapters_wrap li.wp-manga-chapter, ul.main li.wp-manga-chapter")?;
    let link_sel = selector("a")?;
    let date_sel = selector(".chapter-release-date")?;
    let marker_sel = selector(".post-content_item, .summary_image, .listing-chapters_wrap")?;

    if document.select(&marker_sel).next().is_none() {
        return Err(ParseError::UnexpectedMarkup { kind: "detail page" });
    }

    let mut page = DetailPage::default();

    for item in document.select(&content_item_sel) {
        let Some(heading) = item.select(&heading_sel).next().map(text_of) else {
            continue;
        };
        let Some(content) = item.select(&content_sel).next().map(text_of) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        if heading.contains("Rank") {
            if page.rank.is_none() {
                page.rank = Some(content);
            }
        } else if heading.contains("Alternative") {
            page.alternative_titles = content
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
        } else if heading.contains("Status") && page.status.is_none() {
            page.status = Some(content);
        }
    }

    page.cover = document
        .select(&cover_sel)
        .next()
        .and_then(image_source)
        .map(|src| resolve(page_url, &src));
    page.genres = document
        .select(&genre_sel)
        .map(text_of)
        .filter(|g| !g.is_empty())
        .collect();
    page.bookmark_count = document
        .select(&bookmark_sel)
        .next()
        .map(text_of)
        .and_then(|text| first_integer(&text))
        .unwrap_or(0);
    page.summary = document
        .select(&description_sel)
        .next()
        .map(text_of)
        .unwrap_or_default();

    for item in document.select(&chapter_item_sel) {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let title = text_of(link);
        if title.is_empty() {
            continue;
        }
        let url = attr(link, "href")
            .map(|href| resolve(page_url, &href))
            .unwrap_or_default();
        let release_date = item
            .select(&date_sel)
            .next()
            .map(text_of)
            .filter(|text| !text.is_empty())
            .map(|text| parse_release_date(&text, today));

        page.chapters.push(Chapter {
            chapter: title,
            url,
            release_date,
            images: Vec::new(),
        });
    }

    Ok(page)
}

pub fn parse_chapter_page(html: &str, page_url: &Url) -> Result<Vec<String>, ParseError> {
    let document = Html::parse_document(html);
    let image_sel = selector("div.page-break img, img.wp-manga-chapter-img")?;

    let images = document
        .select(&image_sel)
        .filter_map(image_source)
        .map(|src| resolve(page_url, &src))
        .collect::<Vec<_>>();
    if images.is_empty() {
        return Err(ParseError::NoImages);
    }
    Ok(images)
}

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+|an?)\s*(second|sec|minute|min|hour|day|week|month|year)s?\s+ago")
        .expect("valid relative date regex")
});

const ABSOLUTE_DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"];

/// Normalizes release-date text to `DD-MM-YYYY`, anchoring relative phrases
/// on `today`. Unrecognized text becomes `today`.
pub fn parse_release_date(text: &str, today: NaiveDate) -> String {
    resolve_release_date(text, today)
        .unwrap_or(today)
        .format("%d-%m-%Y")
        .to_string()
}

fn resolve_release_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let trimmed = text.trim();
    for format in ABSOLUTE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    let lower = trimmed.to_lowercase();
    if lower.contains("yesterday") {
        return today.checked_sub_days(Days::new(1));
    }

    let captures = RELATIVE_DATE.captures(&lower)?;
    let amount = match &captures[1] {
        "a" | "an" => 1,
        digits => digits.parse::<u32>().ok()?,
    };
    match &captures[2] {
        "second" | "sec" | "minute" | "min" | "hour" => Some(today),
        "day" => today.checked_sub_days(Days::new(amount.into())),
        "week" => today.checked_sub_days(Days::new(u64::from(amount) * 7)),
        "month" => today.checked_sub_months(Months::new(amount)),
        "year" => today.checked_sub_months(Months::new(amount.saturating_mul(12))),
        _ => None,
    }
}

fn selector(css: &'static str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|err| ParseError::InvalidSelector {
        selector: css,
        reason: err.to_string(),
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Lazy-loaded images keep the real URL in `data-src`.
fn image_source(img: ElementRef<'_>) -> Option<String> {
    attr(img, "data-src").or_else(|| attr(img, "src"))
}

fn resolve(base: &Url, raw: &str) -> String {
    base.join(raw)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_owned())
}

/// First run of digits in `text`, allowing `,` thousands separators.
fn first_integer(text: &str) -> Option<u64> {
    let digits = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect::<String>();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://site.test/manga/solo/").unwrap()
    }

    const LIST_PAGE: &str = r#"<html><body>
      <div class="page-item-detail manga">
        <div class="item-thumb"><a href="/manga/solo/"><img data-src=" https://cdn.test/solo.jpg " src="placeholder.gif"></a></div>
        <div class="post-title"><h3><a href="https://site.test/manga/solo/">  Solo   Leveling </a></h3></div>
        <div class="list-chapter">
          <div class="chapter-item"><a href="/manga/solo/chapter-2/">Chapter 2</a></div>
          <div class="chapter-item"><a href="/manga/solo/chapter-1/">Chapter 1</a></div>
        </div>
      </div>
      <div class="page-item-detail manga">
        <div class="item-thumb"><img src="/covers/tower.png"></div>
        <div class="post-title"><a href="/manga/tower/">Tower</a></div>
      </div>
      <div class="page-item-detail manga"><div class="post-title">No link</div></div>
    </body></html>"#;

    #[test]
    fn list_page_yields_summaries() {
        let url = Url::parse("https://site.test/page/1/").unwrap();
        let summaries = parse_list_page(LIST_PAGE, &url).unwrap();
        assert_eq!(summaries.len(), 2);

        let solo = &summaries[0];
        assert_eq!(solo.title, "Solo Leveling");
        assert_eq!(solo.url, "https://site.test/manga/solo/");
        assert_eq!(solo.image.as_deref(), Some("https://cdn.test/solo.jpg"));
        assert_eq!(solo.chapters.len(), 2);
        assert_eq!(solo.chapters[0].chapter_title, "Chapter 2");
        assert_eq!(
            solo.chapters[0].chapter_url,
            "https://site.test/manga/solo/chapter-2/"
        );

        assert_eq!(summaries[1].image.as_deref(), Some("https://site.test/covers/tower.png"));
        assert!(summaries[1].chapters.is_empty());
    }

    #[test]
    fn list_page_without_listing_is_unexpected() {
        let url = Url::parse("https://site.test/page/9/").unwrap();
        let err = parse_list_page("<html><body>Just a moment...</body></html>", &url).unwrap_err();
        assert_eq!(err, ParseError::UnexpectedMarkup { kind: "list page" });
    }

    const DETAIL_PAGE: &str = r##"<html><body>
      <div class="summary_image"><a href="#"><img data-src="https://cdn.test/solo-big.jpg"></a></div>
      <div class="post-content">
        <div class="post-content_item"><div class="summary-heading"><h5>Rank</h5></div>
          <div class="summary-content"> 5th, it has 1.2K monthly views </div></div>
        <div class="post-content_item"><div class="summary-heading"><h5>Alternative</h5></div>
          <div class="summary-content">Na Honjaman, 나 혼자만 레벨업 , </div></div>
        <div class="genres-content"><a href="/g/action">Action</a>, <a href="/g/fantasy">Fantasy</a></div>
      </div>
      <div class="post-status">
        <div class="post-content_item"><div class="summary-heading"><h5>Status</h5></div>
          <div class="summary-content">OnGoing</div></div>
      </div>
      <div class="add-bookmark"><div class="action_detail"><span>Users bookmarked: 1523</span></div></div>
      <div class="description-summary"><div class="summary__content"><p>Hunters.</p><p>Gates   open.</p></div></div>
      <div class="listing-chapters_wrap"><ul class="main">
        <li class="wp-manga-chapter"><a href="/manga/solo/chapter-3/"> Chapter 3 </a>
          <span class="chapter-release-date"><i>2 days ago</i></span></li>
        <li class="wp-manga-chapter"><a href="chapter-1/">Chapter 1</a>
          <span class="chapter-release-date"><i>January 5, 2024</i></span></li>
        <li class="wp-manga-chapter"><a href="chapter-2/">Chapter 2</a></li>
      </ul></div>
    </body></html>"##;

    #[test]
    fn detail_page_extracts_fields() {
        let page = parse_detail_page(DETAIL_PAGE, &base(), today()).unwrap();
        assert_eq!(page.cover.as_deref(), Some("https://cdn.test/solo-big.jpg"));
        assert_eq!(page.rank.as_deref(), Some("5th, it has 1.2K monthly views"));
        assert_eq!(page.alternative_titles, ["Na Honjaman", "나 혼자만 레벨업"]);
        assert_eq!(page.genres, ["Action", "Fantasy"]);
        assert_eq!(page.status.as_deref(), Some("OnGoing"));
        assert_eq!(page.bookmark_count, 1523);
        assert_eq!(page.summary, "Hunters. Gates open.");

        let chapters = page
            .chapters
            .iter()
            .map(|c| (c.chapter.as_str(), c.url.as_str(), c.release_date.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(
            chapters,
            [
                ("Chapter 3", "https://site.test/manga/solo/chapter-3/", Some("08-03-2024")),
                ("Chapter 1", "https://site.test/manga/solo/chapter-1/", Some("05-01-2024")),
                ("Chapter 2", "https://site.test/manga/solo/chapter-2/", None),
            ]
        );
    }

    #[test]
    fn detail_page_into_record_keeps_discovery_identity() {
        let page = parse_detail_page(DETAIL_PAGE, &base(), today()).unwrap();
        let record = page.into_record("Solo Leveling", "https://site.test/manga/solo/");
        assert_eq!(record.slug, "solo-leveling");
        assert_eq!(record.title, "Solo Leveling");
        assert_eq!(record.chapters.len(), 3);
    }

    #[test]
    fn detail_page_without_markers_is_unexpected() {
        let err = parse_detail_page("<html><body><p>404</p></body></html>", &base(), today())
            .unwrap_err();
        assert_eq!(err, ParseError::UnexpectedMarkup { kind: "detail page" });
    }

    #[test]
    fn chapter_page_prefers_data_src_and_drops_empties() {
        let html = r#"<div class="reading-content">
          <div class="page-break"><img class="wp-manga-chapter-img" data-src="  https://cdn.test/1.jpg " src="lazy.gif"></div>
          <div class="page-break"><img class="wp-manga-chapter-img" data-src="" src="https://cdn.test/2.jpg"></div>
          <div class="page-break"><img class="wp-manga-chapter-img" data-src=" " src=""></div>
          <div class="page-break"><img class="wp-manga-chapter-img" src="3.jpg"></div>
        </div>"#;
        let url = Url::parse("https://site.test/manga/solo/chapter-1/").unwrap();
        let images = parse_chapter_page(html, &url).unwrap();
        assert_eq!(
            images,
            [
                "https://cdn.test/1.jpg",
                "https://cdn.test/2.jpg",
                "https://site.test/manga/solo/chapter-1/3.jpg"
            ]
        );
    }

    #[test]
    fn chapter_page_without_images_fails() {
        let url = Url::parse("https://site.test/c/").unwrap();
        assert_eq!(
            parse_chapter_page("<div class='reading-content'></div>", &url),
            Err(ParseError::NoImages)
        );
    }

    #[test]
    fn relative_dates_anchor_on_today() {
        assert_eq!(parse_release_date("2 days ago", today()), "08-03-2024");
        assert_eq!(parse_release_date("yesterday", today()), "09-03-2024");
        assert_eq!(parse_release_date("Yesterday", today()), "09-03-2024");
        assert_eq!(parse_release_date("5 hours ago", today()), "10-03-2024");
        assert_eq!(parse_release_date("an hour ago", today()), "10-03-2024");
        assert_eq!(parse_release_date("30 mins ago", today()), "10-03-2024");
        assert_eq!(parse_release_date("2 weeks ago", today()), "25-02-2024");
        assert_eq!(parse_release_date("1 month ago", today()), "10-02-2024");
    }

    #[test]
    fn absolute_dates_are_reformatted() {
        assert_eq!(parse_release_date("January 5, 2024", today()), "05-01-2024");
        assert_eq!(parse_release_date("Feb 29, 2024", today()), "29-02-2024");
        assert_eq!(parse_release_date("07-11-2023", today()), "07-11-2023");
        assert_eq!(parse_release_date("2023-11-07", today()), "07-11-2023");
    }

    #[test]
    fn unparseable_dates_fall_back_to_today() {
        assert_eq!(parse_release_date("NEW", today()), "10-03-2024");
        assert_eq!(parse_release_date("", today()), "10-03-2024");
    }

    #[test]
    fn bookmark_counts_accept_thousands_separators() {
        assert_eq!(first_integer("1,024 Users bookmarked This"), Some(1024));
        assert_eq!(first_integer("Users bookmarked: 87"), Some(87));
        assert_eq!(first_integer("nobody yet"), None);
    }
}
