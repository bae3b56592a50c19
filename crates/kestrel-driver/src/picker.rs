use crate::race::RaceSet;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::cdp::browser_protocol::target::EventTargetCreated;
use chromiumoxide::page::Page;
use futures::StreamExt;
use kestrel_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

const RESCAN_INTERVAL: Duration = Duration::from_millis(200);

/// Optional hints narrowing which window to pick.
#[derive(Debug, Clone, Default)]
pub struct PageHints {
    pub title_contains: Option<String>,
    pub url_includes: Option<String>,
}

impl PageHints {
    pub fn is_empty(&self) -> bool {
        self.title_contains.is_none() && self.url_includes.is_none()
    }

    fn describe(&self) -> String {
        match (&self.title_contains, &self.url_includes) {
            (Some(t), Some(u)) => format!("title~\"{}\" url~\"{}\"", t, u),
            (Some(t), None) => format!("title~\"{}\"", t),
            (None, Some(u)) => format!("url~\"{}\"", u),
            (None, None) => "any window".to_string(),
        }
    }
}

/// Transient result of scoring; never persisted.
pub struct PickedWindow {
    pub page: Page,
    pub url: String,
    pub title: String,
    pub score: i32,
}

/// Score one page against the hints.
///
/// Base 0; +5 for app-local schemes (file: or a custom app scheme - plain
/// web and devtools-internal pages get nothing); +4 per matching hint.
pub fn score_page(url: &str, title: &str, hints: &PageHints) -> i32 {
    let mut score = 0;
    if has_preferred_scheme(url) {
        score += 5;
    }
    if let Some(needle) = &hints.title_contains {
        if title.to_lowercase().contains(&needle.to_lowercase()) {
            score += 4;
        }
    }
    if let Some(needle) = &hints.url_includes {
        if url.contains(needle.as_str()) {
            score += 4;
        }
    }
    score
}

// Network and browser-internal schemes; everything else (file: or a custom
// app scheme, which cannot be enumerated up front) counts as app-local.
const NON_APP_SCHEMES: &[&str] = &[
    "http",
    "https",
    "ws",
    "wss",
    "ftp",
    "data",
    "blob",
    "javascript",
    "about",
    "devtools",
    "chrome",
    "chrome-extension",
    "chrome-error",
    "view-source",
];

fn has_preferred_scheme(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => !NON_APP_SCHEMES.contains(&parsed.scheme()),
        Err(_) => false,
    }
}

/// Whether the page satisfies every hint the caller actually specified.
/// Unspecified hints constrain nothing.
pub fn satisfies_specified_hints(url: &str, title: &str, hints: &PageHints) -> bool {
    if let Some(needle) = &hints.title_contains {
        if !title.to_lowercase().contains(&needle.to_lowercase()) {
            return false;
        }
    }
    if let Some(needle) = &hints.url_includes {
        if !url.contains(needle.as_str()) {
            return false;
        }
    }
    true
}

/// Pick the best candidate index from `(url, title)` pairs, or `None`.
///
/// With `require_match`, candidates failing any specified hint are excluded
/// outright rather than merely scored lower.
pub fn select_best(candidates: &[(String, String)], hints: &PageHints, require_match: bool) -> Option<(usize, i32)> {
    let mut best: Option<(usize, i32)> = None;
    for (index, (url, title)) in candidates.iter().enumerate() {
        if require_match && !satisfies_specified_hints(url, title, hints) {
            continue;
        }
        let score = score_page(url, title, hints);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((index, score));
        }
    }
    best
}

async fn page_snapshot(page: &Page) -> (String, String) {
    let url = page.url().await.ok().flatten().unwrap_or_default();
    let title = page.get_title().await.ok().flatten().unwrap_or_default();
    (url, title)
}

/// Scan all open pages and return the highest-scoring one.
pub async fn pick_best_page(
    browser: &Arc<Browser>,
    hints: &PageHints,
    require_match: bool,
) -> Result<PickedWindow> {
    let pages = browser
        .pages()
        .await
        .map_err(|e| Error::Cdp(e.to_string()))?;

    let mut candidates = Vec::with_capacity(pages.len());
    for page in &pages {
        let (url, title) = page_snapshot(page).await;
        candidates.push((url, title));
    }

    match select_best(&candidates, hints, require_match) {
        Some((index, score)) => {
            let (url, title) = candidates[index].clone();
            Ok(PickedWindow {
                page: pages[index].clone(),
                url,
                title,
                score,
            })
        }
        None => Err(Error::NoPage {
            hint: hints.describe(),
        }),
    }
}

/// Resolve immediately when a matching window is already open; otherwise
/// race "a matching window appears" across every currently open browsing
/// context plus new-target notifications, with a periodic rescan backstop.
/// The first branch to produce a match cancels the rest, so losing waits
/// settle silently.
pub async fn wait_for_window(
    browser: &Arc<Browser>,
    timeout: Duration,
    hints: &PageHints,
) -> Result<PickedWindow> {
    if let Ok(picked) = pick_best_page(browser, hints, true).await {
        return Ok(picked);
    }

    let mut race: RaceSet<PickedWindow> = RaceSet::new();

    // New top-level targets.
    {
        let browser = browser.clone();
        let hints = hints.clone();
        race.spawn(async move {
            let mut events = browser.event_listener::<EventTargetCreated>().await.ok()?;
            while let Some(event) = events.next().await {
                if event.target_info.r#type != "page" {
                    continue;
                }
                if let Ok(picked) = pick_best_page(&browser, &hints, true).await {
                    return Some(picked);
                }
            }
            None
        });
    }

    // Navigations of already-open pages can turn them into a match.
    if let Ok(pages) = browser.pages().await {
        for page in pages {
            let browser = browser.clone();
            let hints = hints.clone();
            race.spawn(async move {
                let mut events = page.event_listener::<EventFrameNavigated>().await.ok()?;
                while events.next().await.is_some() {
                    if let Ok(picked) = pick_best_page(&browser, &hints, true).await {
                        return Some(picked);
                    }
                }
                None
            });
        }
    }

    // Backstop for anything the event streams miss.
    {
        let browser = browser.clone();
        let hints = hints.clone();
        race.spawn(async move {
            loop {
                tokio::time::sleep(RESCAN_INTERVAL).await;
                if let Ok(picked) = pick_best_page(&browser, &hints, true).await {
                    return Some(picked);
                }
            }
        });
    }

    race.first(timeout, &format!("window matching {}", hints.describe()))
        .await
}

/// Immediate match or `E_NO_PAGE` - never waits. Distinct from the timeout
/// failure of [`wait_for_window`].
pub async fn switch_window(browser: &Arc<Browser>, hints: &PageHints) -> Result<PickedWindow> {
    pick_best_page(browser, hints, true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(title: Option<&str>, url: Option<&str>) -> PageHints {
        PageHints {
            title_contains: title.map(|s| s.to_string()),
            url_includes: url.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_app_scheme_scores_over_web() {
        let none = PageHints::default();
        assert_eq!(score_page("file:///opt/app/index.html", "App", &none), 5);
        assert_eq!(score_page("app://main/window", "App", &none), 5);
        assert_eq!(score_page("https://example.com", "App", &none), 0);
        assert_eq!(score_page("devtools://devtools/inspector.html", "DevTools", &none), 0);
        assert_eq!(score_page("not a url", "x", &none), 0);
    }

    #[test]
    fn test_network_schemes_are_not_app_local() {
        let none = PageHints::default();
        assert_eq!(score_page("ftp://host/file", "x", &none), 0);
        assert_eq!(score_page("ws://host/socket", "x", &none), 0);
        assert_eq!(score_page("data:text/html,hi", "x", &none), 0);
        // Custom app schemes stay preferred.
        assert_eq!(score_page("myapp://window/main", "x", &none), 5);
    }

    #[test]
    fn test_hint_scores_stack() {
        let both = hints(Some("settings"), Some("settings.html"));
        let score = score_page("file:///app/settings.html", "App Settings", &both);
        assert_eq!(score, 5 + 4 + 4);

        let title_only = score_page("https://example.com/settings.html", "App Settings", &hints(Some("settings"), None));
        assert_eq!(title_only, 4);
    }

    #[test]
    fn test_title_matching_is_case_insensitive() {
        let h = hints(Some("SETTINGS"), None);
        assert_eq!(score_page("https://x", "app settings", &h), 4);
    }

    #[test]
    fn test_require_match_excludes_non_matching() {
        let candidates = vec![
            ("file:///app/main.html".to_string(), "Main".to_string()),
            ("file:///app/settings.html".to_string(), "Settings".to_string()),
        ];
        let h = hints(Some("settings"), None);

        // Without require_match the main window still competes (and would
        // tie on scheme score alone).
        let (index, _) = select_best(&candidates, &h, false).unwrap();
        assert_eq!(index, 1);

        // With require_match, only the satisfying page is considered.
        let (index, score) = select_best(&candidates, &h, true).unwrap();
        assert_eq!(index, 1);
        assert_eq!(score, 9);

        let impossible = hints(Some("nonexistent"), None);
        assert!(select_best(&candidates, &impossible, true).is_none());
    }

    #[test]
    fn test_empty_hints_match_anything() {
        let candidates = vec![("https://example.com".to_string(), "x".to_string())];
        let h = PageHints::default();
        assert!(satisfies_specified_hints("https://example.com", "x", &h));
        assert!(select_best(&candidates, &h, true).is_some());
    }

    #[test]
    fn test_no_candidates_is_none() {
        assert!(select_best(&[], &PageHints::default(), false).is_none());
    }

    #[test]
    fn test_describe_names_the_hints() {
        assert!(hints(Some("t"), Some("u")).describe().contains("title~"));
        assert_eq!(PageHints::default().describe(), "any window");
    }

    #[tokio::test]
    async fn test_matching_window_on_second_of_three_sources() {
        // Simulates three browsing contexts raced for a matching window:
        // only the second ever produces one. Losers' settlement must be
        // silent, and the winner's url/title must come through.
        let mut race: RaceSet<(String, String)> = RaceSet::new();
        race.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            None
        });
        race.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(("file:///app/win.html".to_string(), "Win".to_string()))
        });
        race.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            None
        });

        let (url, title) = race.first(Duration::from_secs(5), "window").await.unwrap();
        assert_eq!(url, "file:///app/win.html");
        assert_eq!(title, "Win");
    }
}
