//! Response heuristics: challenge pages, CAPTCHA walls, JS-only shells,
//! structured data. Shared by the fetchers, the profiler and the
//! confidence scorer.

/// Markers that identify an interstitial challenge page rather than real
/// content. Checked against lowercased body text.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-chl",
    "turnstile",
    "checking your browser before accessing",
    "please wait while we verify",
    "this process is automatic",
    "performance & security by cloudflare",
    "ray id:",
    "challenge-form",
];

const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "g-recaptcha",
    "h-captcha",
    "verify you are human",
    "prove you are not a robot",
];

/// Header names whose values identify a Cloudflare-style edge.
const CLOUDFLARE_HEADERS: &[&str] = &["cf-ray", "cf-cache-status"];

const LOGIN_MARKERS: &[&str] = &["type=\"password\"", "name=\"password\"", "sign in to continue"];

/// True when the body reads as a JS/interstitial challenge page.
pub fn looks_like_challenge(body: &str) -> bool {
    let lower = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// True when the body carries CAPTCHA machinery. Long documents mentioning
/// captchas in prose are not walls, so only short bodies count.
pub fn looks_like_captcha(body: &str) -> bool {
    if body.len() >= 10_000 {
        return false;
    }
    let lower = body.to_lowercase();
    CAPTCHA_MARKERS.iter().any(|m| lower.contains(m))
}

/// True when the headers identify a Cloudflare-style edge in front of the
/// origin.
pub fn cloudflare_headers(headers: &std::collections::HashMap<String, String>) -> bool {
    if CLOUDFLARE_HEADERS.iter().any(|h| headers.contains_key(*h)) {
        return true;
    }
    headers
        .get("server")
        .map(|v| v.to_lowercase().contains("cloudflare"))
        .unwrap_or(false)
}

/// True when the page demands authentication before showing content.
pub fn looks_like_login_wall(body: &str) -> bool {
    if body.len() >= 20_000 {
        return false;
    }
    let lower = body.to_lowercase();
    LOGIN_MARKERS.iter().any(|m| lower.contains(m))
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|pos| from + pos)
}

fn starts_with_ci(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Length of text visible outside markup, in bytes. Crude single-pass
/// scan that skips tags and the contents of script/style blocks; good
/// enough to distinguish a JS shell from a real document.
pub fn visible_text_len(html: &str) -> usize {
    let bytes = html.as_bytes();
    let mut len = 0usize;
    let mut in_tag = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => {
                if starts_with_ci(&bytes[i..], b"<script") {
                    match find_bytes(bytes, b"</script>", i) {
                        Some(end) => {
                            i = end + b"</script>".len();
                            continue;
                        }
                        None => break,
                    }
                }
                if starts_with_ci(&bytes[i..], b"<style") {
                    match find_bytes(bytes, b"</style>", i) {
                        Some(end) => {
                            i = end + b"</style>".len();
                            continue;
                        }
                        None => break,
                    }
                }
                in_tag = true;
            }
            b'>' => in_tag = false,
            c if !in_tag && !c.is_ascii_whitespace() => len += 1,
            _ => {}
        }
        i += 1;
    }

    len
}

/// Total bytes inlined as script content. Used to spot JS-rendered
/// shells that ship large bundles and no text.
pub fn script_weight(html: &str) -> usize {
    let bytes = html.as_bytes();
    let mut weight = 0usize;
    let mut from = 0usize;
    while let Some(start) = find_bytes(bytes, b"<script", from) {
        match find_bytes(bytes, b"</script>", start) {
            Some(end) => {
                weight += end - start;
                from = end + b"</script>".len();
            }
            None => {
                weight += bytes.len() - start;
                break;
            }
        }
    }
    weight
}

/// Visible text to total markup ratio in [0, 1].
pub fn text_markup_ratio(html: &str) -> f64 {
    if html.is_empty() {
        return 0.0;
    }
    visible_text_len(html) as f64 / html.len() as f64
}

/// True when the document carries machine-readable structure: JSON-LD,
/// Open Graph metadata, or tables.
pub fn has_structured_data(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("application/ld+json")
        || lower.contains("property=\"og:")
        || lower.contains("property='og:")
        || lower.contains("<table")
}
