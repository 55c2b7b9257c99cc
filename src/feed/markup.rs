// Helpers over `scraper` for the markup YouTube serves: Atom channel feeds,
// timed-text captions and watch pages. Element names are compared the way the
// HTML parser stores them, lowercased with any prefix kept (`yt:videoid`).

use scraper::{ElementRef, Html};

/// Text content of `raw` with tags stripped and entities decoded.
pub fn decode_text(raw: &str) -> String {
    Html::parse_fragment(raw).root_element().text().collect()
}

/// Collapse all whitespace runs to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Every element named `name` under `root`, in document order.
pub fn elements<'a>(root: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .filter(move |el| el.value().name() == name)
}

/// First element named `name` under `root`.
pub fn first<'a>(root: ElementRef<'a>, name: &'a str) -> Option<ElementRef<'a>> {
    elements(root, name).next()
}

/// Trimmed text of the first element named `name` under `root`.
pub fn first_text(root: ElementRef<'_>, name: &str) -> Option<String> {
    let el = first(root, name)?;
    Some(el.text().collect::<String>().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_text("it&#39;s &quot;fine&quot;"), "it's \"fine\"");
        assert_eq!(decode_text("&#x263A;"), "\u{263A}");
        assert_eq!(decode_text("&amp;lt;"), "&lt;", "one layer per call");
        assert_eq!(decode_text("a <b>bold</b> move"), "a bold move");
    }

    #[test]
    fn test_prefixed_element_lookup() {
        let doc = Html::parse_document(
            "<feed><entry><yt:videoId> abc </yt:videoId><title>A &amp; B</title><title>second</title></entry></feed>",
        );
        let root = doc.root_element();
        assert_eq!(first_text(root, "yt:videoid").as_deref(), Some("abc"));
        assert_eq!(first_text(root, "title").as_deref(), Some("A & B"));
        assert_eq!(elements(root, "title").count(), 2);
        assert!(first(root, "missing").is_none());
    }
}
