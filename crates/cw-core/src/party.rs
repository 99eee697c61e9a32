//! First/third-party subtree classification.
//!
//! Decides whether a hidden element looks like the page's own content or
//! like embedded third-party (typically ad) content, using only what is
//! visible in the markup:
//!
//! - known ad-container `id` prefixes force a third-party verdict;
//! - a relative `src` URL implies same-origin hosting, so first-party;
//! - absolute `src` URLs count as third-party resources (origin comparison
//!   is the native side's job, so the browser-side check stops here);
//! - inline styles referencing `url(` or `//`, and blank `srcdoc`
//!   attributes, count as third-party resources;
//! - a subtree with no third-party resource at all is first-party.
//!
//! The walk follows only `first_child`/`next_sibling` pointers, visiting
//! the subtree in document order and short-circuiting as soon as a verdict
//! is forced. Note that this includes the root's own sibling chain.

use crate::dom::Dom;

/// `id` prefixes used only by third-party ad containers.
const AD_ID_PREFIXES: [&str; 3] = ["google_ads_iframe_", "div-gpt-ad", "adfox_"];

/// Minimum trimmed character count for text to look like real content.
pub const MIN_AD_TEXT_CHARS: usize = 30;

/// Minimum non-empty word count for text to look like real content.
pub const MIN_AD_TEXT_WORDS: usize = 5;

bitflags::bitflags! {
    /// What a subtree walk has found so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Survey: u8 {
        const FIRST_PARTY_RESOURCE = 1 << 0;
        const THIRD_PARTY_RESOURCE = 1 << 1;
        const KNOWN_AD = 1 << 2;
    }
}

impl Survey {
    /// Flags that end the walk immediately.
    #[inline]
    fn is_conclusive(self) -> bool {
        self.intersects(Survey::FIRST_PARTY_RESOURCE | Survey::KNOWN_AD)
    }
}

/// Final verdict for a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    FirstParty,
    ThirdParty,
    KnownThirdPartyAd,
}

/// Whether a URL string is relative: no scheme and not protocol-relative.
pub fn is_relative_url(url: &str) -> bool {
    !url.starts_with("//") && !has_url_scheme(url)
}

fn has_url_scheme(url: &str) -> bool {
    let mut chars = url.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for c in chars {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '+' | '-' | '.' => continue,
            ':' => return true,
            _ => return false,
        }
    }
    false
}

/// Classify the subtree rooted at (and the sibling chain following) `root`.
pub fn classify<D: Dom>(dom: &D, root: &D::Node) -> Party {
    let mut survey = Survey::empty();
    survey_subtree(dom, root, &mut survey);

    if survey.contains(Survey::KNOWN_AD) {
        Party::KnownThirdPartyAd
    } else if survey.contains(Survey::FIRST_PARTY_RESOURCE) {
        Party::FirstParty
    } else if survey.contains(Survey::THIRD_PARTY_RESOURCE) {
        Party::ThirdParty
    } else {
        Party::FirstParty
    }
}

fn survey_subtree<D: Dom>(dom: &D, node: &D::Node, survey: &mut Survey) {
    if let Some(id) = dom.attribute(node, "id") {
        if AD_ID_PREFIXES.iter().any(|prefix| id.starts_with(prefix)) {
            survey.insert(Survey::KNOWN_AD);
            return;
        }
    }

    if let Some(src) = dom.attribute(node, "src") {
        if is_relative_url(&src) {
            survey.insert(Survey::FIRST_PARTY_RESOURCE);
            return;
        }
        survey.insert(Survey::THIRD_PARTY_RESOURCE);
    }

    if let Some(style) = dom.attribute(node, "style") {
        if style.contains("url(") || style.contains("//") {
            survey.insert(Survey::THIRD_PARTY_RESOURCE);
        }
    }

    if let Some(srcdoc) = dom.attribute(node, "srcdoc") {
        if srcdoc.trim().is_empty() {
            survey.insert(Survey::THIRD_PARTY_RESOURCE);
        }
    }

    let branches = [dom.first_child(node), dom.next_sibling(node)];
    for branch in branches.into_iter().flatten() {
        survey_subtree(dom, &branch, survey);
        if survey.is_conclusive() {
            return;
        }
    }
}

/// Thresholds for the visible-text check guarding unhides.
#[derive(Debug, Clone, Copy)]
pub struct TextSignificance {
    pub min_chars: usize,
    pub min_words: usize,
}

impl Default for TextSignificance {
    fn default() -> Self {
        Self {
            min_chars: MIN_AD_TEXT_CHARS,
            min_words: MIN_AD_TEXT_WORDS,
        }
    }
}

/// Whether the element shows enough visible text to look like genuine
/// content rather than an ad placeholder.
///
/// The rendered text can include the contents of `<script>`/`<style>`
/// descendants, so their text is stripped before measuring.
pub fn shows_significant_text<D: Dom>(dom: &D, node: &D::Node, gate: TextSignificance) -> bool {
    let Some(mut text) = dom.inner_text(node) else {
        return false;
    };
    for tag in ["script", "style"] {
        for fragment in dom.tag_texts(node, tag) {
            if !fragment.is_empty() {
                text = text.replace(&fragment, "");
            }
        }
    }

    let trimmed = text.trim();
    if trimmed.chars().count() < gate.min_chars {
        return false;
    }
    let words = trimmed
        .split(' ')
        .filter(|word| !word.trim().is_empty())
        .count();
    words >= gate.min_words
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_dom::{NodeHandle, TreeDom};

    fn attach(dom: &TreeDom, parent: &NodeHandle, tag: &str, attrs: &[(&str, &str)]) -> NodeHandle {
        let node = dom.create_element(tag);
        for (name, value) in attrs {
            node.set_attr(name, value);
        }
        parent.append(&node);
        node
    }

    #[test]
    fn test_relative_url_detection() {
        assert!(is_relative_url("/local.png"));
        assert!(is_relative_url("img/banner.jpg"));
        assert!(is_relative_url(""));
        assert!(!is_relative_url("//cdn.example.com/x.js"));
        assert!(!is_relative_url("https://example.com/x.png"));
        assert!(!is_relative_url("http://example.com"));
        assert!(!is_relative_url("data:image/png;base64,AAAA"));
        // A colon later in a path segment does not make a scheme.
        assert!(is_relative_url("path/with:colon"));
    }

    #[test]
    fn test_ad_id_prefix_short_circuits() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[("id", "google_ads_iframe_123")]);
        let inner = attach(&dom, &root, "div", &[]);
        inner.set_text("perfectly ordinary page text");
        assert_eq!(classify(&dom, &root), Party::KnownThirdPartyAd);
    }

    #[test]
    fn test_gpt_and_adfox_prefixes_are_known_ads() {
        let dom = TreeDom::new();
        let gpt = attach(&dom, &dom.body(), "div", &[("id", "div-gpt-ad-1234")]);
        assert_eq!(classify(&dom, &gpt), Party::KnownThirdPartyAd);

        let dom = TreeDom::new();
        let adfox = attach(&dom, &dom.body(), "div", &[("id", "adfox_151x99")]);
        assert_eq!(classify(&dom, &adfox), Party::KnownThirdPartyAd);
    }

    #[test]
    fn test_relative_src_is_first_party() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[("class", "foo")]);
        attach(&dom, &root, "img", &[("src", "/local.png")]);
        assert_eq!(classify(&dom, &root), Party::FirstParty);
    }

    #[test]
    fn test_absolute_src_is_third_party() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        attach(&dom, &root, "img", &[("src", "https://ads.example.net/x.png")]);
        assert_eq!(classify(&dom, &root), Party::ThirdParty);
    }

    #[test]
    fn test_first_party_resource_outweighs_third_party() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        attach(&dom, &root, "img", &[("src", "https://cdn.example.net/a.png")]);
        attach(&dom, &root, "img", &[("src", "/own.png")]);
        assert_eq!(classify(&dom, &root), Party::FirstParty);
    }

    #[test]
    fn test_inline_style_url_reference_is_third_party() {
        let dom = TreeDom::new();
        let root = attach(
            &dom,
            &dom.body(),
            "div",
            &[("style", "background:url(https://x.net/a.png)")],
        );
        assert_eq!(classify(&dom, &root), Party::ThirdParty);
    }

    #[test]
    fn test_blank_srcdoc_is_third_party() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "iframe", &[("srcdoc", "  ")]);
        assert_eq!(classify(&dom, &root), Party::ThirdParty);
    }

    #[test]
    fn test_subtree_without_resources_is_first_party() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[("class", "article")]);
        root.set_text("plain text");
        assert_eq!(classify(&dom, &root), Party::FirstParty);
    }

    #[test]
    fn test_sibling_chain_participates_in_verdict() {
        let dom = TreeDom::new();
        let container = attach(&dom, &dom.body(), "div", &[]);
        let root = attach(&dom, &container, "div", &[]);
        attach(&dom, &container, "img", &[("src", "/sibling.png")]);
        // The walk continues into the root's next sibling.
        assert_eq!(classify(&dom, &root), Party::FirstParty);
    }

    #[test]
    fn test_short_text_is_not_significant() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        root.set_text("only 10 ch");
        assert!(!shows_significant_text(&dom, &root, TextSignificance::default()));
    }

    #[test]
    fn test_long_wordy_text_is_significant() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        root.set_text("forty characters of genuine article prose");
        assert!(shows_significant_text(&dom, &root, TextSignificance::default()));
    }

    #[test]
    fn test_script_text_does_not_count() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        let script = attach(&dom, &root, "script", &[]);
        script.set_text("window.advertisementPayload = {a: 1, b: 2, c: 3};");
        root.prepend_text("Ad");
        assert!(!shows_significant_text(&dom, &root, TextSignificance::default()));
    }

    #[test]
    fn test_enough_words_required() {
        let dom = TreeDom::new();
        let root = attach(&dom, &dom.body(), "div", &[]);
        root.set_text("supercalifragilisticexpialidocious-word");
        assert!(!shows_significant_text(&dom, &root, TextSignificance::default()));
    }
}
