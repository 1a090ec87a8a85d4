//! Link-edge discovery. On every successful pull the page's Markdown is
//! walked and its outgoing edges rebuilt; the engine then resolves internal
//! targets against the path index before writing them to the store.

use crate::domain::LinkKind;
use pulldown_cmark::{Event, Options as CmarkOptions, Parser, Tag, TagEnd};

/// An edge as it appears in the text, before target resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub target: String,
    pub kind: LinkKind,
    pub text: String,
    /// 1-based line of the link in the Markdown source.
    pub line: i64,
}

/// Walks the Markdown and returns every link and image reference in order
/// of appearance. Pure anchors (`#section`) are not edges and are skipped.
pub fn extract_links(markdown: &str) -> Vec<RawLink> {
    let mut options = CmarkOptions::empty();
    options.insert(CmarkOptions::ENABLE_STRIKETHROUGH);
    options.insert(CmarkOptions::ENABLE_TABLES);

    let mut links: Vec<RawLink> = Vec::new();
    // (target, kind, text-so-far, line); filled between Start and End
    let mut open: Option<(String, LinkKind, String, i64)> = None;

    for (event, range) in Parser::new_ext(markdown, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) => {
                let dest = dest_url.to_string();
                if dest.starts_with('#') {
                    continue;
                }
                let line = line_of(markdown, range.start);
                open = Some((dest.clone(), classify(&dest, false), String::new(), line));
            }
            Event::Start(Tag::Image { dest_url, .. }) => {
                let dest = dest_url.to_string();
                let line = line_of(markdown, range.start);
                open = Some((dest.clone(), classify(&dest, true), String::new(), line));
            }
            Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
                if let Some((target, kind, text, line)) = open.take() {
                    links.push(RawLink { target, kind, text, line });
                }
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, text, _)) = open.as_mut() {
                    text.push_str(&t);
                }
            }
            _ => {}
        }
    }
    links
}

/// Attachment filenames referenced by the page, for the attachments table
/// and the upload pass on push.
pub fn extract_attachment_refs(markdown: &str) -> Vec<String> {
    let mut refs: Vec<String> = extract_links(markdown)
        .into_iter()
        .filter(|l| l.kind == LinkKind::Attachment)
        .filter_map(|l| l.target.rsplit_once('/').map(|(_, name)| name.to_string()))
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

fn classify(dest: &str, is_image: bool) -> LinkKind {
    if dest.starts_with("http://") || dest.starts_with("https://") || dest.starts_with("mailto:") {
        return LinkKind::External;
    }
    if dest.contains(".attachments/") || is_image {
        return LinkKind::Attachment;
    }
    LinkKind::Internal
}

fn line_of(text: &str, offset: usize) -> i64 {
    let offset = offset.min(text.len());
    text[..offset].matches('\n').count() as i64 + 1
}
