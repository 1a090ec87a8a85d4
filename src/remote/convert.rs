//! Storage-format conversion. The remote stores page bodies as an XHTML
//! subset; pulls turn storage into Markdown, pushes turn Markdown back into
//! storage. Both directions run through `pulldown_cmark` event streams so
//! the two sides cannot drift apart structurally.

use crate::error::{Result, SyncError};
use pulldown_cmark::{
    html, CodeBlockKind, CowStr, Event, HeadingLevel, LinkType, Options as CmarkOptions, Parser,
    Tag, TagEnd,
};
use pulldown_cmark_to_cmark::cmark;

pub trait StorageConverter: Send + Sync {
    fn storage_to_markdown(&self, storage: &str) -> Result<String>;
    fn markdown_to_storage(&self, markdown: &str) -> Result<String>;
}

/// Converter for the XHTML storage subset the remote emits: paragraphs,
/// headings, emphasis, code (inline and fenced), lists, links, images,
/// rules and line breaks. Unknown tags degrade to their text content.
#[derive(Default)]
pub struct XhtmlConverter;

impl StorageConverter for XhtmlConverter {
    fn storage_to_markdown(&self, storage: &str) -> Result<String> {
        let events = lex_storage(storage);
        let mut out = String::with_capacity(storage.len());
        cmark(events.iter(), &mut out)
            .map_err(|e| SyncError::Other(format!("markdown rendering failed: {}", e)))?;
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    fn markdown_to_storage(&self, markdown: &str) -> Result<String> {
        let mut options = CmarkOptions::empty();
        options.insert(CmarkOptions::ENABLE_STRIKETHROUGH);
        options.insert(CmarkOptions::ENABLE_TABLES);

        let parser = Parser::new_ext(markdown, options);
        let mut storage = String::with_capacity(markdown.len());
        html::push_html(&mut storage, parser);
        Ok(storage)
    }
}

// ---- XHTML lexing ----

enum Token {
    Text(String),
    Open { name: String, attrs: Vec<(String, String)> },
    Close(String),
}

fn lex_storage(storage: &str) -> Vec<Event<'static>> {
    let tokens = tokenize(storage);
    let mut events: Vec<Event<'static>> = Vec::new();
    // depth of containers whose inner whitespace is significant
    let mut inline_depth: usize = 0;
    let mut in_pre = false;
    let mut inline_code: Option<String> = None;

    for token in tokens {
        match token {
            Token::Text(text) => {
                if let Some(buf) = inline_code.as_mut() {
                    buf.push_str(&text);
                } else if in_pre || inline_depth > 0 || !text.trim().is_empty() {
                    events.push(Event::Text(CowStr::from(text)));
                }
            }
            Token::Open { name, attrs } => match name.as_str() {
                "p" => {
                    events.push(Event::Start(Tag::Paragraph));
                    inline_depth += 1;
                }
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    events.push(Event::Start(Tag::Heading {
                        level: heading_level(&name),
                        id: None,
                        classes: Vec::new(),
                        attrs: Vec::new(),
                    }));
                    inline_depth += 1;
                }
                "strong" | "b" => events.push(Event::Start(Tag::Strong)),
                "em" | "i" => events.push(Event::Start(Tag::Emphasis)),
                "del" | "s" => events.push(Event::Start(Tag::Strikethrough)),
                "ul" => events.push(Event::Start(Tag::List(None))),
                "ol" => events.push(Event::Start(Tag::List(Some(1)))),
                "li" => {
                    events.push(Event::Start(Tag::Item));
                    inline_depth += 1;
                }
                "pre" => {
                    in_pre = true;
                    events.push(Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(
                        CowStr::from(String::new()),
                    ))));
                }
                "code" => {
                    if !in_pre {
                        inline_code = Some(String::new());
                    }
                }
                "a" => {
                    let href = attr_value(&attrs, "href").unwrap_or_default();
                    events.push(Event::Start(Tag::Link {
                        link_type: LinkType::Inline,
                        dest_url: CowStr::from(href),
                        title: CowStr::from(String::new()),
                        id: CowStr::from(String::new()),
                    }));
                }
                "img" => {
                    let src = attr_value(&attrs, "src").unwrap_or_default();
                    let alt = attr_value(&attrs, "alt").unwrap_or_default();
                    events.push(Event::Start(Tag::Image {
                        link_type: LinkType::Inline,
                        dest_url: CowStr::from(src),
                        title: CowStr::from(String::new()),
                        id: CowStr::from(String::new()),
                    }));
                    if !alt.is_empty() {
                        events.push(Event::Text(CowStr::from(alt)));
                    }
                    events.push(Event::End(TagEnd::Image));
                }
                "br" => events.push(Event::HardBreak),
                "hr" => events.push(Event::Rule),
                _ => {}
            },
            Token::Close(name) => match name.as_str() {
                "p" => {
                    events.push(Event::End(TagEnd::Paragraph));
                    inline_depth = inline_depth.saturating_sub(1);
                }
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    events.push(Event::End(TagEnd::Heading(heading_level(&name))));
                    inline_depth = inline_depth.saturating_sub(1);
                }
                "strong" | "b" => events.push(Event::End(TagEnd::Strong)),
                "em" | "i" => events.push(Event::End(TagEnd::Emphasis)),
                "del" | "s" => events.push(Event::End(TagEnd::Strikethrough)),
                "ul" => events.push(Event::End(TagEnd::List(false))),
                "ol" => events.push(Event::End(TagEnd::List(true))),
                "li" => {
                    events.push(Event::End(TagEnd::Item));
                    inline_depth = inline_depth.saturating_sub(1);
                }
                "pre" => {
                    in_pre = false;
                    events.push(Event::End(TagEnd::CodeBlock));
                }
                "code" => {
                    if let Some(buf) = inline_code.take() {
                        events.push(Event::Code(CowStr::from(buf)));
                    }
                }
                "a" => events.push(Event::End(TagEnd::Link)),
                _ => {}
            },
        }
    }
    events
}

fn heading_level(name: &str) -> HeadingLevel {
    match name {
        "h1" => HeadingLevel::H1,
        "h2" => HeadingLevel::H2,
        "h3" => HeadingLevel::H3,
        "h4" => HeadingLevel::H4,
        "h5" => HeadingLevel::H5,
        _ => HeadingLevel::H6,
    }
}

fn attr_value(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == b'<' {
            match input[pos..].find('>') {
                Some(rel_end) => {
                    let tag = &input[pos + 1..pos + rel_end];
                    pos += rel_end + 1;
                    if let Some(token) = parse_tag(tag) {
                        tokens.push(token);
                    }
                }
                None => {
                    // dangling '<': keep it as literal text
                    tokens.push(Token::Text(decode_entities(&input[pos..])));
                    break;
                }
            }
        } else {
            let end = input[pos..].find('<').map(|i| pos + i).unwrap_or(input.len());
            tokens.push(Token::Text(decode_entities(&input[pos..end])));
            pos = end;
        }
    }
    tokens
}

fn parse_tag(raw: &str) -> Option<Token> {
    let raw = raw.trim();
    if raw.starts_with('!') || raw.starts_with('?') {
        return None; // comments and processing instructions
    }
    if let Some(name) = raw.strip_prefix('/') {
        return Some(Token::Close(name.trim().to_ascii_lowercase()));
    }

    let raw = raw.strip_suffix('/').unwrap_or(raw).trim();

    let (name, rest) = match raw.find(char::is_whitespace) {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let name = name.to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut rest = rest.trim_start();
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_ascii_lowercase();
        let after = rest[eq + 1..].trim_start();
        let (value, remaining) = if let Some(stripped) = after.strip_prefix('"') {
            match stripped.find('"') {
                Some(end) => (&stripped[..end], &stripped[end + 1..]),
                None => (stripped, ""),
            }
        } else if let Some(stripped) = after.strip_prefix('\'') {
            match stripped.find('\'') {
                Some(end) => (&stripped[..end], &stripped[end + 1..]),
                None => (stripped, ""),
            }
        } else {
            match after.find(char::is_whitespace) {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };
        attrs.push((key, decode_entities(value)));
        rest = remaining.trim_start();
    }

    Some(Token::Open { name, attrs })
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        match rest.find(';') {
            Some(end) if end <= 12 => {
                let entity = &rest[1..end];
                match entity {
                    "amp" => out.push('&'),
                    "lt" => out.push('<'),
                    "gt" => out.push('>'),
                    "quot" => out.push('"'),
                    "apos" => out.push('\''),
                    "nbsp" => out.push(' '),
                    _ => {
                        let decoded = entity
                            .strip_prefix("#x")
                            .or_else(|| entity.strip_prefix("#X"))
                            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                            .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                            .and_then(char::from_u32);
                        match decoded {
                            Some(c) => out.push(c),
                            None => {
                                out.push('&');
                                out.push_str(entity);
                                out.push(';');
                            }
                        }
                    }
                }
                rest = &rest[end + 1..];
            }
            _ => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
