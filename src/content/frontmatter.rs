use gray_matter::{engine::YAML, Matter};
use serde::Deserialize;
use tracing::warn;

/// The header block that binds a working file to its remote page. A file
/// without a parsable `id` stays untracked until the binding is resolved.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PageFrontMatter {
    pub id: Option<String>,
    pub title: Option<String>,
    pub space: Option<String>,
    pub version: Option<i64>,
    pub labels: Option<Vec<String>>,
}

/// Splits a file into its typed header and raw body. Missing or malformed
/// headers degrade to defaults; the body is never lost.
pub fn parse(md_content: &str, filename: &str) -> (PageFrontMatter, String) {
    // Soft check: no leading delimiter means the whole thing is body
    if !md_content.starts_with("---") {
        return (PageFrontMatter::default(), md_content.to_string());
    }

    if let Some(end_offset) = md_content[3..].find("\n---") {
        let closing_start = end_offset + 3;
        // skip past "\n---" and an optional trailing newline
        let mut body_start = closing_start + 4;
        if md_content[body_start..].starts_with('\r') {
            body_start += 1;
        }
        if md_content[body_start..].starts_with('\n') {
            body_start += 1;
        }

        let header_block = &md_content[..closing_start + 4];
        let body = &md_content[body_start..];

        let matter = Matter::<YAML>::new();
        return match matter.parse::<PageFrontMatter>(header_block) {
            Ok(parsed) => (parsed.data.unwrap_or_default(), body.to_string()),
            Err(e) => {
                warn!(file = filename, error = %e, "malformed front matter, treating header as defaults");
                (PageFrontMatter::default(), body.to_string())
            }
        };
    }

    // no closing delimiter: the whole file is body
    (PageFrontMatter::default(), md_content.to_string())
}

/// Renders the header back in front of a body. Values are quoted so titles
/// with colons or quotes survive the round trip.
pub fn write(meta: &PageFrontMatter, body: &str) -> String {
    let mut out = String::from("---\n");
    if let Some(id) = &meta.id {
        out.push_str(&format!("id: {}\n", yaml_quote(id)));
    }
    if let Some(title) = &meta.title {
        out.push_str(&format!("title: {}\n", yaml_quote(title)));
    }
    if let Some(space) = &meta.space {
        out.push_str(&format!("space: {}\n", yaml_quote(space)));
    }
    if let Some(version) = meta.version {
        out.push_str(&format!("version: {}\n", version));
    }
    if let Some(labels) = &meta.labels {
        if !labels.is_empty() {
            out.push_str("labels:\n");
            for label in labels {
                out.push_str(&format!("  - {}\n", yaml_quote(label)));
            }
        }
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
