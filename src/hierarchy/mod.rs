//! Filesystem layout rules: how a page's ancestor chain and title turn into
//! a relative path, and how collisions and moves are recognized.

pub mod ignore;

use crate::domain::Ancestor;

/// Lowercases, collapses whitespace runs into single hyphens, drops anything
/// that is not alphanumeric or a hyphen, and trims stray hyphens. Titles that
/// slug away to nothing fall back to `page`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_hyphen = true;
    for c in title.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        } else if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_hyphen = false;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("page");
    }
    slug
}

/// Computes the relative POSIX path for a page from its ancestor chain.
/// `home_id` names the designated space home; it and everything above it are
/// skipped so the home's children sit at the working-directory root. Pages
/// with children become a directory holding `index.md`.
pub fn resolve_path(
    ancestors: &[Ancestor],
    title: &str,
    has_children: bool,
    home_id: Option<&str>,
) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut past_home = home_id.is_none();
    for ancestor in ancestors {
        if !past_home {
            if Some(ancestor.id.as_str()) == home_id {
                past_home = true;
            }
            continue;
        }
        segments.push(slugify(&ancestor.title));
    }

    let leaf = slugify(title);
    if has_children {
        segments.push(leaf);
        segments.push("index.md".to_string());
    } else {
        segments.push(format!("{}.md", leaf));
    }
    segments.join("/")
}

/// Applies the deterministic collision suffix: `-2`, `-3`, ... on the leaf
/// slug. For `index.md` leaves the owning directory is suffixed instead.
pub fn suffixed(path: &str, n: usize) -> String {
    if let Some(dir) = path.strip_suffix("/index.md") {
        return format!("{}-{}/index.md", dir, n);
    }
    let stem = path.strip_suffix(".md").unwrap_or(path);
    format!("{}-{}.md", stem, n)
}

/// The sibling directory holding a page's attachments: `foo/bar.md` owns
/// `foo/bar.attachments`.
pub fn attachments_dir(path: &str) -> String {
    let stem = path.strip_suffix(".md").unwrap_or(path);
    format!("{}.attachments", stem)
}

/// Maps a path under a `*.attachments/` directory back to the owning page
/// file. Returns None for paths that are not attachment paths.
pub fn owning_page_file(rel_path: &str) -> Option<String> {
    let (dir, _) = rel_path.rsplit_once('/')?;
    let stem = dir.strip_suffix(".attachments")?;
    Some(format!("{}.md", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anc(id: &str, title: &str) -> Ancestor {
        Ancestor { id: id.to_string(), title: title.to_string() }
    }

    #[test]
    fn test_slugify_basics() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  API / Reference (v2)  "), "api-reference-v2");
        assert_eq!(slugify("Ünïcode Títle"), "ünïcode-títle");
        assert_eq!(slugify("!!!"), "page");
    }

    #[test]
    fn test_resolve_path_skips_home() {
        let chain = vec![anc("home", "Space Home"), anc("p0", "Guides")];
        let path = resolve_path(&chain, "Install", false, Some("home"));
        assert_eq!(path, "guides/install.md");
        // without a home everything nests
        let path = resolve_path(&chain, "Install", false, None);
        assert_eq!(path, "space-home/guides/install.md");
    }

    #[test]
    fn test_resolve_path_with_children_uses_index() {
        let path = resolve_path(&[], "Guides", true, None);
        assert_eq!(path, "guides/index.md");
    }

    #[test]
    fn test_suffixed_variants() {
        assert_eq!(suffixed("a/hello.md", 2), "a/hello-2.md");
        assert_eq!(suffixed("guides/index.md", 3), "guides-3/index.md");
    }

    #[test]
    fn test_attachment_ownership() {
        assert_eq!(attachments_dir("a/b.md"), "a/b.attachments");
        assert_eq!(owning_page_file("a/b.attachments/pic.png"), Some("a/b.md".to_string()));
        assert_eq!(owning_page_file("a/b/c.md"), None);
    }
}
