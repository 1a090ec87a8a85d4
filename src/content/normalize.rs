/// Canonical form used for every content comparison: the front-matter header
/// is dropped, line endings collapse to LF, trailing whitespace goes, and the
/// text ends in exactly one newline. Idempotent.
pub fn normalize(markdown: &str) -> String {
    let body = strip_front_matter(markdown);

    let mut out = String::with_capacity(body.len() + 1);
    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        out.push_str(line.trim_end());
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

/// BLAKE3 of the input bytes as 64 lowercase hex chars. The one fingerprint
/// used everywhere; the store records the algorithm under the `hash_algo`
/// meta key so a future change can trigger re-hashing.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Hash of the canonical form. Equal results mean "same content as far as
/// sync is concerned".
pub fn normalized_hash(markdown: &str) -> String {
    content_hash(&normalize(markdown))
}

// Drops a leading `---` fenced header if a closing fence exists. Anything
// else passes through untouched.
fn strip_front_matter(markdown: &str) -> &str {
    let rest = match markdown.strip_prefix("---") {
        Some(rest) => rest,
        None => return markdown,
    };
    // the opening fence must be the whole first line
    let rest = match rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix("\n")) {
        Some(rest) => rest,
        None => return markdown,
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return &rest[offset + line.len()..];
        }
        offset += line.len();
    }
    markdown
}
