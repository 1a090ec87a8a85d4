//! Line-based three-way merge. Each side is aligned against the base with an
//! LCS diff; regions where only one side moved are taken outright, regions
//! where both sides moved differently become git-style conflict hunks.

const LOCAL_MARKER: &str = "<<<<<<< LOCAL";
const SEPARATOR: &str = "=======";
const REMOTE_MARKER: &str = ">>>>>>> REMOTE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub content: String,
    /// True iff no conflict markers were emitted.
    pub success: bool,
    pub conflict_count: usize,
}

/// A contiguous edit relative to the base: base lines `[start, end)` are
/// replaced by `lines`. Pure insertions have `start == end`.
#[derive(Debug, Clone)]
struct Chunk {
    start: usize,
    end: usize,
    lines: Vec<String>,
}

pub fn merge(base: &str, local: &str, remote: &str) -> MergeOutcome {
    // trivial agreements first; they cover most reconciliations
    if local == remote {
        return MergeOutcome { content: local.to_string(), success: true, conflict_count: 0 };
    }
    if local == base {
        return MergeOutcome { content: remote.to_string(), success: true, conflict_count: 0 };
    }
    if remote == base {
        return MergeOutcome { content: local.to_string(), success: true, conflict_count: 0 };
    }

    let base_lines = split_lines(base);
    let local_lines = split_lines(local);
    let remote_lines = split_lines(remote);

    let local_chunks = diff_chunks(&base_lines, &local_lines);
    let remote_chunks = diff_chunks(&base_lines, &remote_lines);

    let mut out: Vec<String> = Vec::new();
    let mut conflict_count = 0;
    let mut base_pos = 0;
    let mut li = 0;
    let mut ri = 0;

    while li < local_chunks.len() || ri < remote_chunks.len() {
        let take_local = match (local_chunks.get(li), remote_chunks.get(ri)) {
            (Some(l), Some(r)) => {
                if chunks_collide(l, r) {
                    // group every transitively colliding chunk from both sides
                    let (group_start, group_end, l_next, r_next) =
                        collect_collision(&local_chunks, &remote_chunks, li, ri);

                    copy_base(&mut out, &base_lines, &mut base_pos, group_start);

                    let local_side =
                        render_side(&base_lines, &local_chunks[li..l_next], group_start, group_end);
                    let remote_side =
                        render_side(&base_lines, &remote_chunks[ri..r_next], group_start, group_end);

                    if local_side == remote_side {
                        // both sides made the identical change
                        out.extend(local_side);
                    } else {
                        out.push(LOCAL_MARKER.to_string());
                        out.extend(local_side);
                        out.push(SEPARATOR.to_string());
                        out.extend(remote_side);
                        out.push(REMOTE_MARKER.to_string());
                        conflict_count += 1;
                    }

                    base_pos = group_end;
                    li = l_next;
                    ri = r_next;
                    continue;
                }
                l.start <= r.start
            }
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => unreachable!(),
        };

        let chunk = if take_local {
            let c = &local_chunks[li];
            li += 1;
            c
        } else {
            let c = &remote_chunks[ri];
            ri += 1;
            c
        };

        copy_base(&mut out, &base_lines, &mut base_pos, chunk.start);
        out.extend(chunk.lines.iter().cloned());
        base_pos = chunk.end;
    }

    copy_base(&mut out, &base_lines, &mut base_pos, base_lines.len());

    let mut content = out.join("\n");
    if (local.ends_with('\n') || remote.ends_with('\n')) && !content.is_empty() {
        content.push('\n');
    }

    MergeOutcome { success: conflict_count == 0, content, conflict_count }
}

/// O(n) scan for unresolved conflict markers; used to reject pushes of files
/// the user has not cleaned up yet.
pub fn has_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>") || line == SEPARATOR
    })
}

fn split_lines(text: &str) -> Vec<&str> {
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    if trimmed.is_empty() && text.len() <= 1 {
        return Vec::new();
    }
    trimmed.split('\n').collect()
}

fn copy_base(out: &mut Vec<String>, base: &[&str], pos: &mut usize, until: usize) {
    while *pos < until {
        out.push(base[*pos].to_string());
        *pos += 1;
    }
}

/// Folds an LCS diff of `base` vs `other` into replacement chunks anchored on
/// base line ranges.
fn diff_chunks(base: &[&str], other: &[&str]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut base_idx = 0;
    let mut open: Option<Chunk> = None;

    for step in diff::slice(base, other) {
        match step {
            diff::Result::Both(_, _) => {
                if let Some(chunk) = open.take() {
                    chunks.push(chunk);
                }
                base_idx += 1;
            }
            diff::Result::Left(_) => {
                let chunk = open.get_or_insert_with(|| Chunk {
                    start: base_idx,
                    end: base_idx,
                    lines: Vec::new(),
                });
                chunk.end = base_idx + 1;
                base_idx += 1;
            }
            diff::Result::Right(line) => {
                let chunk = open.get_or_insert_with(|| Chunk {
                    start: base_idx,
                    end: base_idx,
                    lines: Vec::new(),
                });
                chunk.lines.push(line.to_string());
            }
        }
    }
    if let Some(chunk) = open.take() {
        chunks.push(chunk);
    }
    chunks
}

// Two chunks collide when their base ranges intersect, or when they anchor on
// the same boundary (same-point insertions are ambiguous and must conflict).
fn chunks_collide(a: &Chunk, b: &Chunk) -> bool {
    (a.start < b.end && b.start < a.end) || a.start == b.start || a.end == b.end
}

/// Grows the collision outward until no further chunk on either side touches
/// the group. Returns the union base range and the exclusive chunk bounds.
fn collect_collision(
    local: &[Chunk],
    remote: &[Chunk],
    li: usize,
    ri: usize,
) -> (usize, usize, usize, usize) {
    let mut start = local[li].start.min(remote[ri].start);
    let mut end = local[li].end.max(remote[ri].end);
    let mut l_next = li + 1;
    let mut r_next = ri + 1;

    loop {
        let mut grew = false;
        while l_next < local.len() && local[l_next].start < end {
            start = start.min(local[l_next].start);
            end = end.max(local[l_next].end);
            l_next += 1;
            grew = true;
        }
        while r_next < remote.len() && remote[r_next].start < end {
            start = start.min(remote[r_next].start);
            end = end.max(remote[r_next].end);
            r_next += 1;
            grew = true;
        }
        if !grew {
            break;
        }
    }
    (start, end, l_next, r_next)
}

/// One side's rendition of the base range `[start, end)` with its chunks
/// applied.
fn render_side(base: &[&str], chunks: &[Chunk], start: usize, end: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = start;
    for chunk in chunks {
        while pos < chunk.start {
            out.push(base[pos].to_string());
            pos += 1;
        }
        out.extend(chunk.lines.iter().cloned());
        pos = chunk.end.max(pos);
    }
    while pos < end {
        out.push(base[pos].to_string());
        pos += 1;
    }
    out
}
