use crate::content::{has_conflict_markers, merge};

// the four algebraic guarantees every caller leans on: agreement, one-sided
// change, and the no-marker promise on success
#[test]
fn test_merge_laws() {
    let b = "line one\nline two\nline three\n";
    let l = "line one\nline two changed\nline three\n";
    let r = "line one\nline two\nline three\nline four\n";

    // nothing changed
    assert_eq!(merge(b, b, b).content, b);
    // only remote changed
    assert_eq!(merge(b, b, r).content, r);
    // only local changed
    assert_eq!(merge(b, l, b).content, l);
    // both made the identical change
    assert_eq!(merge(b, l, l).content, l);

    let outcome = merge(b, l, r);
    assert!(outcome.success);
    assert!(!has_conflict_markers(&outcome.content));
}

#[test]
fn test_disjoint_edits_both_survive() {
    let base = "A\nB\nC";
    let local = "A1\nA\nB\nC";
    let remote = "A\nB\nC\nC1";

    let outcome = merge(base, local, remote);
    assert!(outcome.success, "disjoint edits should merge cleanly");
    assert_eq!(outcome.conflict_count, 0);
    assert!(outcome.content.contains("A1"));
    assert!(outcome.content.contains("C1"));
    assert_eq!(outcome.content, "A1\nA\nB\nC\nC1");
}

#[test]
fn test_same_region_conflicts() {
    let outcome = merge("X", "L", "R");
    assert!(!outcome.success);
    assert_eq!(outcome.conflict_count, 1);
    assert!(outcome.content.contains("<<<<<<< LOCAL"));
    assert!(outcome.content.contains("L"));
    assert!(outcome.content.contains("======="));
    assert!(outcome.content.contains("R"));
    assert!(outcome.content.contains(">>>>>>> REMOTE"));
    assert!(has_conflict_markers(&outcome.content));
}

#[test]
fn test_multiple_conflict_regions_are_counted() {
    let base = "one\nkeep\ntwo\nkeep\nthree\n";
    let local = "uno\nkeep\ndos\nkeep\nthree\n";
    let remote = "ein\nkeep\nzwei\nkeep\nthree\n";

    let outcome = merge(base, local, remote);
    assert!(!outcome.success);
    assert_eq!(outcome.conflict_count, 2);
}

#[test]
fn test_identical_change_on_both_sides_is_not_a_conflict() {
    let base = "old line\ntail\n";
    let edited = "new line\ntail\n";

    let outcome = merge(base, edited, edited);
    assert!(outcome.success);
    assert_eq!(outcome.content, edited);
}

#[test]
fn test_marker_scan() {
    assert!(!has_conflict_markers("plain text\nno markers here\n"));
    assert!(has_conflict_markers("<<<<<<< LOCAL\nx\n=======\ny\n>>>>>>> REMOTE\n"));
    // a separator alone is suspicious enough to block a push
    assert!(has_conflict_markers("text\n=======\nmore\n"));
    // but an indented or decorated line is not a marker
    assert!(!has_conflict_markers("a === b\n  ======= indented\n"));
}

#[test]
fn test_deletion_against_unrelated_edit() {
    let base = "intro\nmiddle\noutro\n";
    // local deletes the middle line, remote touches the outro
    let local = "intro\noutro\n";
    let remote = "intro\nmiddle\noutro edited\n";

    let outcome = merge(base, local, remote);
    assert!(outcome.success);
    assert_eq!(outcome.content, "intro\noutro edited\n");
}
