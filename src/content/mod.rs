pub mod frontmatter;
pub mod merge;
pub mod normalize;

pub use self::frontmatter::PageFrontMatter;
pub use self::merge::{has_conflict_markers, merge, MergeOutcome};
pub use self::normalize::{content_hash, normalize, normalized_hash};
