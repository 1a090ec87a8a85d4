pub mod event;
pub mod link;
pub mod page;
pub mod user;

pub use self::event::{RemoteEvent, RemoteEventKind, SyncEvent};
pub use self::link::{LinkEdge, LinkKind};
pub use self::page::{Ancestor, ContentStatus, PageRecord, SyncStatus};
pub use self::user::{Contributor, UserRecord};
