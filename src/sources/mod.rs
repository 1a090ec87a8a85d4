pub mod poller;
pub mod watcher;
pub mod webhook;

pub use self::poller::Poller;
pub use self::watcher::{LocalEvent, LocalWatcher};
pub use self::webhook::{webhook_router, WebhookFilter, WebhookState};
