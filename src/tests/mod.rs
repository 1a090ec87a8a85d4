mod support;

mod api_webhook_receiver;
mod integration_audit_engine;
mod integration_initial_sync;
mod integration_remote_poller;
mod unit_three_way_merge;
