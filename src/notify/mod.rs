//! Outbound email: transports, the owner notification dispatcher and the quick share
//! dispatcher, both driven by the same polling loop.

pub mod dispatch;
pub mod polling;
pub mod quick_share;
pub mod transport;

pub use dispatch::{
    DeliveryOutcome, DeliveryResult, DispatchReport, EmailMessage, NotificationDispatcher,
    compose_email,
};
pub use polling::{PollingCycle, backoff_delay, poll_until_shutdown};
pub use quick_share::{
    QuickShareDispatcher, QuickShareOutcome, QuickShareReport, format_quick_share,
};
pub use transport::{
    EmailError, EmailTransport, HttpEmailTransport, UnconfiguredEmailTransport,
    transport_from_config,
};
