//! Business logic: token ledger, notification dispatch, and user administration.

pub mod ledger;
pub mod notifier;
pub mod users;

pub use ledger::{LedgerError, TokenLedger};
pub use notifier::{EmailNotifier, LogMailer, Mailer, NotificationSender};
pub use users::UserAdminService;
