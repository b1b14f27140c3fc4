//! Public data types.

mod item;
mod message;
mod notify;
mod record;

pub use item::{ClientType, ReasonId};
pub use message::{Message, QueryError, Response};
pub use notify::{ClientEnterView, ClientLeftView, Notify, NotifyKind};
pub use record::{Record, Value};
