pub mod session;
pub mod track;
pub mod user;

pub use session::{BotState, RoomInfo, Session};
pub use track::Track;
pub use user::{BlacklistEntry, BlacklistStatus, Group, UserIdentity};
