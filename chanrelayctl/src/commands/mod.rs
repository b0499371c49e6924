pub mod channels;
pub mod check;
pub mod serve;

pub use channels::{ChannelAddArgs, ChannelsCommands};
pub use serve::ServeArgs;
