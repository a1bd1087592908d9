//! Helpers for exercising the stack without a network interface.


pub use self::channel_link::{ChannelLink, Frame};
