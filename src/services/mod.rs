pub mod companion;
pub mod desktop;
pub mod messenger;
pub mod schedule;

pub use companion::monitor_parent;
pub use desktop::DesktopProcess;
pub use messenger::{ChannelMessenger, MessageError, Messenger, RunnerMessage};
pub use schedule::{CheckInAccelerator, CheckInSchedule};
