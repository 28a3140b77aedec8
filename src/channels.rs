use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_telemetry: broadcast::Sender<crate::telemetry::ChannelData>,
    pub to_session: broadcast::Sender<crate::session::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_telemetry: Self::channel(),
            to_session: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
