pub use std::io::Write;
pub use std::sync::{Arc, Mutex};

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::options::Options;
