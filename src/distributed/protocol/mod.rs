mod convert;
mod io;
mod types;

pub(in crate::distributed) use convert::{duration_from_ticks, ticks_from_duration};
pub(in crate::distributed) use io::{MAX_MESSAGE_BYTES, read_message, send_message};
pub(in crate::distributed) use types::*;
