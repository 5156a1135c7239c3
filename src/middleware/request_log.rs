use std::future::ready;

use crate::context::Context;
use crate::handler::Handler;

/// Creates the request's log record up front.
pub fn request_log() -> impl Handler {
    |ctx: Context| {
        ctx.log_record();
        ready(())
    }
}
