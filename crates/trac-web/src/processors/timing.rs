//! Request timing filter

use tracing::debug;

use crate::dispatcher::{Completion, RequestFilter};
use crate::environment::Environment;
use crate::request::{Request, Response};

pub const ELAPSED_HEADER: &str = "X-Trac-Elapsed";

/// Adds the processing time, in milliseconds, as a response header.
#[derive(Debug, Default)]
pub struct TimingPlugin;

impl RequestFilter for TimingPlugin {
    fn after(&self, _env: &Environment, req: &Request, res: &mut Response, completion: &Completion) {
        let elapsed = req.received.elapsed();
        debug!(
            "{} {} took {:?} ({:?})",
            req.method, req.path_info, elapsed, completion
        );
        res.set_header(ELAPSED_HEADER, format!("{:.3}", elapsed.as_secs_f64() * 1000.0));
    }
}
