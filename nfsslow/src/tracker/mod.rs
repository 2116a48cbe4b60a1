pub(crate) mod classifier;
pub(crate) mod report;
#[allow(clippy::module_inception)]
mod tracker;

pub(crate) use self::tracker::{record_queue, EventTracker, RecordReceiver, RecordSender};
