#[allow(clippy::module_inception)]
mod logs;

pub(crate) use self::logs::SlowLogs;
