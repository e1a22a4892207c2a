pub mod data;
pub mod method;
pub mod nodes;
pub mod twin;

pub use data::{NodeValue, ReadingSet};
pub use method::{MethodInvocation, MethodName, MethodResult};
pub use twin::{PropertyPatch, TwinState, single_patch};

/// 孪生时间戳格式（`DD/MM/YYYY HH:MM:SS`，本地时间）。
pub const TWIN_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// 格式化孪生时间戳。
pub fn format_twin_timestamp<Tz>(at: &chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(TWIN_TIMESTAMP_FORMAT).to_string()
}

/// 当前本地时间的孪生时间戳。
pub fn twin_timestamp_now() -> String {
    format_twin_timestamp(&chrono::Local::now())
}
