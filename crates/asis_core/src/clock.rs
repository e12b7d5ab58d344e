use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| {
            AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string())
        })
}
