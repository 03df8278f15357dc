use time::macros::format_description;
use time::OffsetDateTime;

pub fn utc_now_ms() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

pub fn utc_now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Renders a `{tv_sec, tv_usec}` pair as `2015-10-26 16:43:15.468262`.
pub fn timeval_user_friendly(tv_sec: u64, tv_usec: u64) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    match OffsetDateTime::from_unix_timestamp(tv_sec as i64) {
        Ok(dt) => match dt.format(&fmt) {
            Ok(s) => format!("{}.{:06}", s, tv_usec),
            Err(_) => format!("{}.{:06}", tv_sec, tv_usec),
        },
        Err(_) => format!("{}.{:06}", tv_sec, tv_usec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeval_user_friendly() {
        assert_eq!(
            timeval_user_friendly(1445866995, 468262),
            "2015-10-26 16:43:15.468262"
        );
        // usec is zero-padded to six digits
        assert_eq!(timeval_user_friendly(0, 7), "1970-01-01 00:00:00.000007");
    }
}
