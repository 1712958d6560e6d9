use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::error::{Error, Result};

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Runs a collaborator call with an upper bound, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, stage: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            log::warn!("{} did not answer within {:?}", stage, limit);
            Err(Error::Timeout(stage))
        }
    }
}

/// Makes a user supplied file name safe to use as a single storage path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("Jane Doe.png"), "Jane_Doe.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("  "), "file");
        assert_eq!(sanitize_file_name("...."), "file");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_error() {
        let res: Result<()> = with_timeout(Duration::from_millis(10), "detector", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(res, Err(Error::Timeout("detector"))));

        let res = with_timeout(Duration::from_secs(1), "detector", async { Ok(3) }).await;
        assert_eq!(res.unwrap(), 3);
    }
}
