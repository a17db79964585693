//! 远程调用重试判定
//!
//! 只重试连接类故障：请求被认为尚未到达服务端。超时一律不重试，
//! 服务端可能已部分处理，非幂等操作重放会产生重复副作用。

use std::error::Error;

use infra_errors::{CLIENT_ERROR_ID, RemoteError, TRANSPORT_ERROR_ID};

const CONNECTION_ERROR: &str = "connection error";
const UNEXPECTED_EOF: &str = "unexpected EOF";

/// 判断一次失败的调用是否应当重试
///
/// 错误缺失或无法解析为结构化记录时返回 false。
pub fn should_retry(err: Option<&(dyn Error + 'static)>) -> bool {
    err.and_then(RemoteError::from_error)
        .is_some_and(|remote| is_retryable(&remote))
}

/// 结构化记录是否为可重试的连接类故障
pub fn is_retryable(err: &RemoteError) -> bool {
    if err.code != 500 {
        return false;
    }
    match err.id.as_str() {
        CLIENT_ERROR_ID => err.detail.contains(CONNECTION_ERROR),
        TRANSPORT_ERROR_ID => err.detail.contains(UNEXPECTED_EOF),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_errors::SERVER_ERROR_ID;

    fn classify(err: &RemoteError) -> bool {
        should_retry(Some(err as &(dyn Error + 'static)))
    }

    #[test]
    fn test_connection_error_is_retried() {
        let err = RemoteError::internal(CLIENT_ERROR_ID, "connection error: dial tcp refused");
        assert!(classify(&err));
    }

    #[test]
    fn test_transport_eof_is_retried() {
        let err = RemoteError::internal(TRANSPORT_ERROR_ID, "unexpected EOF");
        assert!(classify(&err));
    }

    #[test]
    fn test_timeout_is_never_retried() {
        let err = RemoteError::timeout(CLIENT_ERROR_ID, "context deadline exceeded");
        assert!(!classify(&err));

        // 即使细节看起来像连接故障
        let err = RemoteError::timeout(CLIENT_ERROR_ID, "connection error: i/o timeout");
        assert!(!classify(&err));
    }

    #[test]
    fn test_identifier_and_detail_must_match() {
        // 标识与细节交叉时不重试
        let err = RemoteError::internal(CLIENT_ERROR_ID, "unexpected EOF");
        assert!(!classify(&err));
        let err = RemoteError::internal(TRANSPORT_ERROR_ID, "connection error: refused");
        assert!(!classify(&err));

        let err = RemoteError::internal(SERVER_ERROR_ID, "connection error: database");
        assert!(!classify(&err));
    }

    #[test]
    fn test_other_codes_are_not_retried() {
        for code in [400u16, 401, 403, 404, 429, 502, 503, 504] {
            let err = RemoteError::new(CLIENT_ERROR_ID, code, "connection error: refused");
            assert!(!classify(&err), "code {code}");
        }
    }

    #[test]
    fn test_absent_or_unparsable_error() {
        assert!(!should_retry(None));

        let io = std::io::Error::other("connection error: refused");
        assert!(!should_retry(Some(&io as &(dyn Error + 'static))));
    }

    #[test]
    fn test_foreign_error_carrying_record() {
        let io = std::io::Error::other(
            r#"{"id":"go.micro.client","code":500,"detail":"connection error: dial tcp refused","status":"Internal Server Error"}"#,
        );
        assert!(should_retry(Some(&io as &(dyn Error + 'static))));
    }
}
