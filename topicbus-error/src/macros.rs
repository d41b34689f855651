/// Немедленно возвращает ошибку из текущей функции.
///
/// - `bail!(err)` — готовая ошибка, конвертируемая в `StackError`;
/// - `bail!(code, "msg")` — `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)` — то же с форматированием.
///
/// ```ignore
/// use topicbus_error::{bail, StatusCode};
///
/// fn parse_limit(raw: &str) -> topicbus_error::BusResult<u64> {
///     match raw.parse() {
///         Ok(n) => Ok(n),
///         Err(_) => bail!(StatusCode::InvalidLimit, "not a number: {}", raw),
///     }
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает [`bail!`], если оно ложно.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{BusResult, StatusCode};

    #[test]
    fn test_bail_with_format() {
        fn parse(raw: &str) -> BusResult<u64> {
            match raw.parse() {
                Ok(n) => Ok(n),
                Err(_) => bail!(StatusCode::InvalidLimit, "not a number: {}", raw),
            }
        }

        assert_eq!(parse("3").unwrap(), 3);
        let err = parse("x").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidLimit);
        assert!(err.to_string().contains("not a number: x"));
    }

    #[test]
    fn test_ensure() {
        fn check(limit: u64) -> BusResult<()> {
            ensure!(limit > 0, StatusCode::InvalidLimit, "limit must be positive");
            Ok(())
        }

        assert!(check(1).is_ok());
        assert!(check(0).is_err());
    }
}
