//! Small helpers shared by the codec implementation.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// Works like `assert!` but yields an `Err` instead of panicking, which keeps
/// the decoders free of panics on hostile input.
///
/// ```ignore
/// ensure!(body_len <= max_size, ParseError::too_large_body(body_len, max_size));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
