// POSIX error numbers as returned (negated) by the gateway

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EXDEV: i32 = 18;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const EFBIG: i32 = 27;
pub const ENOSPC: i32 = 28;
pub const EROFS: i32 = 30;
pub const ERANGE: i32 = 34;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const ENOTEMPTY: i32 = 39;
/// Missing extended attribute on Linux
pub const ENODATA: i32 = 61;
pub const ENOTSUP: i32 = 95;
pub const ETIMEDOUT: i32 = 110;
pub const ESTALE: i32 = 116;
pub const EDQUOT: i32 = 122;
/// Missing extended attribute on BSD-derived gateways
pub const ENOATTR: i32 = 93;

/// True for return codes that mean "no such extended attribute".
pub fn is_missing_attr(code: i32) -> bool {
    matches!(code.checked_abs(), Some(ENODATA) | Some(ENOATTR))
}

/// Human-readable message for a (possibly negated) error number.
pub fn describe(code: i32) -> String {
    let errno = code.checked_abs().unwrap_or(i32::MAX);
    let msg = match errno {
        EPERM => "Operation not permitted",
        ENOENT => "No such file or directory",
        EIO => "Input/output error",
        EBADF => "Bad file descriptor",
        EAGAIN => "Resource temporarily unavailable",
        ENOMEM => "Cannot allocate memory",
        EACCES => "Permission denied",
        EBUSY => "Device or resource busy",
        EEXIST => "File exists",
        EXDEV => "Invalid cross-device link",
        ENOTDIR => "Not a directory",
        EISDIR => "Is a directory",
        EINVAL => "Invalid argument",
        EMFILE => "Too many open files",
        EFBIG => "File too large",
        ENOSPC => "No space left on device",
        EROFS => "Read-only file system",
        ERANGE => "Numerical result out of range",
        ENAMETOOLONG => "File name too long",
        ENOSYS => "Function not implemented",
        ENOTEMPTY => "Directory not empty",
        ENODATA => "No data available",
        ENOATTR => "Attribute not found",
        ENOTSUP => "Operation not supported",
        ETIMEDOUT => "Connection timed out",
        ESTALE => "Stale file handle",
        EDQUOT => "Disk quota exceeded",
        _ => return format!("Unknown error {}", errno),
    };
    msg.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe(-ENOENT), "No such file or directory");
        assert_eq!(describe(EACCES), "Permission denied");
        assert_eq!(describe(-4242), "Unknown error 4242");
        assert_eq!(describe(i32::MIN), format!("Unknown error {}", i32::MAX));
    }

    #[test]
    fn test_missing_attr_codes() {
        assert!(is_missing_attr(-ENODATA));
        assert!(is_missing_attr(-ENOATTR));
        assert!(!is_missing_attr(-ENOENT));
    }
}
