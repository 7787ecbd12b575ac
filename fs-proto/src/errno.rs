/// Request-level errors (spec §7 category 1): these become a negated POSIX
/// code in the reply and never unwind — they are the expected, recoverable
/// outcome of a malformed or conflicting request. Consistency violations
/// (§7 category 2) are not represented here; they `panic!` instead.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("I/O error")]
    Io,
    #[error("invalid argument")]
    Invalid,
    #[error("name too long")]
    NameTooLong,
    #[error("operation not supported")]
    NotSupported,
    #[error("file too large")]
    FileTooBig,
    #[error("too many links")]
    TooManyLinks,
    #[error("device or resource busy")]
    Busy,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("read-only filesystem")]
    ReadOnly,
}

impl FsError {
    /// Negated POSIX value, exactly as placed in a reply's status field.
    pub fn to_errno(self) -> i32 {
        let positive = match self {
            FsError::NotPermitted => 1,
            FsError::NotFound => 2,
            FsError::Io => 5,
            FsError::Busy => 16,
            FsError::Exists => 17,
            FsError::NotDirectory => 20,
            FsError::IsDirectory => 21,
            FsError::Invalid => 22,
            FsError::FileTooBig => 27,
            FsError::NoSpace => 28,
            FsError::ReadOnly => 30,
            FsError::TooManyLinks => 31,
            FsError::NameTooLong => 36,
            FsError::NotEmpty => 39,
            FsError::NotSupported => 95,
        };
        -positive
    }
}

impl From<std::io::Error> for FsError {
    fn from(_: std::io::Error) -> Self {
        FsError::Io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_posix() {
        assert_eq!(FsError::NotFound.to_errno(), -2);
        assert_eq!(FsError::Exists.to_errno(), -17);
        assert_eq!(FsError::NotEmpty.to_errno(), -39);
        assert_eq!(FsError::NoSpace.to_errno(), -28);
        assert_eq!(FsError::NameTooLong.to_errno(), -36);
        assert_eq!(FsError::NotSupported.to_errno(), -95);
        assert_eq!(FsError::FileTooBig.to_errno(), -27);
    }
}
