use std::fmt;

use crate::error::ProtocolError;

/// Remote operations understood by the gateway.
///
/// The numbering is part of the wire protocol and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    GetStat = 0,
    Delete = 1,
    RemoveDirectory = 2,
    Rename = 3,
    Mkdir = 4,
    ReadDirectoryEntries = 5,
    GetFileHandle = 6,
    CreateNewFile = 7,
    ReadFileData = 8,
    WriteFileData = 9,
    Flush = 10,
    CloseFileHandle = 11,
    TruncateFile = 12,
    ListExtendedAttr = 13,
    GetExtendedAttr = 14,
}

impl Opcode {
    pub const ALL: [Opcode; 15] = [
        Opcode::GetStat,
        Opcode::Delete,
        Opcode::RemoveDirectory,
        Opcode::Rename,
        Opcode::Mkdir,
        Opcode::ReadDirectoryEntries,
        Opcode::GetFileHandle,
        Opcode::CreateNewFile,
        Opcode::ReadFileData,
        Opcode::WriteFileData,
        Opcode::Flush,
        Opcode::CloseFileHandle,
        Opcode::TruncateFile,
        Opcode::ListExtendedAttr,
        Opcode::GetExtendedAttr,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::GetStat => "GET_STAT",
            Opcode::Delete => "DELETE",
            Opcode::RemoveDirectory => "REMOVE_DIRECTORY",
            Opcode::Rename => "RENAME",
            Opcode::Mkdir => "MKDIR",
            Opcode::ReadDirectoryEntries => "READ_DIRECTORY_ENTRIES",
            Opcode::GetFileHandle => "GET_FILE_HANDLE",
            Opcode::CreateNewFile => "CREATE_NEW_FILE",
            Opcode::ReadFileData => "READ_FILEDATA",
            Opcode::WriteFileData => "WRITE_FILEDATA",
            Opcode::Flush => "FLUSH",
            Opcode::CloseFileHandle => "CLOSE_FILE_HANDLE",
            Opcode::TruncateFile => "TRUNCATE_FILE",
            Opcode::ListExtendedAttr => "LIST_EXTENDED_ATTR",
            Opcode::GetExtendedAttr => "GET_EXTENDED_ATTR",
        }
    }
}

impl TryFrom<i32> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|idx| Opcode::ALL.get(idx).copied())
            .ok_or(ProtocolError::UnknownOpcode(value))
    }
}

impl From<Opcode> for i32 {
    fn from(op: Opcode) -> Self {
        op.code()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_numbering_is_stable() {
        for (idx, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.code(), idx as i32);
            assert_eq!(Opcode::try_from(idx as i32).unwrap(), *op);
        }
        assert_eq!(Opcode::ReadFileData.code(), 8);
        assert_eq!(Opcode::GetExtendedAttr.code(), 14);
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            Opcode::try_from(15),
            Err(ProtocolError::UnknownOpcode(15))
        ));
        assert!(Opcode::try_from(-1).is_err());
    }
}
