//! The request protocol shared by every filesystem server.
//!
//! This is the message contract a server consumes from the kernel's VFS
//! (spec §6.1): a verb tag plus a verb-specific argument set, a reply, and
//! a `MessagePort` the dispatcher polls for new messages and replies on.
//! The split between a fixed header and a separately-read trailing payload
//! that the real `getmsg`/`readmsg`/`replymsg`/`writemsg` syscalls impose is
//! collapsed here into plain Rust payload fields on [`Request`] and
//! [`Reply`] — a server built against this crate still honors the verb set
//! and argument shapes of §6.1, it just doesn't need a second call to fetch
//! bytes that already arrived with the header.

mod errno;
mod port;

pub use errno::FsError;
pub use port::{LocalPort, MessagePort, MsgId};

/// Inode number as carried on the wire. Each server interprets this in its
/// own numbering space (ext2 inode number, devfs table index, ...).
pub type Ino = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Lookup {
        dir_inode: Ino,
        name: String,
    },
    Close {
        inode: Ino,
    },
    Create {
        dir_inode: Ino,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        oflags: u32,
    },
    Read {
        inode: Ino,
        offset: u64,
        size: u32,
    },
    Write {
        inode: Ino,
        offset: u64,
        data: Vec<u8>,
    },
    Readdir {
        inode: Ino,
        cookie: u64,
        size: u32,
    },
    Mkdir {
        dir_inode: Ino,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    Rmdir {
        dir_inode: Ino,
        name: String,
    },
    Mknod {
        dir_inode: Ino,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    Unlink {
        dir_inode: Ino,
        name: String,
    },
    Rename {
        src_dir: Ino,
        src_name: String,
        dst_dir: Ino,
        dst_name: String,
    },
    Chmod {
        inode: Ino,
        mode: u32,
    },
    Chown {
        inode: Ino,
        uid: u32,
        gid: u32,
    },
    Truncate {
        inode: Ino,
        size: u64,
    },
}

/// Attributes returned by LOOKUP, CREATE and MKDIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attr {
    pub inode: Ino,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// A single directory entry, as emitted by READDIR's trailing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub inode: Ino,
    pub file_type: u8,
    pub name: String,
}

impl DirEntryRecord {
    /// Size this record occupies in the caller's output buffer: a 16-byte
    /// header (inode, file_type, name_len, padding) plus the name itself,
    /// 8-byte aligned as the reply buffer's records are (spec §4.9).
    pub fn wire_size(&self) -> u32 {
        let raw = 16 + self.name.len();
        raw.div_ceil(8) as u32 * 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Attr(Attr),
    Empty,
    Data(Vec<u8>),
    Written(u32),
    Readdir {
        next_cookie: u64,
        entries: Vec<DirEntryRecord>,
    },
}

/// Verb tags, exposed separately from [`Request`] for logging and dispatch
/// tables that want to switch on the verb before looking at its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Lookup,
    Close,
    Create,
    Read,
    Write,
    Readdir,
    Mkdir,
    Rmdir,
    Mknod,
    Unlink,
    Rename,
    Chmod,
    Chown,
    Truncate,
}

impl Request {
    pub fn verb(&self) -> Verb {
        match self {
            Request::Lookup { .. } => Verb::Lookup,
            Request::Close { .. } => Verb::Close,
            Request::Create { .. } => Verb::Create,
            Request::Read { .. } => Verb::Read,
            Request::Write { .. } => Verb::Write,
            Request::Readdir { .. } => Verb::Readdir,
            Request::Mkdir { .. } => Verb::Mkdir,
            Request::Rmdir { .. } => Verb::Rmdir,
            Request::Mknod { .. } => Verb::Mknod,
            Request::Unlink { .. } => Verb::Unlink,
            Request::Rename { .. } => Verb::Rename,
            Request::Chmod { .. } => Verb::Chmod,
            Request::Chown { .. } => Verb::Chown,
            Request::Truncate { .. } => Verb::Truncate,
        }
    }
}
