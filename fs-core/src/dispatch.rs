use std::time::{Duration, Instant};

use fs_proto::{Attr, DirEntryRecord, FsError, Ino, MessagePort, Reply, Request};

/// The operations a filesystem server implements. The dispatcher decodes a
/// verb off the port and calls straight through to the matching method
/// (spec §4.11); every method call is one complete, atomic request — spec
/// §5's single-threaded cooperative model means no method here ever
/// suspends except on the device I/O the cache performs underneath it.
pub trait FsOps {
    fn lookup(&mut self, dir_inode: Ino, name: &str) -> Result<Attr, FsError>;
    fn close(&mut self, inode: Ino) -> Result<(), FsError>;
    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        oflags: u32,
    ) -> Result<Attr, FsError>;
    fn read(&mut self, inode: Ino, offset: u64, size: u32) -> Result<Vec<u8>, FsError>;
    fn write(&mut self, inode: Ino, offset: u64, data: &[u8]) -> Result<u32, FsError>;
    fn readdir(
        &mut self,
        inode: Ino,
        cookie: u64,
        size: u32,
    ) -> Result<(u64, Vec<DirEntryRecord>), FsError>;
    fn mkdir(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Attr, FsError>;
    fn rmdir(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError>;
    fn mknod(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(), FsError>;
    fn unlink(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError>;
    fn rename(
        &mut self,
        src_dir: Ino,
        src_name: &str,
        dst_dir: Ino,
        dst_name: &str,
    ) -> Result<(), FsError>;
    fn chmod(&mut self, inode: Ino, mode: u32) -> Result<(), FsError>;
    fn chown(&mut self, inode: Ino, uid: u32, gid: u32) -> Result<(), FsError>;
    fn truncate(&mut self, inode: Ino, size: u64) -> Result<(), FsError>;

    /// Write back every dirty block and the GDT/FAT metadata (spec §4.11).
    fn flush(&mut self);
}

fn execute<F: FsOps>(ops: &mut F, request: Request) -> Result<Reply, FsError> {
    match request {
        Request::Lookup { dir_inode, name } => ops.lookup(dir_inode, &name).map(Reply::Attr),
        Request::Close { inode } => ops.close(inode).map(|()| Reply::Empty),
        Request::Create {
            dir_inode,
            name,
            mode,
            uid,
            gid,
            oflags,
        } => ops
            .create(dir_inode, &name, mode, uid, gid, oflags)
            .map(Reply::Attr),
        Request::Read {
            inode,
            offset,
            size,
        } => ops.read(inode, offset, size).map(Reply::Data),
        Request::Write {
            inode,
            offset,
            data,
        } => ops.write(inode, offset, &data).map(Reply::Written),
        Request::Readdir {
            inode,
            cookie,
            size,
        } => ops
            .readdir(inode, cookie, size)
            .map(|(next_cookie, entries)| Reply::Readdir {
                next_cookie,
                entries,
            }),
        Request::Mkdir {
            dir_inode,
            name,
            mode,
            uid,
            gid,
        } => ops.mkdir(dir_inode, &name, mode, uid, gid).map(Reply::Attr),
        Request::Rmdir { dir_inode, name } => ops.rmdir(dir_inode, &name).map(|()| Reply::Empty),
        Request::Mknod {
            dir_inode,
            name,
            mode,
            uid,
            gid,
        } => ops
            .mknod(dir_inode, &name, mode, uid, gid)
            .map(|()| Reply::Empty),
        Request::Unlink { dir_inode, name } => {
            ops.unlink(dir_inode, &name).map(|()| Reply::Empty)
        }
        Request::Rename {
            src_dir,
            src_name,
            dst_dir,
            dst_name,
        } => ops
            .rename(src_dir, &src_name, dst_dir, &dst_name)
            .map(|()| Reply::Empty),
        Request::Chmod { inode, mode } => ops.chmod(inode, mode).map(|()| Reply::Empty),
        Request::Chown { inode, uid, gid } => ops.chown(inode, uid, gid).map(|()| Reply::Empty),
        Request::Truncate { inode, size } => ops.truncate(inode, size).map(|()| Reply::Empty),
    }
}

/// Drains and replies to every request currently queued on `port`, one at a
/// time: received -> decoded -> executed -> replied, with the reply sent
/// before the next message is dequeued (spec §4.11, §5).
pub fn drain_once<P: MessagePort, F: FsOps>(port: &mut P, ops: &mut F) -> usize {
    let mut handled = 0;
    while let Some((msgid, request)) = port.poll() {
        log::debug!("dispatch: {:?}", request.verb());
        let result = execute(ops, request);
        if let Err(err) = &result {
            log::warn!("dispatch: request failed: {err} (errno {})", err.to_errno());
        }
        port.reply(msgid, result);
        handled += 1;
    }
    handled
}

/// The event loop of spec §4.11: wait on the port with a timeout equal to
/// the flush period, drain whatever arrived, and flush once the clock has
/// crossed the next scheduled flush.
pub struct Dispatcher<P, F> {
    port: P,
    ops: F,
    flush_interval: Duration,
    last_flush: Instant,
}

impl<P: MessagePort, F: FsOps> Dispatcher<P, F> {
    pub fn new(port: P, ops: F, flush_interval: Duration) -> Self {
        Self {
            port,
            ops,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub fn ops_mut(&mut self) -> &mut F {
        &mut self.ops
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Run one iteration: wait up to the flush interval, drain all pending
    /// messages, and flush if the interval has elapsed. Returns the number
    /// of requests handled.
    pub fn tick(&mut self) -> usize {
        self.port.wait(self.flush_interval);
        let handled = drain_once(&mut self.port, &mut self.ops);

        if self.last_flush.elapsed() >= self.flush_interval {
            log::info!("dispatch: periodic flush");
            self.ops.flush();
            self.last_flush = Instant::now();
        }

        handled
    }

    /// Run until `shutdown` reports true, draining the queue once more
    /// before exiting (spec §4.11's clean-termination contract).
    pub fn run_until(&mut self, mut shutdown: impl FnMut() -> bool) {
        loop {
            self.tick();
            if shutdown() {
                drain_once(&mut self.port, &mut self.ops);
                self.ops.flush();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_proto::LocalPort;
    use std::cell::Cell;

    struct CountingOps {
        flushes: Cell<u32>,
    }

    impl FsOps for CountingOps {
        fn lookup(&mut self, _dir_inode: Ino, _name: &str) -> Result<Attr, FsError> {
            Err(FsError::NotFound)
        }
        fn close(&mut self, _inode: Ino) -> Result<(), FsError> {
            Ok(())
        }
        fn create(
            &mut self,
            _dir_inode: Ino,
            _name: &str,
            _mode: u32,
            _uid: u32,
            _gid: u32,
            _oflags: u32,
        ) -> Result<Attr, FsError> {
            Err(FsError::NotSupported)
        }
        fn read(&mut self, _inode: Ino, _offset: u64, _size: u32) -> Result<Vec<u8>, FsError> {
            Ok(vec![])
        }
        fn write(&mut self, _inode: Ino, _offset: u64, _data: &[u8]) -> Result<u32, FsError> {
            Ok(0)
        }
        fn readdir(
            &mut self,
            _inode: Ino,
            _cookie: u64,
            _size: u32,
        ) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
            Ok((0, vec![]))
        }
        fn mkdir(
            &mut self,
            _dir_inode: Ino,
            _name: &str,
            _mode: u32,
            _uid: u32,
            _gid: u32,
        ) -> Result<Attr, FsError> {
            Err(FsError::NotSupported)
        }
        fn rmdir(&mut self, _dir_inode: Ino, _name: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn mknod(
            &mut self,
            _dir_inode: Ino,
            _name: &str,
            _mode: u32,
            _uid: u32,
            _gid: u32,
        ) -> Result<(), FsError> {
            Ok(())
        }
        fn unlink(&mut self, _dir_inode: Ino, _name: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn rename(
            &mut self,
            _src_dir: Ino,
            _src_name: &str,
            _dst_dir: Ino,
            _dst_name: &str,
        ) -> Result<(), FsError> {
            Ok(())
        }
        fn chmod(&mut self, _inode: Ino, _mode: u32) -> Result<(), FsError> {
            Ok(())
        }
        fn chown(&mut self, _inode: Ino, _uid: u32, _gid: u32) -> Result<(), FsError> {
            Ok(())
        }
        fn truncate(&mut self, _inode: Ino, _size: u64) -> Result<(), FsError> {
            Ok(())
        }
        fn flush(&mut self) {
            self.flushes.set(self.flushes.get() + 1);
        }
    }

    #[test]
    fn unknown_lookup_replies_with_errno() {
        let mut port = LocalPort::new();
        let id = port.submit(Request::Lookup {
            dir_inode: 2,
            name: "missing".into(),
        });
        let mut ops = CountingOps {
            flushes: Cell::new(0),
        };
        drain_once(&mut port, &mut ops);
        let reply = port.take_reply(id).unwrap();
        assert_eq!(reply, Err(FsError::NotFound));
    }

    #[test]
    fn close_always_succeeds() {
        let mut port = LocalPort::new();
        let id = port.submit(Request::Close { inode: 5 });
        let mut ops = CountingOps {
            flushes: Cell::new(0),
        };
        drain_once(&mut port, &mut ops);
        assert_eq!(port.take_reply(id).unwrap(), Ok(Reply::Empty));
    }

    #[test]
    fn tick_flushes_once_interval_elapses() {
        let port = LocalPort::new();
        let ops = CountingOps {
            flushes: Cell::new(0),
        };
        let mut dispatcher = Dispatcher::new(port, ops, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        dispatcher.tick();
        assert_eq!(dispatcher.ops_mut().flushes.get(), 1);
    }
}
