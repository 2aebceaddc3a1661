//! Typed wire client.
//!
//! Speaks the client request surface over one connection; the call sequences
//! mirror what a client library would issue, data phases included. Used by
//! the integration tests and by embedders that talk to an in-process broker.

use vfs_ipc::Endpoint;
use vfs_proto::{
    lower32, merge_loup32, split_i64, upper32, ClientMethod, Errno, NodeStat, SeekWhence,
    ServiceId, VfsResult, WalkFlags, FD_NONE,
};

pub struct VfsClient {
    endpoint: Endpoint,
}

/// One streamed mount-table record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MtabRecord {
    pub mount_point: String,
    pub opts: String,
    pub fs_name: String,
    pub instance: u32,
    pub service_id: ServiceId,
}

impl VfsClient {
    pub fn new(endpoint: Endpoint) -> Self {
        VfsClient { endpoint }
    }

    pub async fn mount(
        &self,
        fs_name: &str,
        instance: u32,
        blocking: bool,
        service_id: ServiceId,
        mount_point: &str,
        opts: &str,
    ) -> VfsResult<()> {
        let flags = u64::from(blocking);
        let pending = self
            .endpoint
            .send(
                ClientMethod::Mount as u32,
                [service_id.0, flags, u64::from(instance), 0],
            )
            .await?;
        self.endpoint
            .data_write(mount_point.as_bytes().to_vec())
            .await?;
        self.endpoint.data_write(opts.as_bytes().to_vec()).await?;
        self.endpoint.data_write(fs_name.as_bytes().to_vec()).await?;
        self.endpoint.call(ClientMethod::Ping as u32, [0; 4]).await?;
        pending.wait().await?.result().map(|_| ())
    }

    pub async fn unmount(&self, mount_point: &str) -> VfsResult<()> {
        self.endpoint
            .call_with_data(
                ClientMethod::Unmount as u32,
                [0; 4],
                mount_point.as_bytes().to_vec(),
            )
            .await?
            .result()
            .map(|_| ())
    }

    /// Walk relative to `parent` (or the root when `None`); returns the new
    /// descriptor.
    pub async fn walk(
        &self,
        parent: Option<u64>,
        path: &str,
        flags: WalkFlags,
    ) -> VfsResult<u64> {
        let reply = self
            .endpoint
            .call_with_data(
                ClientMethod::Walk as u32,
                [parent.unwrap_or(FD_NONE), u64::from(flags.bits()), 0, 0],
                path.as_bytes().to_vec(),
            )
            .await?;
        Ok(reply.result()?[0])
    }

    pub async fn open(&self, fd: u64, mode: vfs_proto::OpenMode) -> VfsResult<()> {
        self.endpoint
            .call(
                ClientMethod::Open2 as u32,
                [fd, u64::from(mode.bits()), 0, 0],
            )
            .await?
            .result()
            .map(|_| ())
    }

    pub async fn read(&self, fd: u64, max: usize) -> VfsResult<Vec<u8>> {
        let pending = self
            .endpoint
            .send(ClientMethod::Read as u32, [fd, 0, 0, 0])
            .await?;
        let data = self.endpoint.data_read(max).await?;
        pending.wait().await?.result()?;
        Ok(data)
    }

    /// Returns `(bytes written, new size)`.
    pub async fn write(&self, fd: u64, data: &[u8]) -> VfsResult<(u64, u64)> {
        let reply = self
            .endpoint
            .call_with_data(ClientMethod::Write as u32, [fd, 0, 0, 0], data.to_vec())
            .await?;
        let args = reply.result()?;
        Ok((args[0], merge_loup32(args[1], args[2])))
    }

    pub async fn seek(&self, fd: u64, offset: i64, whence: SeekWhence) -> VfsResult<u64> {
        let (lo, hi) = split_i64(offset);
        let reply = self
            .endpoint
            .call(ClientMethod::Seek as u32, [fd, lo, hi, whence.code()])
            .await?;
        let args = reply.result()?;
        Ok(merge_loup32(args[0], args[1]))
    }

    pub async fn truncate(&self, fd: u64, size: u64) -> VfsResult<()> {
        self.endpoint
            .call(
                ClientMethod::Truncate as u32,
                [fd, lower32(size), upper32(size), 0],
            )
            .await?
            .result()
            .map(|_| ())
    }

    pub async fn sync(&self, fd: u64) -> VfsResult<()> {
        self.endpoint
            .call(ClientMethod::Sync as u32, [fd, 0, 0, 0])
            .await?
            .result()
            .map(|_| ())
    }

    pub async fn fstat(&self, fd: u64) -> VfsResult<NodeStat> {
        let pending = self
            .endpoint
            .send(ClientMethod::Fstat as u32, [fd, 0, 0, 0])
            .await?;
        let data = self.endpoint.data_read(NodeStat::WIRE_LEN).await?;
        pending.wait().await?.result()?;
        NodeStat::from_bytes(&data).ok_or(Errno::Io)
    }

    pub async fn close(&self, fd: u64) -> VfsResult<()> {
        self.endpoint
            .call(ClientMethod::Close as u32, [fd, 0, 0, 0])
            .await?
            .result()
            .map(|_| ())
    }

    pub async fn unlink(
        &self,
        parent: Option<u64>,
        expect: Option<u64>,
        path: &str,
        flags: WalkFlags,
    ) -> VfsResult<()> {
        self.endpoint
            .call_with_data(
                ClientMethod::Unlink2 as u32,
                [
                    parent.unwrap_or(FD_NONE),
                    expect.unwrap_or(FD_NONE),
                    u64::from(flags.bits()),
                    0,
                ],
                path.as_bytes().to_vec(),
            )
            .await?
            .result()
            .map(|_| ())
    }

    pub async fn rename(&self, base: Option<u64>, old: &str, new: &str) -> VfsResult<()> {
        let pending = self
            .endpoint
            .send(
                ClientMethod::Rename as u32,
                [base.unwrap_or(FD_NONE), 0, 0, 0],
            )
            .await?;
        self.endpoint.data_write(old.as_bytes().to_vec()).await?;
        self.endpoint.data_write(new.as_bytes().to_vec()).await?;
        pending.wait().await?.result().map(|_| ())
    }

    pub async fn dup(&self, old_fd: u64, new_fd: u64) -> VfsResult<u64> {
        let reply = self
            .endpoint
            .call(ClientMethod::Dup as u32, [old_fd, new_fd, 0, 0])
            .await?;
        Ok(reply.result()?[0])
    }

    pub async fn wait_handle(&self) -> VfsResult<u64> {
        let reply = self
            .endpoint
            .call(ClientMethod::WaitHandle as u32, [0; 4])
            .await?;
        Ok(reply.result()?[0])
    }

    pub async fn get_mtab(&self) -> VfsResult<Vec<MtabRecord>> {
        let pending = self
            .endpoint
            .send(ClientMethod::GetMtab as u32, [0; 4])
            .await?;
        let count = self
            .endpoint
            .call(ClientMethod::Ping as u32, [0; 4])
            .await?
            .result()?[0];

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mount_point = self.read_field(4096).await?;
            let opts = self.read_field(1024).await?;
            let fs_name = self.read_field(256).await?;
            let args = self
                .endpoint
                .call(ClientMethod::Ping as u32, [0; 4])
                .await?
                .result()?;
            records.push(MtabRecord {
                mount_point,
                opts,
                fs_name,
                instance: args[0] as u32,
                service_id: ServiceId(args[1]),
            });
        }
        pending.wait().await?.result()?;
        Ok(records)
    }

    async fn read_field(&self, max: usize) -> VfsResult<String> {
        let data = self.endpoint.data_read(max).await?;
        String::from_utf8(data).map_err(|_| Errno::Io)
    }
}
