//! End-to-end scenarios: a real broker, in-memory backends and a wire
//! client, all over the IPC fabric.

use std::sync::Arc;

use vfs_broker::{Broker, ClientSession, VfsClient};
use vfs_ipc::ExchangePool;
use vfs_memfs::MemFs;
use vfs_proto::{Errno, OpenMode, SeekWhence, ServiceId, WalkFlags};

const TMPFS_SERVICE: ServiceId = ServiceId(7);
const CHILD_SERVICE: ServiceId = ServiceId(8);

struct Fixture {
    broker: Arc<Broker>,
    session: Arc<ClientSession>,
    client: VfsClient,
    fs: MemFs,
}

fn fixture() -> Fixture {
    let broker = Broker::new();
    let fs = MemFs::new("tmpfs", 0);
    broker
        .registry()
        .register(fs.info(), ExchangePool::new(Arc::new(fs.clone()), 4))
        .expect("register tmpfs");
    let session = ClientSession::new();
    let client = VfsClient::new(broker.attach_client(session.clone()));
    Fixture {
        broker,
        session,
        client,
        fs,
    }
}

async fn mount_root(fx: &Fixture) {
    fx.client
        .mount("tmpfs", 0, false, TMPFS_SERVICE, "/", "")
        .await
        .expect("root mount");
}

async fn create_file(fx: &Fixture, path: &str) -> u64 {
    fx.client
        .walk(None, path, WalkFlags::MAY_CREATE | WalkFlags::REGULAR)
        .await
        .expect("create")
}

/// DESTROY is fire-and-forget from the broker's side, so give the backend a
/// moment to process it before asserting the node is gone.
async fn assert_destroyed(fs: &MemFs, service: ServiceId, index: vfs_proto::FsIndex) {
    for _ in 0..100 {
        if !fs.node_exists(service, index) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("node {index:?} still present in service {service:?}");
}

#[tokio::test]
async fn s1_root_mount() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = fx
        .client
        .walk(None, "/", WalkFlags::empty())
        .await
        .expect("walk root");
    assert_eq!(fd, 0);

    let stat = fx.client.fstat(fd).await.expect("fstat");
    let root = &fx.broker.mounts().snapshot()[0];
    assert_eq!(stat.service_id, root.root_triplet.service_id);
    assert_eq!(stat.index, root.root_triplet.index);
}

#[tokio::test]
async fn s2_busy_unmount() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = fx
        .client
        .walk(None, "/", WalkFlags::empty())
        .await
        .expect("walk root");
    assert_eq!(fx.client.unmount("/").await, Err(Errno::Busy));

    fx.client.close(fd).await.expect("close");
    fx.client.unmount("/").await.expect("unmount");
    assert_eq!(
        fx.client.walk(None, "/", WalkFlags::empty()).await,
        Err(Errno::NoEntry)
    );
}

#[tokio::test]
async fn s3_mount_stacking() {
    let fx = fixture();
    mount_root(&fx).await;

    let dir = fx
        .client
        .walk(None, "/m", WalkFlags::MAY_CREATE | WalkFlags::DIRECTORY)
        .await
        .expect("mkdir /m");
    fx.client.close(dir).await.expect("close dir");

    fx.client
        .mount("tmpfs", 0, false, CHILD_SERVICE, "/m", "")
        .await
        .expect("mount child");

    let fd = create_file(&fx, "/m/x").await;
    let stat = fx.client.fstat(fd).await.expect("fstat");
    // The file was created inside the child backend's volume.
    assert_eq!(stat.service_id, CHILD_SERVICE);
    assert!(fx.fs.node_exists(CHILD_SERVICE, stat.index));

    assert_eq!(fx.client.unmount("/m").await, Err(Errno::Busy));
    fx.client.close(fd).await.expect("close");
    fx.client.unmount("/m").await.expect("unmount child");

    // The child volume is gone; the mount point is a plain directory again.
    let fd = fx
        .client
        .walk(None, "/m", WalkFlags::DIRECTORY)
        .await
        .expect("walk /m");
    let stat = fx.client.fstat(fd).await.expect("fstat");
    assert_eq!(stat.service_id, TMPFS_SERVICE);
}

#[tokio::test]
async fn s4_rename_swap() {
    let fx = fixture();
    mount_root(&fx).await;

    let a = create_file(&fx, "/a").await;
    let a_stat = fx.client.fstat(a).await.expect("stat a");
    fx.client.close(a).await.expect("close a");

    let b = create_file(&fx, "/b").await;
    let b_stat = fx.client.fstat(b).await.expect("stat b");
    fx.client.close(b).await.expect("close b");

    fx.client.rename(None, "/a", "/b").await.expect("rename");

    assert_eq!(
        fx.client.walk(None, "/a", WalkFlags::empty()).await,
        Err(Errno::NoEntry)
    );
    let fd = fx
        .client
        .walk(None, "/b", WalkFlags::empty())
        .await
        .expect("walk /b");
    let stat = fx.client.fstat(fd).await.expect("stat /b");
    assert_eq!(stat.index, a_stat.index);
    // The displaced node has been destroyed at the backend.
    assert_destroyed(&fx.fs, TMPFS_SERVICE, b_stat.index).await;
}

#[tokio::test]
async fn s5_seek_end_overflow() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = create_file(&fx, "/f").await;
    fx.client
        .open(fd, OpenMode::READ | OpenMode::WRITE)
        .await
        .expect("open");
    fx.client.write(fd, &[0u8; 10]).await.expect("write");
    fx.client.close(fd).await.expect("close");

    let fd = fx
        .client
        .walk(None, "/f", WalkFlags::empty())
        .await
        .expect("walk");
    fx.client.open(fd, OpenMode::READ).await.expect("open");
    assert_eq!(
        fx.client.seek(fd, -20, SeekWhence::End).await,
        Err(Errno::Overflow)
    );
    // The failed seek left the position untouched.
    assert_eq!(
        fx.client.seek(fd, 0, SeekWhence::Current).await,
        Ok(0)
    );
}

#[tokio::test]
async fn s6_prefix_rename_is_rejected() {
    let fx = fixture();
    mount_root(&fx).await;
    create_file(&fx, "/a").await;

    assert_eq!(
        fx.client.rename(None, "/a", "/a/b").await,
        Err(Errno::Invalid)
    );
    // The namespace was not touched.
    fx.client
        .walk(None, "/a", WalkFlags::REGULAR)
        .await
        .expect("walk /a");
}

#[tokio::test]
async fn write_then_read_round_trip() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = create_file(&fx, "/data").await;
    fx.client
        .open(fd, OpenMode::READ | OpenMode::WRITE)
        .await
        .expect("open");

    fx.client
        .seek(fd, 100, SeekWhence::Set)
        .await
        .expect("seek to 100");
    let (written, size) = fx.client.write(fd, b"payload").await.expect("write");
    assert_eq!(written, 7);
    assert_eq!(size, 107);

    fx.client.seek(fd, 100, SeekWhence::Set).await.expect("seek back");
    let data = fx.client.read(fd, 7).await.expect("read");
    assert_eq!(data, b"payload");
}

#[tokio::test]
async fn seek_set_then_cur_round_trips() {
    let fx = fixture();
    mount_root(&fx).await;
    let fd = create_file(&fx, "/f").await;

    for k in [0i64, 1, 4096, i64::MAX] {
        assert_eq!(fx.client.seek(fd, k, SeekWhence::Set).await, Ok(k as u64));
        assert_eq!(
            fx.client.seek(fd, 0, SeekWhence::Current).await,
            Ok(k as u64)
        );
    }
    assert_eq!(
        fx.client.seek(fd, -1, SeekWhence::Set).await,
        Err(Errno::Invalid)
    );
}

#[tokio::test]
async fn append_mode_writes_at_the_end() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = create_file(&fx, "/log").await;
    fx.client
        .open(fd, OpenMode::WRITE | OpenMode::APPEND)
        .await
        .expect("open append");
    fx.client.write(fd, b"one").await.expect("first");
    // A seek back must not matter: append snaps to the size.
    fx.client.seek(fd, 0, SeekWhence::Set).await.expect("seek");
    let (_, size) = fx.client.write(fd, b"two").await.expect("second");
    assert_eq!(size, 6);

    let fd = fx
        .client
        .walk(None, "/log", WalkFlags::empty())
        .await
        .expect("walk");
    fx.client.open(fd, OpenMode::READ).await.expect("open read");
    assert_eq!(fx.client.read(fd, 16).await.expect("read"), b"onetwo");
}

#[tokio::test]
async fn readdir_streams_entry_names() {
    let fx = fixture();
    mount_root(&fx).await;
    for path in ["/d", "/d/aa", "/d/b"] {
        let flags = if path == "/d" {
            WalkFlags::MAY_CREATE | WalkFlags::DIRECTORY
        } else {
            WalkFlags::MAY_CREATE | WalkFlags::REGULAR
        };
        let fd = fx.client.walk(None, path, flags).await.expect("create");
        fx.client.close(fd).await.expect("close");
    }

    let dir = fx
        .client
        .walk(None, "/d", WalkFlags::DIRECTORY)
        .await
        .expect("walk dir");
    fx.client.open(dir, OpenMode::READ).await.expect("open dir");
    assert_eq!(fx.client.read(dir, 256).await.expect("first"), b"aa");
    assert_eq!(fx.client.read(dir, 256).await.expect("second"), b"b");
    assert_eq!(fx.client.read(dir, 256).await.expect("eof"), b"");
}

#[tokio::test]
async fn open_validates_modes() {
    let fx = fixture();
    mount_root(&fx).await;

    let dir = fx
        .client
        .walk(None, "/", WalkFlags::empty())
        .await
        .expect("walk root");
    // Writing a directory is refused.
    assert_eq!(
        fx.client.open(dir, OpenMode::WRITE).await,
        Err(Errno::Invalid)
    );
    // Reads without an open bit set are refused too.
    assert_eq!(fx.client.read(dir, 16).await, Err(Errno::Invalid));
    fx.client.open(dir, OpenMode::READ).await.expect("open read");

    let fd = create_file(&fx, "/f").await;
    assert_eq!(fx.client.write(fd, b"x").await, Err(Errno::Invalid));
}

#[tokio::test]
async fn walk_flag_combinations_are_validated() {
    let fx = fixture();
    mount_root(&fx).await;

    let bad = [
        WalkFlags::MAY_CREATE | WalkFlags::MUST_CREATE | WalkFlags::REGULAR,
        WalkFlags::REGULAR | WalkFlags::DIRECTORY,
        WalkFlags::MAY_CREATE,
    ];
    for flags in bad {
        assert_eq!(
            fx.client.walk(None, "/x", flags).await,
            Err(Errno::Invalid)
        );
    }

    // MUST_CREATE fails on an existing name.
    create_file(&fx, "/x").await;
    assert_eq!(
        fx.client
            .walk(None, "/x", WalkFlags::MUST_CREATE | WalkFlags::REGULAR)
            .await,
        Err(Errno::Exists)
    );
}

#[tokio::test]
async fn dup_shares_the_open_file() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = create_file(&fx, "/f").await;
    fx.client
        .open(fd, OpenMode::READ | OpenMode::WRITE)
        .await
        .expect("open");
    assert_eq!(fx.client.dup(fd, 5).await, Ok(5));

    // Both descriptors share position and open mode.
    fx.client.write(5, b"abc").await.expect("write via dup");
    fx.client.seek(fd, 0, SeekWhence::Set).await.expect("seek");
    assert_eq!(fx.client.read(5, 3).await.expect("read via dup"), b"abc");

    fx.client.close(fd).await.expect("close original");
    fx.client.close(5).await.expect("close dup");
    assert_eq!(fx.client.close(5).await, Err(Errno::BadFd));
}

#[tokio::test]
async fn unlink_with_expected_descriptor() {
    let fx = fixture();
    mount_root(&fx).await;

    let a = create_file(&fx, "/a").await;
    let b = create_file(&fx, "/b").await;

    // Mismatched expectation leaves the name alone.
    assert_eq!(
        fx.client
            .unlink(None, Some(b), "/a", WalkFlags::empty())
            .await,
        Err(Errno::NoEntry)
    );
    fx.client
        .unlink(None, Some(a), "/a", WalkFlags::empty())
        .await
        .expect("unlink");
    assert_eq!(
        fx.client.walk(None, "/a", WalkFlags::empty()).await,
        Err(Errno::NoEntry)
    );

    // The open descriptor still works; the node dies on close.
    let stat = fx.client.fstat(a).await.expect("stat unlinked");
    assert!(fx.fs.node_exists(TMPFS_SERVICE, stat.index));
    fx.client.close(a).await.expect("close");
    assert_destroyed(&fx.fs, TMPFS_SERVICE, stat.index).await;
    fx.client.close(b).await.expect("close b");
}

#[tokio::test]
async fn rename_inside_a_shared_directory() {
    let fx = fixture();
    mount_root(&fx).await;

    let d = fx
        .client
        .walk(None, "/d", WalkFlags::MAY_CREATE | WalkFlags::DIRECTORY)
        .await
        .expect("mkdir");
    fx.client.close(d).await.expect("close");
    let x = create_file(&fx, "/d/x").await;
    let x_stat = fx.client.fstat(x).await.expect("stat");
    fx.client.close(x).await.expect("close");

    fx.client.rename(None, "/d/x", "/d/y").await.expect("rename");
    let y = fx
        .client
        .walk(None, "/d/y", WalkFlags::empty())
        .await
        .expect("walk /d/y");
    assert_eq!(fx.client.fstat(y).await.expect("stat").index, x_stat.index);
}

#[tokio::test]
async fn rename_failure_restores_the_old_name() {
    let fx = fixture();
    mount_root(&fx).await;
    create_file(&fx, "/a").await;

    // The target parent does not exist, so the LINK step cannot happen.
    assert_eq!(
        fx.client.rename(None, "/a", "/missing/b").await,
        Err(Errno::NoEntry)
    );
    fx.client
        .walk(None, "/a", WalkFlags::REGULAR)
        .await
        .expect("/a still there");
}

#[tokio::test]
async fn truncate_updates_the_cached_size() {
    let fx = fixture();
    mount_root(&fx).await;

    let fd = create_file(&fx, "/f").await;
    fx.client
        .open(fd, OpenMode::READ | OpenMode::WRITE)
        .await
        .expect("open");
    fx.client.write(fd, b"0123456789").await.expect("write");
    fx.client.truncate(fd, 4).await.expect("truncate");

    assert_eq!(fx.client.fstat(fd).await.expect("stat").size, 4);
    assert_eq!(fx.client.seek(fd, 0, SeekWhence::End).await, Ok(4));
    fx.client.sync(fd).await.expect("sync");
}

#[tokio::test]
async fn get_mtab_streams_every_entry() {
    let fx = fixture();
    mount_root(&fx).await;

    let dir = fx
        .client
        .walk(None, "/m", WalkFlags::MAY_CREATE | WalkFlags::DIRECTORY)
        .await
        .expect("mkdir");
    fx.client.close(dir).await.expect("close");
    fx.client
        .mount("tmpfs", 0, false, CHILD_SERVICE, "/m", "ro")
        .await
        .expect("mount child");

    let records = fx.client.get_mtab().await.expect("mtab");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].mount_point, "/");
    assert_eq!(records[0].fs_name, "tmpfs");
    assert_eq!(records[0].service_id, TMPFS_SERVICE);
    assert_eq!(records[1].mount_point, "/m");
    assert_eq!(records[1].opts, "ro");
    assert_eq!(records[1].service_id, CHILD_SERVICE);
}

#[tokio::test]
async fn wait_handle_pops_pushed_descriptors() {
    let fx = fixture();
    mount_root(&fx).await;
    let fd = create_file(&fx, "/f").await;

    fx.session.push_handle(fd);
    assert_eq!(fx.client.wait_handle().await, Ok(fd));
}

#[tokio::test]
async fn mount_waits_for_a_late_backend() {
    let fx = fixture();
    mount_root(&fx).await;

    let dir = fx
        .client
        .walk(None, "/ext", WalkFlags::MAY_CREATE | WalkFlags::DIRECTORY)
        .await
        .expect("mkdir");
    fx.client.close(dir).await.expect("close");

    // Non-blocking mount of an unregistered filesystem fails fast.
    assert_eq!(
        fx.client
            .mount("ext4fs", 0, false, ServiceId(9), "/ext", "")
            .await,
        Err(Errno::NoEntry)
    );

    // A blocking mount waits for the registration.
    let session = ClientSession::new();
    let client = VfsClient::new(fx.broker.attach_client(session));
    let pending = tokio::spawn(async move {
        client
            .mount("ext4fs", 0, true, ServiceId(9), "/ext", "")
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(!pending.is_finished());

    let ext = MemFs::new("ext4fs", 0);
    fx.broker
        .registry()
        .register(ext.info(), ExchangePool::new(Arc::new(ext.clone()), 2))
        .expect("register ext4fs");
    pending.await.expect("join").expect("blocking mount");

    let fd = create_file(&fx, "/ext/file").await;
    let stat = fx.client.fstat(fd).await.expect("stat");
    assert!(ext.node_exists(ServiceId(9), stat.index));
}

#[tokio::test]
async fn node_cache_keeps_one_node_per_triplet() {
    let fx = fixture();
    mount_root(&fx).await;

    let root_triplet = fx.broker.mounts().snapshot()[0].root_triplet;
    // Mount reference only.
    assert_eq!(fx.broker.cache().refs(&root_triplet), 1);

    let a = fx
        .client
        .walk(None, "/", WalkFlags::empty())
        .await
        .expect("walk");
    let b = fx
        .client
        .walk(None, "/", WalkFlags::empty())
        .await
        .expect("walk again");
    assert_eq!(fx.broker.cache().refs(&root_triplet), 3);

    fx.client.close(a).await.expect("close");
    fx.client.close(b).await.expect("close");
    assert_eq!(fx.broker.cache().refs(&root_triplet), 1);
}

#[tokio::test]
async fn concurrent_walks_share_the_namespace_read_lock() {
    let fx = fixture();
    mount_root(&fx).await;
    for i in 0..8 {
        create_file(&fx, &format!("/f{i}")).await;
    }

    let mut tasks = Vec::new();
    for i in 0..8 {
        let session = ClientSession::new();
        let client = VfsClient::new(fx.broker.attach_client(session));
        tasks.push(tokio::spawn(async move {
            let fd = client
                .walk(None, &format!("/f{i}"), WalkFlags::REGULAR)
                .await?;
            client.open(fd, OpenMode::READ).await?;
            client.close(fd).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("walk/open/close");
    }
}
