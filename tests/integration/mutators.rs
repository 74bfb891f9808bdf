use std::sync::Arc;

use permfs::config::FsConfig;
use permfs::error::FsError;
use permfs::fs::{FileSystem, InodeKind, Mode, OpenMode};

use crate::helpers::Fixture;

#[test]
fn test_mkdir_link_counts() {
    let mut fx = Fixture::new();
    assert_eq!(fx.stat("/").nlink, 1);

    fx.mkdir("/d");
    let d = fx.stat("/d");
    assert_eq!(d.kind, InodeKind::Dir);
    // "." does not count against the directory itself.
    assert_eq!(d.nlink, 1);
    // ".." counts against the parent.
    assert_eq!(fx.stat("/").nlink, 2);

    fx.mkdir("/d/e");
    assert_eq!(fx.stat("/d").nlink, 2);
    assert_eq!(fx.stat("/d/e/..").ino, d.ino);
    assert_eq!(fx.stat("/d/e/.").ino, fx.stat("/d/e").ino);
}

#[test]
fn test_mkdir_existing_name_fails() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    assert!(matches!(
        fx.fs.mkdir(&mut fx.proc, "/d"),
        Err(FsError::Exists(_))
    ));
    fx.write_file("/f", "x");
    assert!(matches!(
        fx.fs.mkdir(&mut fx.proc, "/f"),
        Err(FsError::Exists(_))
    ));
}

#[test]
fn test_unlink_non_empty_then_empty_directory() {
    let mut fx = Fixture::new();
    let baseline = fx.fs.store().allocated();
    fx.mkdir("/d");
    fx.write_file("/d/f", "x");

    assert!(matches!(
        fx.fs.unlink(&mut fx.proc, "/d"),
        Err(FsError::NotEmpty(_))
    ));
    assert_eq!(fx.stat("/").nlink, 2);

    fx.fs.unlink(&mut fx.proc, "/d/f").unwrap();
    fx.fs.unlink(&mut fx.proc, "/d").unwrap();
    assert_eq!(fx.stat("/").nlink, 1);
    assert!(fx.list("/").is_empty());
    assert_eq!(fx.fs.store().allocated(), baseline);
}

#[test]
fn test_unlink_dot_entries_rejected() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    assert!(matches!(
        fx.fs.unlink(&mut fx.proc, "/d/."),
        Err(FsError::InvalidArgument(_))
    ));
    assert!(matches!(
        fx.fs.unlink(&mut fx.proc, "/d/.."),
        Err(FsError::InvalidArgument(_))
    ));
    assert!(matches!(
        fx.fs.unlink(&mut fx.proc, "/missing"),
        Err(FsError::NotFound(_))
    ));
}

/// Hard-linking a directory fails and leaves its link count unchanged.
#[test]
fn test_link_directory_refused() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    let before = fx.stat("/d").nlink;

    assert!(matches!(
        fx.fs.link(&mut fx.proc, "/d", "/x"),
        Err(FsError::IsDirectory(_))
    ));
    assert_eq!(fx.stat("/d").nlink, before);
    assert_eq!(fx.list("/"), vec!["d"]);
}

#[test]
fn test_link_shares_the_object() {
    let mut fx = Fixture::new();
    fx.write_file("/f", "shared");
    fx.fs.link(&mut fx.proc, "/f", "/g").unwrap();

    let f = fx.stat("/f");
    assert_eq!(f.nlink, 2);
    assert_eq!(fx.stat("/g").ino, f.ino);

    fx.fs.unlink(&mut fx.proc, "/f").unwrap();
    assert_eq!(fx.stat("/g").nlink, 1);
    assert_eq!(fx.read_file("/g").unwrap(), "shared");
}

/// A link whose second step fails undoes the speculative link-count increment.
#[test]
fn test_failed_link_rolls_back() {
    let mut fx = Fixture::new();
    fx.write_file("/f", "x");
    fx.write_file("/g", "y");
    let aborts = fx.fs.journal().aborts();

    assert!(matches!(
        fx.fs.link(&mut fx.proc, "/f", "/nodir/h"),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        fx.fs.link(&mut fx.proc, "/f", "/g"),
        Err(FsError::Exists(_))
    ));

    assert_eq!(fx.stat("/f").nlink, 1);
    assert_eq!(fx.fs.journal().aborts(), aborts + 2);
    assert_eq!(fx.read_file("/g").unwrap(), "y");
}

#[test]
fn test_open_file_survives_unlink_until_close() {
    let mut fx = Fixture::new();
    fx.write_file("/f", "still here");
    let ino = fx.stat("/f").ino;
    let fd = fx.fs.open(&mut fx.proc, "/f", OpenMode::RDONLY).unwrap();

    fx.fs.unlink(&mut fx.proc, "/f").unwrap();
    assert!(fx.fs.store().get(ino).is_some());

    let mut buf = [0u8; 32];
    let n = fx.fs.read(&fx.proc, fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"still here");
    assert_eq!(fx.fs.fstat(&fx.proc, fd).unwrap().nlink, 0);

    fx.fs.close(&mut fx.proc, fd).unwrap();
    assert!(fx.fs.store().get(ino).is_none());
}

#[test]
fn test_chmod_is_absolute_and_does_not_follow() {
    let mut fx = Fixture::new();
    fx.write_file("/f", "x");
    fx.symlink("/f", "/l");

    fx.set_mode("/l", Mode::empty());
    assert_eq!(fx.mode("/l"), Mode::empty());
    assert_eq!(fx.mode("/f"), Mode::all());

    fx.set_mode("/f", Mode::WRITE);
    assert_eq!(fx.mode("/f"), Mode::WRITE);
}

#[test]
fn test_symlink_rules() {
    let mut fx = Fixture::new();
    let long = "x".repeat(permfs::config::MAXPATH);
    assert!(matches!(
        fx.fs.symlink(&mut fx.proc, &long, "/l"),
        Err(FsError::NameTooLong(_))
    ));

    fx.write_file("/f", "x");
    assert!(matches!(
        fx.fs.symlink(&mut fx.proc, "/anything", "/f"),
        Err(FsError::Exists(_))
    ));

    // Targets are not checked when the link is made.
    fx.symlink("/nowhere", "/dangling");
    assert_eq!(fx.stat("/dangling").kind, InodeKind::Symlink);
}

#[test]
fn test_chdir_and_relative_paths() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    fx.fs.chdir(&mut fx.proc, "/d").unwrap();
    assert_eq!(fx.proc.cwd_inum(), fx.stat("/d").ino);

    fx.write_file("f", "relative");
    assert_eq!(fx.read_file("/d/f").unwrap(), "relative");
    assert_eq!(fx.read_file("../d/f").unwrap(), "relative");

    assert!(matches!(
        fx.fs.chdir(&mut fx.proc, "f"),
        Err(FsError::NotDirectory(_))
    ));
}

#[test]
fn test_chdir_follows_symlink() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    fx.mkdir("/d/e");
    fx.symlink("/d", "/s");
    fx.symlink("e", "/d/rel");

    fx.fs.chdir(&mut fx.proc, "/s").unwrap();
    assert_eq!(fx.proc.cwd_inum(), fx.stat("/d").ino);
    // Relative targets resolve from the new working directory.
    fx.fs.chdir(&mut fx.proc, "rel").unwrap();
    assert_eq!(fx.proc.cwd_inum(), fx.stat("/d/e").ino);

    fx.symlink("/l2", "/l1");
    fx.symlink("/l1", "/l2");
    assert!(matches!(
        fx.fs.chdir(&mut fx.proc, "/l1"),
        Err(FsError::SymlinkLoop(_))
    ));
    fx.write_file("/f", "x");
    fx.symlink("/f", "/sf");
    assert!(matches!(
        fx.fs.chdir(&mut fx.proc, "/sf"),
        Err(FsError::NotDirectory(_))
    ));
    assert_eq!(fx.proc.cwd_inum(), fx.stat("/d/e").ino);
}

/// A removed working directory accepts no new entries, so leaving it frees it.
#[test]
fn test_no_create_in_unlinked_cwd() {
    let mut fx = Fixture::new();
    let baseline = fx.fs.store().allocated();
    fx.write_file("/f", "x");
    fx.mkdir("/d");
    fx.fs.chdir(&mut fx.proc, "/d").unwrap();
    fx.fs.unlink(&mut fx.proc, "/d").unwrap();

    assert!(matches!(
        fx.fs.mkdir(&mut fx.proc, "e"),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        fx.fs.open(&mut fx.proc, "g", OpenMode::CREATE | OpenMode::WRONLY),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        fx.fs.symlink(&mut fx.proc, "/f", "s"),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        fx.fs.link(&mut fx.proc, "/f", "h"),
        Err(FsError::NotFound(_))
    ));
    assert_eq!(fx.stat("/f").nlink, 1);

    fx.fs.chdir(&mut fx.proc, "/").unwrap();
    fx.fs.unlink(&mut fx.proc, "/f").unwrap();
    assert_eq!(fx.fs.store().allocated(), baseline);
    assert!(fx.list("/").is_empty());
}

/// Relative symlink targets are resolved from the caller's working directory.
#[test]
fn test_relative_symlink_target_uses_cwd() {
    let mut fx = Fixture::new();
    fx.mkdir("/d");
    fx.write_file("/d/f", "in d");
    fx.symlink("f", "/d/rel");

    assert!(matches!(fx.read_file("/d/rel"), Err(FsError::NotFound(_))));
    fx.fs.chdir(&mut fx.proc, "/d").unwrap();
    assert_eq!(fx.read_file("rel").unwrap(), "in d");
}

#[test]
fn test_inode_exhaustion_leaves_namespace_unchanged() {
    let mut fx = Fixture::with_config(FsConfig {
        ninodes: 4,
        ..FsConfig::default()
    });
    fx.mkdir("/a");
    fx.write_file("/b", "x");

    assert!(matches!(
        fx.fs.mkdir(&mut fx.proc, "/c"),
        Err(FsError::Exhausted("inode"))
    ));
    assert_eq!(fx.fs.store().allocated(), 3);
    assert_eq!(fx.list("/"), vec!["a", "b"]);
    assert_eq!(fx.stat("/").nlink, 2);
}

#[test]
fn test_freed_slot_is_reused() {
    let mut fx = Fixture::new();
    fx.write_file("/a", "1");
    fx.write_file("/b", "2");
    fx.fs.unlink(&mut fx.proc, "/a").unwrap();
    fx.write_file("/c", "3");
    assert_eq!(fx.list("/"), vec!["c", "b"]);
}

#[test]
fn test_commits_and_rollbacks_are_counted() {
    let mut fx = Fixture::new();
    let commits = fx.fs.journal().commits();
    let aborts = fx.fs.journal().aborts();

    fx.mkdir("/d");
    assert_eq!(fx.fs.journal().commits(), commits + 1);

    assert!(fx.fs.mkdir(&mut fx.proc, "/d").is_err());
    assert_eq!(fx.fs.journal().aborts(), aborts + 1);
    assert_eq!(fx.fs.journal().commits(), commits + 1);
}

#[test]
fn test_image_round_trip_preserves_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fs.json");

    let mut fx = Fixture::new();
    fx.mkdir("/d");
    fx.write_file("/d/f", "persisted");
    fx.symlink("/d/f", "/l");
    fx.set_mode("/d/f", Mode::READ);
    fx.fs.to_image().save(&path).unwrap();

    let image = permfs::image::Image::load(&path).unwrap();
    let fs = FileSystem::from_image(&image, FsConfig::default()).unwrap();
    let mut reloaded = Fixture {
        proc: fs.spawn(),
        fs,
    };
    assert_eq!(reloaded.read_file("/l").unwrap(), "persisted");
    assert_eq!(reloaded.mode("/d/f"), Mode::READ);
    assert_eq!(reloaded.stat("/").nlink, 2);
    assert_eq!(reloaded.stat("/l").kind, InodeKind::Symlink);
}

#[test]
fn test_concurrent_processes() {
    let fs = Arc::new(FileSystem::new(FsConfig::default()));
    let threads: Vec<_> = (0..8)
        .map(|i| {
            let fs = Arc::clone(&fs);
            std::thread::spawn(move || {
                let mut proc = fs.spawn();
                let dir = format!("/t{}", i);
                fs.mkdir(&mut proc, &dir).unwrap();
                for j in 0..5 {
                    let path = format!("{}/f{}", dir, j);
                    let fd = fs
                        .open(&mut proc, &path, OpenMode::CREATE | OpenMode::RDWR)
                        .unwrap();
                    fs.write(&proc, fd, path.as_bytes()).unwrap();
                    fs.close(&mut proc, fd).unwrap();
                }
                fs.exit(&mut proc).unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let mut fx = Fixture {
        proc: fs.spawn(),
        fs: Arc::try_unwrap(fs).ok().unwrap(),
    };
    assert_eq!(fx.stat("/").nlink, 9);
    assert_eq!(fx.fs.store().allocated(), 1 + 8 + 8 * 5);
    for i in 0..8 {
        let path = format!("/t{}/f4", i);
        assert_eq!(fx.read_file(&path).unwrap(), path);
    }
    assert_eq!(fx.fs.open_files(), 0);
}
