//! One CLI invocation: load the image, run a command as a fresh process
//! rooted at "/", save the image.

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::config::{Cli, Command, FsConfig};
use crate::error::{FsError, Result};
use crate::fs::dirent::{DirEntry, DIRENT_SIZE};
use crate::fs::handles::Process;
use crate::fs::{FileSystem, InodeKind, OpenMode, PermDelta, Stat};
use crate::image::Image;
use crate::propagate;

/// Run the command and return the process exit status.
pub fn run(cli: &Cli) -> i32 {
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("permfs: {}", e);
            1
        }
    }
}

fn dispatch(cli: &Cli) -> Result<i32> {
    let config = FsConfig::from_cli(cli);
    if let Command::Mkfs { ninodes } = cli.command {
        if ninodes < 2 || ninodes > u32::from(u16::MAX) {
            return Err(FsError::Config(format!(
                "--ninodes must be between 2 and {}",
                u16::MAX
            )));
        }
        let fs = FileSystem::new(FsConfig { ninodes, ..config });
        fs.to_image().save(&cli.image)?;
        return Ok(0);
    }

    let image = Image::load(&cli.image)?;
    let fs = FileSystem::from_image(&image, config)?;
    let mut proc = fs.spawn();
    let outcome = execute(&fs, &mut proc, &cli.command);
    fs.exit(&mut proc)?;

    if mutates(&cli.command) {
        fs.to_image().save(&cli.image)?;
    }
    debug!(
        "{} commit(s), {} rollback(s)",
        fs.journal().commits(),
        fs.journal().aborts()
    );
    outcome
}

fn mutates(command: &Command) -> bool {
    !matches!(
        command,
        Command::Cat { .. }
            | Command::Ls { .. }
            | Command::Stat { .. }
            | Command::Trace { .. }
    )
}

fn execute(fs: &FileSystem, proc: &mut Process, command: &Command) -> Result<i32> {
    let mut out = io::stdout().lock();
    match command {
        Command::Mkfs { .. } => unreachable!("mkfs is handled before loading an image"),
        Command::Mkdir { path } => fs.mkdir(proc, path)?,
        Command::Mknod { path, major, minor } => fs.mknod(proc, path, *major, *minor)?,
        Command::Write { path, text } => {
            let fd = fs.open(
                proc,
                path,
                OpenMode::CREATE | OpenMode::WRONLY | OpenMode::TRUNC,
            )?;
            fs.write(proc, fd, text.as_bytes())?;
            fs.close(proc, fd)?;
        }
        Command::Cat { path } => {
            let fd = fs.open(proc, path, OpenMode::RDONLY)?;
            let mut buf = [0u8; 512];
            loop {
                let n = fs.read(proc, fd, &mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            fs.close(proc, fd)?;
        }
        Command::Ln {
            symbolic,
            target,
            path,
        } => {
            if *symbolic {
                fs.symlink(proc, target, path)?;
            } else {
                fs.link(proc, target, path)?;
            }
        }
        Command::Rm { path } => fs.unlink(proc, path)?,
        Command::Ls { paths } => {
            if paths.is_empty() {
                ls(fs, proc, ".", &mut out)?;
            }
            for path in paths {
                ls(fs, proc, path, &mut out)?;
            }
        }
        Command::Stat { no_follow, path } => {
            let st = if *no_follow {
                stat(fs, proc, path)?
            } else {
                propagate::resolve(fs, proc, path)?.1
            };
            writeln!(
                out,
                "{}: {} dev={} ino={} nlink={} size={} mode={} major={}",
                path,
                st.kind,
                st.dev,
                st.ino,
                st.nlink,
                st.size,
                st.mode.symbolic(),
                st.major
            )?;
        }
        Command::Trace { path } => {
            let mut hops = Vec::new();
            let outcome = propagate::trace(fs, proc, path, &mut hops);
            writeln!(out, "{}", hops.join(" -> "))?;
            outcome?;
        }
        Command::Chmod {
            recursive,
            mode,
            path,
        } => return chmod(fs, proc, *recursive, mode, path),
    }
    Ok(0)
}

fn chmod(fs: &FileSystem, proc: &mut Process, recursive: bool, mode: &str, path: &str) -> Result<i32> {
    let delta: PermDelta = match mode.parse() {
        Ok(delta) => delta,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: permfs chmod [-R] (+|-)(r|w|rw|wr) PATH");
            return Ok(1);
        }
    };

    if !recursive {
        return Ok(match propagate::chmod_path(fs, proc, delta, path) {
            Ok(()) => 0,
            Err(e) => {
                warn!("chmod {} {}: {}", delta, path, e);
                eprintln!("chmod: cannot chmod {}", path);
                1
            }
        });
    }

    match propagate::propagate(fs, proc, delta, path) {
        Ok(report) => {
            for failure in &report.failures {
                eprintln!("chmod: cannot chmod {}", failure.path);
            }
            if report.root.is_some() {
                eprintln!("chmod: cannot chmod {}", path);
                return Ok(1);
            }
            Ok(0)
        }
        Err(e) => {
            warn!("chmod -R {} {}: {}", delta, path, e);
            eprintln!("chmod: cannot chmod {}", path);
            Ok(1)
        }
    }
}

fn stat(fs: &FileSystem, proc: &mut Process, path: &str) -> Result<Stat> {
    let fd = fs.open(proc, path, OpenMode::NOACCESS)?;
    let st = fs.fstat(proc, fd);
    fs.close(proc, fd)?;
    st
}

fn ls_line(out: &mut impl Write, name: &str, st: &Stat) -> Result<()> {
    writeln!(
        out,
        "{} {} {} {} {}",
        name,
        st.kind.number(),
        st.ino,
        st.size,
        st.mode.symbolic()
    )?;
    Ok(())
}

/// List a directory one entry per line, or describe a single non-directory.
fn ls(fs: &FileSystem, proc: &mut Process, path: &str, out: &mut impl Write) -> Result<()> {
    let fd = fs.open(proc, path, OpenMode::RDONLY)?;
    let st = fs.fstat(proc, fd)?;
    if st.kind != InodeKind::Dir {
        fs.close(proc, fd)?;
        return ls_line(out, path, &st);
    }

    let mut names = Vec::new();
    let mut raw = [0u8; DIRENT_SIZE];
    while fs.read(proc, fd, &mut raw)? == DIRENT_SIZE {
        if let Some(de) = DirEntry::decode(&raw) {
            if !de.is_free() {
                names.push(de.name());
            }
        }
    }
    fs.close(proc, fd)?;

    for name in names {
        let child = format!("{}/{}", path.trim_end_matches('/'), name);
        match stat(fs, proc, &child) {
            Ok(st) => ls_line(out, &name, &st)?,
            Err(e) => eprintln!("ls: cannot stat {}: {}", child, e),
        }
    }
    Ok(())
}
